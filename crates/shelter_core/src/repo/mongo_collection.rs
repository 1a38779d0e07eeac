//! MongoDB-backed collection using the driver's blocking API.
//!
//! # Responsibility
//! - Open and verify a session to one database/collection pair.
//! - Forward collection operations to the driver one-to-one.
//!
//! # Invariants
//! - A constructed `MongoCollection` has answered a `ping`.
//! - Insert write failures are reported as unacknowledged, not as errors.

use crate::config::StoreConfig;
use crate::repo::collection::{
    DocumentCollection, InsertOutcome, RepoError, RepoResult, UpdateOutcome,
};
use log::{error, info, warn};
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::sync::{Client, Collection};
use std::time::Instant;

/// Collection handle owning its own driver client.
pub struct MongoCollection {
    collection: Collection<Document>,
}

impl MongoCollection {
    /// Connects with `config` and pings the target database.
    ///
    /// # Errors
    /// - Returns `RepoError::Mongo` when the URI is rejected or the server
    ///   cannot be reached or authenticated against.
    pub fn connect(config: &StoreConfig) -> RepoResult<Self> {
        let started_at = Instant::now();
        info!(
            "event=store_connect module=repo status=start host={} port={} database={} collection={}",
            config.host, config.port, config.database, config.collection
        );

        match open_collection(config) {
            Ok(collection) => {
                info!(
                    "event=store_connect module=repo status=ok duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Self { collection })
            }
            Err(err) => {
                error!(
                    "event=store_connect module=repo status=error duration_ms={} error_code=store_connect_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}

fn open_collection(config: &StoreConfig) -> RepoResult<Collection<Document>> {
    let client = Client::with_uri_str(config.connection_uri())?;
    let database = client.database(&config.database);
    database.run_command(doc! { "ping": 1 }).run()?;
    Ok(database.collection::<Document>(&config.collection))
}

/// Single `$group` stage folding the whole collection into one row.
fn max_pipeline(field: &str) -> Vec<Document> {
    vec![doc! {
        "$group": { "_id": null, "max": { "$max": format!("${field}") } }
    }]
}

/// `$max` over documents lacking the field yields null.
fn group_max(row: Document) -> Bson {
    row.get("max").cloned().unwrap_or(Bson::Null)
}

impl DocumentCollection for MongoCollection {
    fn name(&self) -> &str {
        self.collection.name()
    }

    fn max_value(&self, field: &str) -> RepoResult<Option<Bson>> {
        let mut cursor = self.collection.aggregate(max_pipeline(field)).run()?;
        let row = cursor.next().transpose()?;
        Ok(row.map(group_max))
    }

    fn insert_one(&self, document: Document) -> RepoResult<InsertOutcome> {
        match self.collection.insert_one(document).run() {
            Ok(result) => Ok(InsertOutcome::Acknowledged(result.inserted_id)),
            Err(err) if matches!(*err.kind, ErrorKind::Write(_)) => {
                warn!(
                    "event=store_insert module=repo status=rejected collection={} error={}",
                    self.name(),
                    err
                );
                Ok(InsertOutcome::Unacknowledged)
            }
            Err(err) => Err(RepoError::Mongo(err)),
        }
    }

    fn find(&self, filter: Document) -> RepoResult<Vec<Document>> {
        let cursor = self.collection.find(filter).run()?;
        let documents = cursor.collect::<Result<Vec<_>, _>>()?;
        Ok(documents)
    }

    fn update_many(&self, filter: Document, update: Document) -> RepoResult<UpdateOutcome> {
        let result = self.collection.update_many(filter, update).run()?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    fn delete_many(&self, filter: Document) -> RepoResult<u64> {
        let result = self.collection.delete_many(filter).run()?;
        Ok(result.deleted_count)
    }
}
