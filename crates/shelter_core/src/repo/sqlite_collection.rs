//! Embedded SQLite document collection.
//!
//! # Responsibility
//! - Persist schema-free documents as BSON blobs in the `documents` table.
//! - Evaluate the `query` module's MongoDB subset in-process; directives
//!   outside it fail before any row is read.
//!
//! # Invariants
//! - Natural result order is insertion order (`seq ASC`).
//! - `_id` is unique per collection, with numerically equal ids colliding.
//! - `max_value("rec_num")` reads the indexed column unless some record holds
//!   a non-integral `rec_num`.
//! - Bulk updates and deletes run in one transaction; a failure leaves the
//!   collection untouched.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DocumentRow;
use crate::model::record::{ID_FIELD, REC_NUM_FIELD};
use crate::query::filter::compare_values;
use crate::query::{Filter, UpdatePlan};
use crate::repo::collection::{
    DocumentCollection, InsertOutcome, RepoError, RepoResult, UpdateOutcome,
};
use log::warn;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document};
use rusqlite::{params, Connection, ErrorCode};
use std::cmp::Ordering;

/// SQLite-backed collection borrowing a migrated connection.
pub struct SqliteCollection<'conn> {
    conn: &'conn Connection,
    name: String,
}

impl<'conn> SqliteCollection<'conn> {
    /// Binds `name` on a connection opened through `db::open_db*`.
    ///
    /// # Errors
    /// - `UninitializedConnection` when migrations were not applied.
    /// - `MissingRequiredTable` when the `documents` table is absent.
    pub fn try_new(conn: &'conn Connection, name: impl Into<String>) -> RepoResult<Self> {
        let actual_version = current_user_version(conn)?;
        let expected_version = latest_version();
        if actual_version != expected_version {
            return Err(RepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }

        if !table_exists(conn, "documents")? {
            return Err(RepoError::MissingRequiredTable("documents"));
        }

        Ok(Self {
            conn,
            name: name.into(),
        })
    }
}

impl DocumentCollection for SqliteCollection<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_value(&self, field: &str) -> RepoResult<Option<Bson>> {
        if field == REC_NUM_FIELD {
            let (rows, irregular, max): (i64, bool, Option<i64>) = self.conn.query_row(
                "SELECT COUNT(*), COALESCE(MAX(rec_num_irregular), 0), MAX(rec_num)
                 FROM documents
                 WHERE collection = ?1;",
                [&self.name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            if rows == 0 {
                return Ok(None);
            }
            if !irregular {
                return Ok(Some(max.map_or(Bson::Null, Bson::Int64)));
            }
        }

        let documents = load_documents(self.conn, &self.name)?;
        if documents.is_empty() {
            return Ok(None);
        }

        let mut max = Bson::Null;
        for (_, document) in &documents {
            let Some(value) = document.get(field) else {
                continue;
            };
            if matches!(value, Bson::Null) {
                continue;
            }
            let greater = match compare_values(value, &max) {
                Some(ordering) => ordering == Ordering::Greater,
                // First non-null value, or a value outside the numeric family.
                None => matches!(max, Bson::Null) || !is_numeric(value),
            };
            if greater {
                max = value.clone();
            }
        }

        Ok(Some(max))
    }

    fn insert_one(&self, document: Document) -> RepoResult<InsertOutcome> {
        let id = document
            .get(ID_FIELD)
            .cloned()
            .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));

        let mut stored = Document::new();
        stored.insert(ID_FIELD, id.clone());
        for (key, value) in document {
            if key != ID_FIELD {
                stored.insert(key, value);
            }
        }

        let row = DocumentRow::encode(&stored)?;
        let result = self.conn.execute(
            "INSERT INTO documents (collection, doc_key, body, rec_num, rec_num_irregular)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                self.name,
                row.doc_key,
                row.body,
                row.rec_num,
                row.rec_num_irregular
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Acknowledged(id)),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                warn!(
                    "event=store_insert module=repo status=rejected collection={} reason=duplicate_key",
                    self.name
                );
                Ok(InsertOutcome::Unacknowledged)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn find(&self, filter: Document) -> RepoResult<Vec<Document>> {
        let filter = Filter::parse(&filter)?;
        let documents = load_documents(self.conn, &self.name)?;
        Ok(documents
            .into_iter()
            .filter_map(|(_, document)| filter.matches(&document).then_some(document))
            .collect())
    }

    fn update_many(&self, filter: Document, update: Document) -> RepoResult<UpdateOutcome> {
        let filter = Filter::parse(&filter)?;
        let plan = UpdatePlan::parse(&update)?;

        let tx = self.conn.unchecked_transaction()?;
        let mut outcome = UpdateOutcome::default();
        for (seq, mut document) in load_documents(&tx, &self.name)? {
            if !filter.matches(&document) {
                continue;
            }
            outcome.matched += 1;

            if plan.apply(&mut document)? {
                let row = DocumentRow::encode(&document)?;
                tx.execute(
                    "UPDATE documents
                     SET
                        body = ?1,
                        rec_num = ?2,
                        rec_num_irregular = ?3,
                        updated_at = (strftime('%s', 'now') * 1000)
                     WHERE seq = ?4;",
                    params![row.body, row.rec_num, row.rec_num_irregular, seq],
                )?;
                outcome.modified += 1;
            }
        }
        tx.commit()?;

        Ok(outcome)
    }

    fn delete_many(&self, filter: Document) -> RepoResult<u64> {
        let filter = Filter::parse(&filter)?;

        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0_u64;
        for (seq, document) in load_documents(&tx, &self.name)? {
            if filter.matches(&document) {
                tx.execute("DELETE FROM documents WHERE seq = ?1;", [seq])?;
                deleted += 1;
            }
        }
        tx.commit()?;

        Ok(deleted)
    }
}

fn load_documents(conn: &Connection, collection: &str) -> RepoResult<Vec<(i64, Document)>> {
    let mut stmt = conn.prepare(
        "SELECT seq, body
         FROM documents
         WHERE collection = ?1
         ORDER BY seq ASC;",
    )?;
    let mut rows = stmt.query([collection])?;

    let mut documents = Vec::new();
    while let Some(row) = rows.next()? {
        let seq: i64 = row.get("seq")?;
        let body: Vec<u8> = row.get("body")?;
        documents.push((seq, DocumentRow::decode(seq, &body)?));
    }

    Ok(documents)
}

fn is_numeric(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn table_exists(conn: &Connection, table_name: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table_name],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
