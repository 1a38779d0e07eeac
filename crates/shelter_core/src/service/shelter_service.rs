//! Animal shelter record store.
//!
//! # Responsibility
//! - Provide the create/read/update/delete entry points over one collection.
//! - Allocate the human-facing `rec_num` sequence on create.
//! - Validate caller input before anything reaches the store.
//!
//! # Invariants
//! - A client-supplied `_id` is never persisted; a client-supplied `rec_num`
//!   is always overwritten.
//! - Store failures surface as `ShelterError::Query`, so "no match" and
//!   "query failed" are never conflated.
//! - `delete` reports `NOTHING_DELETED` (-1) instead of a zero count.

use crate::config::{SequencePolicy, StoreConfig};
use crate::model::record::{
    integral_value, into_document, DocumentInputError, Record, RecordId, ID_FIELD, REC_NUM_FIELD,
};
use crate::repo::{DocumentCollection, InsertOutcome, MongoCollection, RepoError};
use log::{error, info, warn};
use mongodb::bson::{Bson, Document};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Sentinel returned by `delete` when the query removed nothing.
pub const NOTHING_DELETED: i64 = -1;

pub type ShelterResult<T> = Result<T, ShelterError>;

/// Record store error.
#[derive(Debug)]
pub enum ShelterError {
    /// A required record/query/change document was absent or not a document.
    InvalidArgument(String),
    /// `rec_num` allocation found no usable maximum.
    Allocation(String),
    /// The store rejected an operation.
    Query(RepoError),
    /// The store could not be reached at construction time.
    Connection(RepoError),
}

impl Display for ShelterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::Allocation(message) => write!(f, "rec_num allocation failed: {message}"),
            Self::Query(err) => write!(f, "query failed: {err}"),
            Self::Connection(err) => write!(f, "store connection failed: {err}"),
        }
    }
}

impl Error for ShelterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Query(err) | Self::Connection(err) => Some(err),
            Self::InvalidArgument(_) | Self::Allocation(_) => None,
        }
    }
}

/// CRUD facade over one shelter collection.
pub struct AnimalShelter<C: DocumentCollection> {
    collection: C,
    sequence_policy: SequencePolicy,
}

impl AnimalShelter<MongoCollection> {
    /// Connects to the MongoDB collection described by `config`.
    ///
    /// # Errors
    /// - `ShelterError::Connection` when the server is unreachable or rejects
    ///   the credentials.
    pub fn connect(config: &StoreConfig) -> ShelterResult<Self> {
        let collection = MongoCollection::connect(config).map_err(ShelterError::Connection)?;
        Ok(Self::new(collection).with_sequence_policy(config.sequence_policy))
    }
}

impl<C: DocumentCollection> AnimalShelter<C> {
    /// Wraps a collection with the default `SequencePolicy::StartAtOne`.
    pub fn new(collection: C) -> Self {
        Self {
            collection,
            sequence_policy: SequencePolicy::default(),
        }
    }

    pub fn with_sequence_policy(mut self, policy: SequencePolicy) -> Self {
        self.sequence_policy = policy;
        self
    }

    pub fn sequence_policy(&self) -> SequencePolicy {
        self.sequence_policy
    }

    /// Returns the underlying collection.
    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// Returns the current maximum `rec_num` plus one.
    ///
    /// # Contract
    /// - With no maximum (empty collection, or no record carrying `rec_num`),
    ///   `StartAtOne` returns 1 and `Strict` fails with `Allocation`.
    /// - A non-integral maximum fails with `Allocation`.
    pub fn next_record_num(&self) -> ShelterResult<i64> {
        let max = self
            .collection
            .max_value(REC_NUM_FIELD)
            .map_err(|err| self.query_failed("record_alloc", err))?;

        let next = match max {
            None | Some(Bson::Null) => match self.sequence_policy {
                SequencePolicy::StartAtOne => 1,
                SequencePolicy::Strict => {
                    return Err(self.allocation_failed(format!(
                        "aggregation on maximum `{REC_NUM_FIELD}` returned no value"
                    )))
                }
            },
            Some(value) => match integral_value(&value).and_then(|max| max.checked_add(1)) {
                Some(next) => next,
                None => {
                    return Err(self.allocation_failed(format!(
                        "maximum `{REC_NUM_FIELD}` is not an integer below i64::MAX: {value}"
                    )))
                }
            },
        };

        info!(
            "event=record_alloc module=service status=ok collection={} rec_num={}",
            self.collection.name(),
            next
        );
        Ok(next)
    }

    /// Inserts `record` and reports whether the store acknowledged it.
    ///
    /// Equivalent to `create_record(record)?.is_some()`.
    pub fn create(&self, record: impl Into<Bson>) -> ShelterResult<bool> {
        Ok(self.create_record(record)?.is_some())
    }

    /// Inserts `record` with a fresh `rec_num` and returns its assigned `_id`.
    ///
    /// Returns `Ok(None)` when the store refused the write.
    ///
    /// # Errors
    /// - `InvalidArgument` when `record` is absent or not a document.
    /// - `Allocation` when no `rec_num` can be assigned.
    /// - `Query` for store transport failures.
    pub fn create_record(&self, record: impl Into<Bson>) -> ShelterResult<Option<RecordId>> {
        let mut record = require_document(record.into(), "create", "record")?;
        record.remove(ID_FIELD);
        let rec_num = self.next_record_num()?;
        record.insert(REC_NUM_FIELD, rec_num);

        let outcome = self
            .collection
            .insert_one(record)
            .map_err(|err| self.query_failed("record_create", err))?;

        match outcome {
            InsertOutcome::Acknowledged(id) => {
                info!(
                    "event=record_create module=service status=ok collection={} id={} rec_num={}",
                    self.collection.name(),
                    id,
                    rec_num
                );
                Ok(Some(id))
            }
            InsertOutcome::Unacknowledged => {
                warn!(
                    "event=record_create module=service status=unacknowledged collection={} rec_num={}",
                    self.collection.name(),
                    rec_num
                );
                Ok(None)
            }
        }
    }

    /// Returns every record matching `query`, fully materialized.
    pub fn read(&self, query: impl Into<Bson>) -> ShelterResult<Vec<Record>> {
        let query = require_document(query.into(), "read", "query")?;
        let records = self
            .collection
            .find(query)
            .map_err(|err| self.query_failed("record_read", err))?;

        info!(
            "event=record_read module=service status=ok collection={} returned={}",
            self.collection.name(),
            records.len()
        );
        Ok(records)
    }

    /// Applies `change` to every record matching `filter`.
    ///
    /// Returns the number of records whose content actually changed; the
    /// matched count is logged.
    pub fn update(&self, filter: impl Into<Bson>, change: impl Into<Bson>) -> ShelterResult<u64> {
        let filter = require_document(filter.into(), "update", "filter")?;
        let change = require_document(change.into(), "update", "change")?;
        let outcome = self
            .collection
            .update_many(filter, change)
            .map_err(|err| self.query_failed("record_update", err))?;

        info!(
            "event=record_update module=service status=ok collection={} matched={} modified={}",
            self.collection.name(),
            outcome.matched,
            outcome.modified
        );
        Ok(outcome.modified)
    }

    /// Removes every record matching `query`.
    ///
    /// Returns the deleted count, or `NOTHING_DELETED` when it is zero.
    pub fn delete(&self, query: impl Into<Bson>) -> ShelterResult<i64> {
        let query = require_document(query.into(), "delete", "query")?;
        let deleted = self
            .collection
            .delete_many(query)
            .map_err(|err| self.query_failed("record_delete", err))?;

        info!(
            "event=record_delete module=service status=ok collection={} deleted={}",
            self.collection.name(),
            deleted
        );
        if deleted == 0 {
            return Ok(NOTHING_DELETED);
        }
        Ok(i64::try_from(deleted).unwrap_or(i64::MAX))
    }

    fn query_failed(&self, event: &'static str, err: RepoError) -> ShelterError {
        error!(
            "event={event} module=service status=error collection={} error_code=query_failed error={}",
            self.collection.name(),
            err
        );
        ShelterError::Query(err)
    }

    fn allocation_failed(&self, message: String) -> ShelterError {
        error!(
            "event=record_alloc module=service status=error collection={} error_code=allocation_failed error={}",
            self.collection.name(),
            message
        );
        ShelterError::Allocation(message)
    }
}

fn require_document(
    value: Bson,
    operation: &'static str,
    argument: &'static str,
) -> ShelterResult<Document> {
    into_document(value).map_err(|err| match err {
        DocumentInputError::Missing => {
            ShelterError::InvalidArgument(format!("{operation}() requires a {argument} document"))
        }
        DocumentInputError::NotADocument(kind) => ShelterError::InvalidArgument(format!(
            "{operation}() {argument} must be a document, got {kind}"
        )),
    })
}
