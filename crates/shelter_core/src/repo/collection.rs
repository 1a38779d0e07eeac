//! Document collection contract shared by every storage backend.
//!
//! # Responsibility
//! - Define the driver-level operations the record store forwards to.
//! - Carry backend failures as one semantic error type.
//!
//! # Invariants
//! - Implementations forward filters and update documents to the store
//!   unchanged; callers own their meaning.
//! - `find` returns fully materialized results, never a lazy cursor.

use crate::db::DbError;
use crate::model::record::{Query, Record, RecordId};
use mongodb::bson::{Bson, Document};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Backend error for collection reads and writes.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    Mongo(mongodb::error::Error),
    /// Filter document rejected by the store.
    InvalidQuery(String),
    /// Update document rejected by the store.
    InvalidUpdate(String),
    /// Recognized operator the embedded store does not implement.
    Unsupported(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Mongo(err) => write!(f, "{err}"),
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
            Self::InvalidUpdate(message) => write!(f, "invalid update: {message}"),
            Self::Unsupported(message) => write!(f, "not supported by the embedded store: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}; open it with db::open_db"
            ),
            Self::MissingRequiredTable(table) => write!(f, "required table `{table}` is missing"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Mongo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<mongodb::error::Error> for RepoError {
    fn from(value: mongodb::error::Error) -> Self {
        Self::Mongo(value)
    }
}

/// Result of a single-document insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The store persisted the document under this identifier.
    Acknowledged(RecordId),
    /// The store refused the write (e.g. duplicate key); nothing persisted.
    Unacknowledged,
}

/// Counts reported by a bulk update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Driver-level operations on one named collection.
pub trait DocumentCollection {
    /// Collection name, used in diagnostics.
    fn name(&self) -> &str;

    /// Groups every document and returns the maximum of `field`.
    ///
    /// Returns `None` when the aggregation yields no row (empty collection)
    /// and `Some(Bson::Null)` when documents exist but none carries `field`.
    fn max_value(&self, field: &str) -> RepoResult<Option<Bson>>;

    /// Inserts one document, assigning `_id` when the document lacks one.
    fn insert_one(&self, document: Record) -> RepoResult<InsertOutcome>;

    /// Returns every document matching `filter`, in store natural order.
    fn find(&self, filter: Query) -> RepoResult<Vec<Record>>;

    /// Applies `update` to every document matching `filter`.
    fn update_many(&self, filter: Query, update: Document) -> RepoResult<UpdateOutcome>;

    /// Removes every document matching `filter`; returns the deleted count.
    fn delete_many(&self, filter: Query) -> RepoResult<u64>;
}
