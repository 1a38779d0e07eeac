//! Embedded document storage: connection bootstrap, schema, and row codec.
//!
//! Rows in `documents` carry the BSON body plus columns derived from it
//! (`doc_key` for `_id` uniqueness, `rec_num` for sequence allocation).
//! Every writer goes through [`DocumentRow`] so the derived columns never
//! drift from the body.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod body;
pub mod migrations;
mod open;

pub(crate) use body::DocumentRow;
pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A stored body does not decode as BSON.
    CorruptDocument { seq: i64, reason: String },
    /// A document could not be serialized to BSON bytes.
    Unencodable(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::CorruptDocument { seq, reason } => {
                write!(f, "stored document seq={seq} is not valid BSON: {reason}")
            }
            Self::Unencodable(reason) => write!(f, "document cannot be encoded: {reason}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
