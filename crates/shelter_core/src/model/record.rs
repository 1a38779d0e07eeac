//! Shelter record vocabulary.
//!
//! # Responsibility
//! - Name the schema-free document shapes passed through the record store.
//! - Convert loosely typed caller input into documents at the API boundary.
//!
//! # Invariants
//! - `_id` is always assigned by the store, never taken from a caller.
//! - `rec_num` is the only field the store itself writes into a record.

use mongodb::bson::{Bson, Document};

/// One animal entry. No fields are required beyond the store-managed ones.
pub type Record = Document;

/// Store-native filter selecting zero or more records.
pub type Query = Document;

/// Store-native update directive, e.g. `{"$set": {"animal_type": "Cat"}}`.
pub type ChangeSpec = Document;

/// Store-assigned unique identifier (`_id`) of a record.
pub type RecordId = Bson;

/// Field holding the store-assigned unique identifier.
pub const ID_FIELD: &str = "_id";

/// Field holding the human-facing sequence number.
pub const REC_NUM_FIELD: &str = "rec_num";

/// Reason a caller-supplied value cannot be used as a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentInputError {
    /// Input was absent (`null` / `None`).
    Missing,
    /// Input was present but not a document; carries the BSON type name.
    NotADocument(&'static str),
}

/// Unwraps a caller-supplied value into a document.
pub fn into_document(value: Bson) -> Result<Document, DocumentInputError> {
    match value {
        Bson::Document(document) => Ok(document),
        Bson::Null | Bson::Undefined => Err(DocumentInputError::Missing),
        other => Err(DocumentInputError::NotADocument(bson_type_name(&other))),
    }
}

/// Reads an integral BSON number as `i64`.
///
/// Doubles are accepted only when they carry no fractional part.
pub fn integral_value(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(number) => Some(i64::from(*number)),
        Bson::Int64(number) => Some(*number),
        Bson::Double(number) if number.fract() == 0.0 && number.is_finite() => {
            Some(*number as i64)
        }
        _ => None,
    }
}

pub(crate) fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => "javascript",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal",
        Bson::Undefined => "undefined",
        Bson::MaxKey => "maxKey",
        Bson::MinKey => "minKey",
        Bson::DbPointer(_) => "dbPointer",
    }
}
