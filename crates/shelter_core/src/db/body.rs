use super::{DbError, DbResult};
use crate::model::record::{integral_value, ID_FIELD, REC_NUM_FIELD};
use mongodb::bson::{Bson, Document};

/// Column values persisted for one document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DocumentRow {
    pub doc_key: String,
    pub body: Vec<u8>,
    /// Integral `rec_num`, if the document carries one.
    pub rec_num: Option<i64>,
    /// `rec_num` is present but not an integral number (string, 2.5, ...).
    pub rec_num_irregular: bool,
}

impl DocumentRow {
    pub fn encode(document: &Document) -> DbResult<Self> {
        let mut body = Vec::new();
        document
            .to_writer(&mut body)
            .map_err(|err| DbError::Unencodable(err.to_string()))?;

        let (rec_num, rec_num_irregular) = rec_num_columns(document);
        Ok(Self {
            doc_key: document.get(ID_FIELD).map(id_key).unwrap_or_default(),
            body,
            rec_num,
            rec_num_irregular,
        })
    }

    pub fn decode(seq: i64, body: &[u8]) -> DbResult<Document> {
        Document::from_reader(body).map_err(|err| DbError::CorruptDocument {
            seq,
            reason: err.to_string(),
        })
    }
}

/// Unique-key form of an `_id`. Numbers holding the same integral value share
/// one key, so `1`, `1_i64` and `1.0` collide as they do on a server.
fn id_key(id: &Bson) -> String {
    let normalized = match integral_value(id) {
        Some(number) => Bson::Int64(number),
        None => id.clone(),
    };
    normalized.into_canonical_extjson().to_string()
}

fn rec_num_columns(document: &Document) -> (Option<i64>, bool) {
    match document.get(REC_NUM_FIELD) {
        None | Some(Bson::Null) => (None, false),
        Some(value) => match integral_value(value) {
            Some(number) => (Some(number), false),
            None => (None, true),
        },
    }
}
