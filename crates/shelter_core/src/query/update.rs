//! MongoDB-style update directive parsing and application.
//!
//! Supported modifiers are `$set`, `$unset` and `$inc`. Paths are dotted and
//! may index into arrays (`tags.0`); `$set` past the end of an array pads it
//! with nulls.
//!
//! # Invariants
//! - Replacement documents are rejected like `update_many` rejects them.
//! - `_id` is immutable.
//! - Server modifiers outside the list above and positional paths (`$`,
//!   `$[]`) are `Unsupported` at parse time.

use crate::model::record::{bson_type_name, ID_FIELD};
use crate::repo::{RepoError, RepoResult};
use mongodb::bson::{Bson, Document};

const UNSUPPORTED_MODIFIERS: &[&str] = &[
    "$rename",
    "$min",
    "$max",
    "$mul",
    "$currentDate",
    "$setOnInsert",
    "$push",
    "$addToSet",
    "$pop",
    "$pull",
    "$pullAll",
    "$bit",
];

/// Largest number of nulls a single `$set` may append to an array.
const MAX_ARRAY_PADDING: usize = 1_500_000;

/// Parsed update directive applied to each matched document.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    ops: Vec<UpdateOp>,
}

#[derive(Debug, Clone, PartialEq)]
enum UpdateOp {
    Set(String, Bson),
    Unset(String),
    Inc(String, Bson),
}

impl UpdatePlan {
    /// Parses an update document.
    ///
    /// # Errors
    /// - `RepoError::InvalidUpdate` for empty documents, replacement-style
    ///   documents, unknown modifiers, non-numeric `$inc` operands, or paths
    ///   touching `_id`.
    /// - `RepoError::Unsupported` for server modifiers and positional paths
    ///   this evaluator lacks.
    pub fn parse(update: &Document) -> RepoResult<Self> {
        if update.is_empty() {
            return Err(RepoError::InvalidUpdate(
                "update document must not be empty".to_string(),
            ));
        }

        let mut ops = Vec::new();
        for (modifier, operand) in update {
            if !modifier.starts_with('$') {
                return Err(RepoError::InvalidUpdate(format!(
                    "update document requires atomic operators, found `{modifier}`"
                )));
            }
            if UNSUPPORTED_MODIFIERS.contains(&modifier.as_str()) {
                return Err(RepoError::Unsupported(format!("modifier {modifier}")));
            }

            let fields = match operand {
                Bson::Document(fields) => fields,
                other => {
                    return Err(RepoError::InvalidUpdate(format!(
                        "modifier {modifier} needs an object, got {}",
                        bson_type_name(other)
                    )))
                }
            };

            for (path, value) in fields {
                check_path(path)?;
                let op = match modifier.as_str() {
                    "$set" => UpdateOp::Set(path.clone(), value.clone()),
                    "$unset" => UpdateOp::Unset(path.clone()),
                    "$inc" => {
                        if !is_number(value) {
                            return Err(RepoError::InvalidUpdate(format!(
                                "cannot increment with non-numeric argument: {{{path}: {value}}}"
                            )));
                        }
                        UpdateOp::Inc(path.clone(), value.clone())
                    }
                    other => {
                        return Err(RepoError::InvalidUpdate(format!(
                            "unknown modifier: {other}"
                        )))
                    }
                };
                ops.push(op);
            }
        }

        Ok(Self { ops })
    }

    /// Applies every operation to `document` in order.
    ///
    /// Returns `true` when the document content changed.
    pub fn apply(&self, document: &mut Document) -> RepoResult<bool> {
        let before = document.clone();
        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => set_path(document, path, value.clone())?,
                UpdateOp::Unset(path) => unset_path(document, path),
                UpdateOp::Inc(path, delta) => {
                    let next = match get_path(document, path) {
                        None => delta.clone(),
                        Some(current) => add_numbers(current, delta).ok_or_else(|| {
                            RepoError::InvalidUpdate(format!(
                                "cannot apply $inc to `{path}` of non-numeric type {}",
                                bson_type_name(current)
                            ))
                        })?,
                    };
                    set_path(document, path, next)?;
                }
            }
        }
        Ok(*document != before)
    }
}

fn check_path(path: &str) -> RepoResult<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(RepoError::InvalidUpdate(format!(
            "update path `{path}` contains an empty field name"
        )));
    }
    if path.split('.').next() == Some(ID_FIELD) {
        return Err(RepoError::InvalidUpdate(format!(
            "performing an update on the path `{path}` would modify the immutable field `{ID_FIELD}`"
        )));
    }
    if path.split('.').any(|segment| segment.starts_with('$')) {
        return Err(RepoError::Unsupported(format!(
            "positional operator in update path `{path}`"
        )));
    }
    Ok(())
}

fn array_index(segment: &str) -> Option<usize> {
    if segment.bytes().all(|byte| byte.is_ascii_digit()) {
        segment.parse().ok()
    } else {
        None
    }
}

fn get_path<'doc>(document: &'doc Document, path: &str) -> Option<&'doc Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(array_index(segment)?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> RepoResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }
            match document.get_mut(head) {
                Some(child) => set_in(child, head, rest, value),
                None => Err(cannot_create(rest, head)),
            }
        }
    }
}

/// Sets `path` below `container`, which sits at field `parent`.
fn set_in(container: &mut Bson, parent: &str, path: &str, value: Bson) -> RepoResult<()> {
    let (segment, rest) = match path.split_once('.') {
        Some((segment, rest)) => (segment, Some(rest)),
        None => (path, None),
    };

    match container {
        Bson::Document(inner) => set_path(inner, path, value),
        Bson::Array(items) => {
            let index = array_index(segment).ok_or_else(|| cannot_create(segment, parent))?;
            if index >= items.len() {
                if index - items.len() > MAX_ARRAY_PADDING {
                    return Err(RepoError::InvalidUpdate(format!(
                        "cannot pad `{parent}` with more than {MAX_ARRAY_PADDING} elements"
                    )));
                }
                items.resize(index, Bson::Null);
                items.push(Bson::Document(Document::new()));
            }
            match rest {
                None => {
                    items[index] = value;
                    Ok(())
                }
                Some(rest) => set_in(&mut items[index], segment, rest, value),
            }
        }
        _ => Err(cannot_create(segment, parent)),
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(child) = document.get_mut(head) {
                unset_in(child, rest);
            }
        }
    }
}

fn unset_in(container: &mut Bson, path: &str) {
    match container {
        Bson::Document(inner) => unset_path(inner, path),
        Bson::Array(items) => {
            let (segment, rest) = match path.split_once('.') {
                Some((segment, rest)) => (segment, Some(rest)),
                None => (path, None),
            };
            let Some(slot) = array_index(segment).and_then(|index| items.get_mut(index)) else {
                return;
            };
            match rest {
                // Array elements are nulled in place, never removed.
                None => *slot = Bson::Null,
                Some(rest) => unset_in(slot, rest),
            }
        }
        _ => {}
    }
}

fn cannot_create(field: &str, parent: &str) -> RepoError {
    RepoError::InvalidUpdate(format!(
        "cannot create field `{field}` inside non-object field `{parent}`"
    ))
}

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn add_numbers(current: &Bson, delta: &Bson) -> Option<Bson> {
    let sum = match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).checked_add(*b)?),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.checked_add(i64::from(*b))?),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.checked_add(*b)?),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(f64::from(*a) + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => return None,
    };
    Some(sum)
}
