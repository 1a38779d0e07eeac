//! MongoDB-style filter parsing and evaluation.
//!
//! Supported: implicit equality, `$eq $ne $gt $gte $lt $lte $in $nin
//! $exists $not $regex` (with `$options` flags `imsxu`), logical `$and $or
//! $nor`, and dotted paths with array fan-out and numeric indexes.
//!
//! # Invariants
//! - Every operator is classified at parse time, before any document is
//!   scanned: recognized server operators outside the list above are
//!   `Unsupported`, anything else is `InvalidQuery`.
//! - Values of different BSON type families never compare as ordered.
//! - Patterns use Rust `regex` syntax; PCRE-only constructs (lookaround,
//!   backreferences) are `Unsupported`.

use crate::model::record::bson_type_name;
use crate::repo::{RepoError, RepoResult};
use mongodb::bson::{Bson, Document};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

const UNSUPPORTED_TOP_LEVEL: &[&str] = &["$expr", "$text", "$where", "$jsonSchema", "$comment"];

const UNSUPPORTED_FIELD: &[&str] = &[
    "$all",
    "$elemMatch",
    "$size",
    "$type",
    "$mod",
    "$geoWithin",
    "$geoIntersects",
    "$near",
    "$nearSphere",
    "$bitsAllSet",
    "$bitsAllClear",
    "$bitsAnySet",
    "$bitsAnyClear",
];

/// Parsed filter document. An empty filter matches every document.
#[derive(Debug, Clone)]
pub struct Filter {
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone)]
enum Clause {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field {
        path: String,
        predicates: Vec<Predicate>,
    },
}

#[derive(Debug, Clone)]
enum Predicate {
    Eq(Bson),
    Ne(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Exists(bool),
    Regex(Regex),
    Not(Vec<Predicate>),
}

impl Filter {
    /// Parses a filter document.
    ///
    /// # Errors
    /// - `RepoError::InvalidQuery` for unknown operators or malformed operands.
    /// - `RepoError::Unsupported` for server operators this evaluator lacks.
    pub fn parse(filter: &Document) -> RepoResult<Self> {
        let mut clauses = Vec::with_capacity(filter.len());
        for (key, value) in filter {
            clauses.push(parse_clause(key, value)?);
        }
        Ok(Self { clauses })
    }

    /// Returns whether `document` satisfies every clause.
    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|clause| clause.matches(document))
    }
}

impl Clause {
    fn matches(&self, document: &Document) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|filter| filter.matches(document)),
            Self::Or(filters) => filters.iter().any(|filter| filter.matches(document)),
            Self::Nor(filters) => !filters.iter().any(|filter| filter.matches(document)),
            Self::Field { path, predicates } => {
                let candidates = resolve_path(document, path);
                predicates
                    .iter()
                    .all(|predicate| predicate.matches(&candidates))
            }
        }
    }
}

impl Predicate {
    fn matches(&self, candidates: &[&Bson]) -> bool {
        match self {
            Self::Eq(target) => equality_matches(candidates, target),
            Self::Ne(target) => !equality_matches(candidates, target),
            Self::Gt(target) => ordering_matches(candidates, target, Ordering::is_gt),
            Self::Gte(target) => ordering_matches(candidates, target, Ordering::is_ge),
            Self::Lt(target) => ordering_matches(candidates, target, Ordering::is_lt),
            Self::Lte(target) => ordering_matches(candidates, target, Ordering::is_le),
            Self::In(targets) => targets
                .iter()
                .any(|target| equality_matches(candidates, target)),
            Self::Nin(targets) => !targets
                .iter()
                .any(|target| equality_matches(candidates, target)),
            Self::Exists(expected) => !candidates.is_empty() == *expected,
            Self::Regex(regex) => regex_matches(candidates, regex),
            Self::Not(inner) => !inner.iter().all(|predicate| predicate.matches(candidates)),
        }
    }
}

fn parse_clause(key: &str, value: &Bson) -> RepoResult<Clause> {
    match key {
        "$and" => Ok(Clause::And(parse_filter_list(key, value)?)),
        "$or" => Ok(Clause::Or(parse_filter_list(key, value)?)),
        "$nor" => Ok(Clause::Nor(parse_filter_list(key, value)?)),
        other if UNSUPPORTED_TOP_LEVEL.contains(&other) => Err(RepoError::Unsupported(
            format!("top level operator {other}"),
        )),
        other if other.starts_with('$') => Err(RepoError::InvalidQuery(format!(
            "unknown top level operator: {other}"
        ))),
        path => Ok(Clause::Field {
            path: path.to_string(),
            predicates: parse_field_value(value)?,
        }),
    }
}

fn parse_filter_list(operator: &str, value: &Bson) -> RepoResult<Vec<Filter>> {
    let items = match value {
        Bson::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(RepoError::InvalidQuery(format!(
                "{operator} must be a nonempty array"
            )))
        }
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(filter) => Filter::parse(filter),
            other => Err(RepoError::InvalidQuery(format!(
                "{operator} entries must be objects, got {}",
                bson_type_name(other)
            ))),
        })
        .collect()
}

fn parse_field_value(value: &Bson) -> RepoResult<Vec<Predicate>> {
    match value {
        Bson::Document(operators) if is_operator_document(operators) => {
            parse_operator_document(operators)
        }
        Bson::RegularExpression(regex) => Ok(vec![Predicate::Regex(compile_regex(
            &regex.pattern,
            &regex.options,
        )?)]),
        literal => Ok(vec![Predicate::Eq(literal.clone())]),
    }
}

fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

fn parse_operator_document(operators: &Document) -> RepoResult<Vec<Predicate>> {
    let mut predicates = Vec::with_capacity(operators.len());
    for (operator, operand) in operators {
        let predicate = match operator.as_str() {
            "$eq" => Predicate::Eq(operand.clone()),
            "$ne" => Predicate::Ne(operand.clone()),
            "$gt" => Predicate::Gt(operand.clone()),
            "$gte" => Predicate::Gte(operand.clone()),
            "$lt" => Predicate::Lt(operand.clone()),
            "$lte" => Predicate::Lte(operand.clone()),
            "$in" => Predicate::In(array_operand(operator, operand)?),
            "$nin" => Predicate::Nin(array_operand(operator, operand)?),
            "$exists" => Predicate::Exists(truthy(operand)),
            "$regex" => Predicate::Regex(regex_operand(operand, operators.get("$options"))?),
            "$options" if operators.contains_key("$regex") => continue,
            "$options" => {
                return Err(RepoError::InvalidQuery(
                    "$options needs a $regex".to_string(),
                ))
            }
            "$not" => match operand {
                Bson::Document(inner) if is_operator_document(inner) => {
                    Predicate::Not(parse_operator_document(inner)?)
                }
                Bson::RegularExpression(regex) => Predicate::Not(vec![Predicate::Regex(
                    compile_regex(&regex.pattern, &regex.options)?,
                )]),
                _ => {
                    return Err(RepoError::InvalidQuery(
                        "$not needs an operator object".to_string(),
                    ))
                }
            },
            other if UNSUPPORTED_FIELD.contains(&other) => {
                return Err(RepoError::Unsupported(format!("operator {other}")))
            }
            other if other.starts_with('$') => {
                return Err(RepoError::InvalidQuery(format!("unknown operator: {other}")))
            }
            other => {
                return Err(RepoError::InvalidQuery(format!(
                    "cannot mix operators and field `{other}` in one expression"
                )))
            }
        };
        predicates.push(predicate);
    }
    Ok(predicates)
}

fn array_operand(operator: &str, operand: &Bson) -> RepoResult<Vec<Bson>> {
    match operand {
        Bson::Array(items) if items.iter().any(|item| matches!(item, Bson::RegularExpression(_))) => {
            Err(RepoError::Unsupported(format!(
                "regular expressions inside {operator}"
            )))
        }
        Bson::Array(items) => Ok(items.clone()),
        other => Err(RepoError::InvalidQuery(format!(
            "{operator} needs an array, got {}",
            bson_type_name(other)
        ))),
    }
}

fn regex_operand(operand: &Bson, options: Option<&Bson>) -> RepoResult<Regex> {
    let (pattern, inline_options) = match operand {
        Bson::String(pattern) => (pattern.as_str(), ""),
        Bson::RegularExpression(regex) => (regex.pattern.as_str(), regex.options.as_str()),
        other => {
            return Err(RepoError::InvalidQuery(format!(
                "$regex has to be a string, got {}",
                bson_type_name(other)
            )))
        }
    };

    let options = match options {
        None => inline_options,
        Some(Bson::String(options)) if inline_options.is_empty() => options.as_str(),
        Some(Bson::String(_)) => {
            return Err(RepoError::InvalidQuery(
                "options set in both $regex and $options".to_string(),
            ))
        }
        Some(other) => {
            return Err(RepoError::InvalidQuery(format!(
                "$options has to be a string, got {}",
                bson_type_name(other)
            )))
        }
    };

    compile_regex(pattern, options)
}

fn compile_regex(pattern: &str, options: &str) -> RepoResult<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            // Patterns are always Unicode-aware.
            'u' => {}
            other => {
                return Err(RepoError::InvalidQuery(format!(
                    "invalid flag in regex options: {other}"
                )))
            }
        }
    }

    builder
        .build()
        .map_err(|err| RepoError::Unsupported(format!("regular expression `{pattern}`: {err}")))
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(number) => *number != 0,
        Bson::Int64(number) => *number != 0,
        Bson::Double(number) => *number != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// Collects every value reachable at a dotted `path`.
///
/// Arrays along the path fan out: `tags.name` visits `name` in each array
/// element, and a numeric segment also indexes into the array.
fn resolve_path<'doc>(document: &'doc Document, path: &str) -> Vec<&'doc Bson> {
    let mut segments = path.split('.');
    let mut current: Vec<&Bson> = segments
        .next()
        .and_then(|head| document.get(head))
        .into_iter()
        .collect();

    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Bson::Document(inner) => next.extend(inner.get(segment)),
                Bson::Array(items) => {
                    if let Ok(index) = segment.parse::<usize>() {
                        next.extend(items.get(index));
                    }
                    for item in items {
                        if let Bson::Document(inner) = item {
                            next.extend(inner.get(segment));
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    current
}

fn equality_matches(candidates: &[&Bson], target: &Bson) -> bool {
    if matches!(target, Bson::Null) && candidates.is_empty() {
        return true;
    }

    candidates.iter().any(|candidate| match candidate {
        Bson::Array(items) => {
            values_equal(candidate, target) || items.iter().any(|item| values_equal(item, target))
        }
        _ => values_equal(candidate, target),
    })
}

fn regex_matches(candidates: &[&Bson], regex: &Regex) -> bool {
    let matches_text = |value: &Bson| match value {
        Bson::String(text) | Bson::Symbol(text) => regex.is_match(text),
        _ => false,
    };

    candidates.iter().any(|candidate| match candidate {
        Bson::Array(items) => items.iter().any(|item| matches_text(item)),
        other => matches_text(other),
    })
}

fn ordering_matches(candidates: &[&Bson], target: &Bson, accept: fn(Ordering) -> bool) -> bool {
    candidates.iter().any(|candidate| match candidate {
        Bson::Array(items) => items
            .iter()
            .any(|item| compare_values(item, target).is_some_and(accept)),
        _ => compare_values(candidate, target).is_some_and(accept),
    })
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

fn as_number(value: &Bson) -> Option<Number> {
    match value {
        Bson::Int32(number) => Some(Number::Int(i64::from(*number))),
        Bson::Int64(number) => Some(Number::Int(*number)),
        Bson::Double(number) => Some(Number::Float(*number)),
        _ => None,
    }
}

fn compare_numbers(left: Number, right: Number) -> Option<Ordering> {
    match (left, right) {
        (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
        (Number::Int(a), Number::Float(b)) => (a as f64).partial_cmp(&b),
        (Number::Float(a), Number::Int(b)) => a.partial_cmp(&(b as f64)),
        (Number::Float(a), Number::Float(b)) => a.partial_cmp(&b),
    }
}

/// Equality with numeric cross-type comparison and key-order-sensitive
/// documents.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return compare_numbers(a, b) == Some(Ordering::Equal);
    }

    match (left, right) {
        (Bson::Array(a), Bson::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Bson::Document(a), Bson::Document(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|((key_a, x), (key_b, y))| key_a == key_b && values_equal(x, y))
        }
        _ => left == right,
    }
}

/// Orders two values within one BSON type family; `None` across families.
pub(crate) fn compare_values(left: &Bson, right: &Bson) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return compare_numbers(a, b);
    }

    match (left, right) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::DateTime(a), Bson::DateTime(b)) => {
            Some(a.timestamp_millis().cmp(&b.timestamp_millis()))
        }
        (Bson::ObjectId(a), Bson::ObjectId(b)) => Some(a.bytes().cmp(&b.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::Filter;
    use crate::repo::RepoError;
    use mongodb::bson::{doc, Bson, Document, Regex};

    fn matches(filter: Document, document: Document) -> bool {
        Filter::parse(&filter)
            .expect("filter should parse")
            .matches(&document)
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches(doc! {}, doc! { "name": "Rex" }));
    }

    #[test]
    fn implicit_equality_compares_numbers_across_types() {
        assert!(matches(doc! { "age": 3_i64 }, doc! { "age": 3 }));
        assert!(matches(doc! { "age": 3.0 }, doc! { "age": 3 }));
        assert!(!matches(doc! { "age": 4 }, doc! { "age": 3 }));
    }

    #[test]
    fn null_equality_matches_missing_fields() {
        assert!(matches(doc! { "outcome": null }, doc! { "name": "Rex" }));
        assert!(!matches(doc! { "outcome": null }, doc! { "outcome": "Adoption" }));
    }

    #[test]
    fn equality_matches_array_elements() {
        let dog = doc! { "tags": ["friendly", "vaccinated"] };
        assert!(matches(doc! { "tags": "vaccinated" }, dog.clone()));
        assert!(matches(doc! { "tags": ["friendly", "vaccinated"] }, dog.clone()));
        assert!(!matches(doc! { "tags": "feral" }, dog));
    }

    #[test]
    fn comparison_operators_respect_type_families() {
        let record = doc! { "age_weeks": 52, "name": "Rex" };
        assert!(matches(doc! { "age_weeks": { "$gte": 52, "$lt": 60 } }, record.clone()));
        assert!(!matches(doc! { "age_weeks": { "$gt": "10" } }, record.clone()));
        assert!(matches(doc! { "name": { "$lt": "Sam" } }, record));
    }

    #[test]
    fn membership_and_existence_operators() {
        let record = doc! { "animal_type": "Dog", "breed": "Beagle" };
        assert!(matches(doc! { "animal_type": { "$in": ["Cat", "Dog"] } }, record.clone()));
        assert!(matches(doc! { "animal_type": { "$nin": ["Cat"] } }, record.clone()));
        assert!(matches(doc! { "outcome_type": { "$exists": false } }, record.clone()));
        assert!(!matches(doc! { "breed": { "$exists": false } }, record.clone()));
        assert!(matches(doc! { "breed": { "$ne": "Poodle" } }, record.clone()));
        assert!(matches(doc! { "breed": { "$not": { "$eq": "Poodle" } } }, record));
    }

    #[test]
    fn logical_operators_combine_subfilters() {
        let record = doc! { "animal_type": "Dog", "sex": "Intact Female" };
        assert!(matches(
            doc! { "$or": [{ "animal_type": "Cat" }, { "sex": "Intact Female" }] },
            record.clone()
        ));
        assert!(matches(
            doc! { "$and": [{ "animal_type": "Dog" }, { "sex": "Intact Female" }] },
            record.clone()
        ));
        assert!(!matches(doc! { "$nor": [{ "animal_type": "Dog" }] }, record));
    }

    #[test]
    fn dotted_paths_walk_nested_documents_and_arrays() {
        let record = doc! {
            "location": { "lat": 30.5, "city": "Austin" },
            "visits": [{ "vet": "Ada" }, { "vet": "Bo" }],
        };
        assert!(matches(doc! { "location.city": "Austin" }, record.clone()));
        assert!(matches(doc! { "visits.vet": "Bo" }, record.clone()));
        assert!(matches(doc! { "visits.0.vet": "Ada" }, record));
    }

    #[test]
    fn unknown_operators_are_rejected() {
        let field_err = Filter::parse(&doc! { "name": { "$bogus": 1 } }).unwrap_err();
        assert!(matches!(field_err, RepoError::InvalidQuery(message) if message.contains("$bogus")));

        let top_err = Filter::parse(&doc! { "$bogus": [] }).unwrap_err();
        assert!(matches!(top_err, RepoError::InvalidQuery(_)));

        let in_err = Filter::parse(&doc! { "name": { "$in": "Rex" } }).unwrap_err();
        assert!(matches!(in_err, RepoError::InvalidQuery(_)));

        let or_err = Filter::parse(&doc! { "$or": [] }).unwrap_err();
        assert!(matches!(or_err, RepoError::InvalidQuery(_)));
    }

    #[test]
    fn regex_operator_matches_strings_and_array_elements() {
        let record = doc! { "breed": "Labrador Retriever Mix", "tags": ["shy", "Vaccinated"] };
        assert!(matches(doc! { "breed": { "$regex": "Labrador" } }, record.clone()));
        assert!(matches(doc! { "breed": { "$regex": "^lab", "$options": "i" } }, record.clone()));
        assert!(!matches(doc! { "breed": { "$regex": "^lab" } }, record.clone()));
        assert!(matches(doc! { "tags": { "$regex": "^vacc", "$options": "i" } }, record.clone()));
        assert!(matches(doc! { "breed": { "$not": { "$regex": "Poodle" } } }, record.clone()));
        assert!(!matches(doc! { "outcome": { "$regex": ".*" } }, record));
    }

    #[test]
    fn regex_literal_value_matches_like_regex_operator() {
        let pattern = Bson::RegularExpression(Regex {
            pattern: "^Rex$".to_string(),
            options: "i".to_string(),
        });
        let filter = doc! { "name": pattern };
        assert!(matches(filter.clone(), doc! { "name": "rex" }));
        assert!(!matches(filter, doc! { "name": "Rexie" }));
    }

    #[test]
    fn malformed_regex_arguments_are_invalid() {
        for filter in [
            doc! { "name": { "$regex": 5 } },
            doc! { "name": { "$options": "i" } },
            doc! { "name": { "$regex": "Rex", "$options": "q" } },
        ] {
            assert!(
                matches!(Filter::parse(&filter), Err(RepoError::InvalidQuery(_))),
                "expected {filter} to be rejected"
            );
        }
    }

    #[test]
    fn server_operators_outside_the_subset_are_unsupported() {
        let lab = Bson::RegularExpression(Regex {
            pattern: "Lab".to_string(),
            options: String::new(),
        });
        for filter in [
            doc! { "$where": "this.age_weeks > 10" },
            doc! { "$expr": { "$gt": ["$a", "$b"] } },
            doc! { "tags": { "$elemMatch": { "$eq": "shy" } } },
            doc! { "tags": { "$size": 2 } },
            doc! { "breed": { "$in": ["Beagle", lab] } },
            doc! { "breed": { "$regex": "(?<=Lab)rador" } },
        ] {
            assert!(
                matches!(Filter::parse(&filter), Err(RepoError::Unsupported(_))),
                "expected {filter} to be unsupported"
            );
        }
    }
}
