//! Domain vocabulary for shelter records.
//!
//! # Invariants
//! - Records are schema-free documents; only `_id` and `rec_num` are managed
//!   by the store.

pub mod record;
