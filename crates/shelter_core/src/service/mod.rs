//! Use-case services for shelter callers.
//!
//! # Invariants
//! - Services depend on `DocumentCollection`, never on a concrete backend,
//!   except for the MongoDB `connect` constructor.

pub mod shelter_service;
