//! Collection contracts and storage backend implementations.
//!
//! # Responsibility
//! - Define the driver-level contract (`DocumentCollection`).
//! - Isolate MongoDB driver and SQLite details from the record store.
//!
//! # Invariants
//! - Backends return semantic errors (`InvalidQuery`, `InvalidUpdate`) in
//!   addition to transport errors.

pub mod collection;
pub mod mongo_collection;
pub mod sqlite_collection;

pub use collection::{DocumentCollection, InsertOutcome, RepoError, RepoResult, UpdateOutcome};
pub use mongo_collection::MongoCollection;
pub use sqlite_collection::SqliteCollection;
