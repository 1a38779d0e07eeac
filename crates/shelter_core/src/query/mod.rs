//! In-process evaluation of store-native filter and update documents.
//!
//! # Responsibility
//! - Give the embedded SQLite collection the MongoDB semantics callers write
//!   their queries against, for the operator subset listed in [`filter`] and
//!   [`update`].
//! - Reject malformed directives with the same error kinds a server would,
//!   and recognized server operators outside the subset as `Unsupported`.
//!
//! # Invariants
//! - The MongoDB backend never routes through this module; the server owns
//!   matching there.

pub mod filter;
pub mod update;

pub use filter::Filter;
pub use update::UpdatePlan;
