//! Core record store for the animal shelter application.
//! Owns the document collection contract, its backends, and the CRUD service.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod service;

pub use config::{ConfigError, SequencePolicy, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::record::{ChangeSpec, Query, Record, RecordId, ID_FIELD, REC_NUM_FIELD};
pub use mongodb::bson;
pub use repo::{
    DocumentCollection, InsertOutcome, MongoCollection, RepoError, RepoResult, SqliteCollection,
    UpdateOutcome,
};
pub use service::shelter_service::{AnimalShelter, ShelterError, ShelterResult, NOTHING_DELETED};
