//! idlesave-core: persistence and crash recovery for incremental games.
//!
//! Layering, bottom up:
//!   types, error, clock, value      primitives
//!   hashing, codec, crypto          byte pipeline
//!   metadata, payload, snapshot     records
//!   store                           slot files, backups, crash repair
//!   dirty, producer, ledger         runtime state owned by the manager
//!   provider, event, manager        the façade and its seams

pub mod clock;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod dirty;
pub mod error;
pub mod event;
pub mod hashing;
pub mod ledger;
pub mod manager;
pub mod metadata;
pub mod payload;
pub mod producer;
pub mod provider;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod value;

pub use error::{SaveError, SaveResult};
pub use manager::{LifecycleHook, LoadReport, SaveManager, SaveReport};
