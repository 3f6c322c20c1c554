//! Keeps a generated API test suite in step with an evolving contract.
//!
//! Each run diffs the current OpenAPI / Swagger document against the last
//! snapshot, regenerates tests only for new and modified operations, merges
//! them with the untouched tests of the previous artifact and stores the
//! result as a new artifact version. Failed tests can be classified into
//! proposed fixes with [`healing::FailureClassifier`].

pub mod artifact;
pub mod config;
pub mod contract;
pub mod diff;
pub mod events;
pub mod healing;
pub mod snapshot;
pub mod sync;

pub use config::Config;
pub use sync::{SyncOutcome, Synchronizer, TestGenerator, UnitsFileGenerator};
