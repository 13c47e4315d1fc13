//! Persistence backends for the stepchain workspace.
//!
//! The engine only ever talks to the [`PipelineStateStore`] trait; the
//! backends here provide a JSON file implementation for real use and an
//! in-memory one for tests and ephemeral sessions.

pub mod state_store;

pub use state_store::{
    InMemoryStateStore, JsonStateStore, PipelineStateStore, STATE_FILE_NAME, STATE_PATH_ENV,
    StateStoreError,
};
