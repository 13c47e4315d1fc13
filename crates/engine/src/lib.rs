//! # Stepchain Engine
//!
//! The engine drives linear, resumable workflow runs: it resolves run keys,
//! records step submissions in order, reverts runs to earlier steps, seals
//! finished runs, and derives the render signal the presentation layer
//! consumes. All persistence goes through the `stepchain-util` store trait;
//! the engine itself performs no I/O beyond that contract.
//!
//! ## Key Features
//!
//! - **Run keys**: `{profile}-{kind}-{number}` identifiers with suggestion,
//!   parsing, and idempotent resolution
//! - **Ordered submission**: steps complete strictly in authoring order,
//!   with idempotent resubmission of completed steps
//! - **Revert and finalize**: forward-only invalidation back to any earlier
//!   step, plus sealing and reopening of whole runs
//! - **Render directives**: a strict one-form-at-a-time signal derived
//!   fresh from persisted state
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use stepchain_engine::{KeyLocks, PipelineKeyManager, RunCursor, WorkflowRunController};
//! use stepchain_types::{DefinitionCatalog, PipelineDefinition, StepDefinition};
//! use stepchain_util::{InMemoryStateStore, PipelineStateStore};
//!
//! let definition = PipelineDefinition::new(
//!     "release",
//!     vec![StepDefinition::new("pick_base"), StepDefinition::new("tag")],
//! )?;
//! let catalog = DefinitionCatalog::from_definitions([definition])?;
//!
//! let store: Arc<dyn PipelineStateStore> = Arc::new(InMemoryStateStore::new());
//! let locks = Arc::new(KeyLocks::new());
//! let keys = PipelineKeyManager::new(Arc::clone(&store), Arc::clone(&locks));
//! let controller = WorkflowRunController::new(catalog, store, locks);
//!
//! let key = keys.suggest_next_key("alice", "release")?;
//! keys.resolve_or_create(&key)?;
//!
//! let next = controller.submit_step(&key, "pick_base", json!("main"))?;
//! assert_eq!(next, RunCursor::Step("tag".into()));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`keys`**: run key conventions and the key manager
//! - **`controller`**: the run state machine and its projections
//! - **`emitter`**: render directives derived from run state
//! - **`locks`**: per-key serialization of run operations
//! - **`session`**: explicit binding of a caller to one run
//! - **`error`**: the shared failure taxonomy

pub mod controller;
pub mod emitter;
pub mod error;
pub mod keys;
pub mod locks;
pub mod session;

// Re-export commonly used types for convenience
pub use controller::{WorkflowRunController, run_cursor};
pub use emitter::{StepDirective, next_directive, step_directive, successor_of, traverse};
pub use error::RunError;
pub use keys::{PipelineKeyManager, RunKey, run_prefix};
pub use locks::KeyLocks;
pub use session::RunSession;
pub use stepchain_types::{PipelineRun, RunCursor, StepState};
