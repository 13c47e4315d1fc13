//! Shared type definitions for the stepchain workspace.
//!
//! The models defined here are consumed by the store backends in
//! `stepchain-util` and the state machine in `stepchain-engine`. They split
//! into two groups: the author-supplied pipeline definitions (immutable for
//! the lifetime of the process) and the per-run record persisted by the
//! state store. Authoring order is execution order everywhere, so ordered
//! collections (`Vec`, `IndexMap`) are used deliberately.

pub mod pipeline;
pub mod run;

pub use pipeline::{
    DefinitionCatalog, DefinitionError, PipelineDefinition, StepDefinition, SuggestDefault,
    SuggestHook,
};
pub use run::{PipelineRun, RunCursor, StepState};
