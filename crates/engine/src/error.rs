//! Error taxonomy for run operations.

use stepchain_util::StateStoreError;
use thiserror::Error;

/// Failures surfaced by key management and run state transitions.
///
/// Every variant is a terminal, synchronous failure. The engine never
/// retries; callers decide whether to redisplay a form, pick another key,
/// or give up.
#[derive(Debug, Error)]
pub enum RunError {
    /// The key does not match the `{profile}-{kind}-{number}` convention.
    #[error("run key '{0}' does not match the '{{profile}}-{{kind}}-{{number}}' convention")]
    InvalidKeyFormat(String),
    /// No run record exists under the key.
    #[error("no run exists for key '{0}'")]
    NotFound(String),
    /// The key parses but names a workflow kind with no registered definition.
    #[error("workflow kind '{kind}' for run '{key}' is not registered")]
    UnknownKind {
        /// The run key that was passed in.
        key: String,
        /// The unregistered workflow kind segment.
        kind: String,
    },
    /// A mutation was attempted on a finalized run.
    #[error("run '{0}' is finalized and rejects further changes")]
    Finalized(String),
    /// The step id is not declared by the run's workflow kind.
    #[error("workflow for run '{key}' has no step '{step_id}'")]
    UnknownStep {
        /// The run key the operation targeted.
        key: String,
        /// The undeclared step id.
        step_id: String,
    },
    /// A step was submitted while an earlier step is still incomplete.
    #[error("step '{step_id}' of run '{key}' cannot be submitted before '{missing}'")]
    OutOfOrder {
        /// The run key the operation targeted.
        key: String,
        /// The step the caller tried to submit.
        step_id: String,
        /// The earliest incomplete step blocking it.
        missing: String,
    },
    /// Finalize was requested while at least one step is incomplete.
    #[error("run '{key}' cannot be finalized while step '{missing}' is incomplete")]
    PrematureFinalize {
        /// The run key the operation targeted.
        key: String,
        /// The earliest incomplete step.
        missing: String,
    },
    /// The persistence backend failed.
    #[error(transparent)]
    Store(#[from] StateStoreError),
}
