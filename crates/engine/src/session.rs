//! Explicit binding between a caller and the run it is working on.
//!
//! Which run a given user is driving is shared, mutable context. Rather
//! than an ambient global, it is modelled as a [`RunSession`] value the
//! embedding application owns and threads through its request handling;
//! every operation proxies to the controller with the bound key.

use std::sync::Arc;

use serde_json::Value;
use stepchain_types::{PipelineRun, RunCursor};

use crate::controller::WorkflowRunController;
use crate::emitter::StepDirective;
use crate::error::RunError;
use crate::keys::PipelineKeyManager;

/// A controller handle bound to one run key.
pub struct RunSession {
    controller: Arc<WorkflowRunController>,
    key: String,
}

impl RunSession {
    /// Binds a session to an already-resolved run key.
    pub fn new(controller: Arc<WorkflowRunController>, key: impl Into<String>) -> Self {
        Self {
            controller,
            key: key.into(),
        }
    }

    /// Resolves the key through the manager, then binds a session to it.
    pub fn resolve(
        controller: Arc<WorkflowRunController>,
        keys: &PipelineKeyManager,
        key: &str,
    ) -> Result<Self, RunError> {
        keys.resolve_or_create(key)?;
        Ok(Self::new(controller, key))
    }

    /// The run key this session is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Rebinds the session to a different run.
    pub fn switch_run(&mut self, key: impl Into<String>) {
        self.key = key.into();
    }

    /// Submits a value for a step of the bound run.
    pub fn submit(&self, step_id: &str, value: Value) -> Result<RunCursor, RunError> {
        self.controller.submit_step(&self.key, step_id, value)
    }

    /// Reverts the bound run to an earlier step.
    pub fn revert_to(&self, step_id: &str) -> Result<(), RunError> {
        self.controller.revert_to(&self.key, step_id)
    }

    /// Seals the bound run.
    pub fn finalize(&self) -> Result<(), RunError> {
        self.controller.finalize(&self.key)
    }

    /// Reopens the bound run.
    pub fn unfinalize(&self) -> Result<(), RunError> {
        self.controller.unfinalize(&self.key)
    }

    /// Where rendering should resume for the bound run.
    pub fn current_step(&self) -> Result<RunCursor, RunError> {
        self.controller.current_step(&self.key)
    }

    /// Snapshot of the bound run's record.
    pub fn run(&self) -> Result<PipelineRun, RunError> {
        self.controller.run(&self.key)
    }

    /// The single render directive for the bound run.
    pub fn next_directive(&self) -> Result<StepDirective, RunError> {
        self.controller.next_directive(&self.key)
    }

    /// Full render pass for the bound run.
    pub fn directives(&self) -> Result<Vec<StepDirective>, RunError> {
        self.controller.directives(&self.key)
    }
}
