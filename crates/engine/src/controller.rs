//! The run state machine: submission, revert, finalize, and projection.
//!
//! Each operation is a read-modify-write cycle against the persisted run
//! record, executed under the run key's mutex so partial writes are never
//! observable. The record itself stays minimal; every per-step state the
//! presentation layer sees is derived fresh from `values`, `finalized`, and
//! `revert_target` on each call.

use std::sync::Arc;

use serde_json::Value;
use stepchain_types::{DefinitionCatalog, PipelineDefinition, PipelineRun, RunCursor, StepState};
use stepchain_util::PipelineStateStore;
use tracing::debug;

use crate::emitter::{self, StepDirective};
use crate::error::RunError;
use crate::keys::RunKey;
use crate::locks::KeyLocks;

/// Derives where rendering should resume for a run.
///
/// The cursor is the earliest position of the first step lacking a value
/// and the pending revert target. With neither present every step is
/// complete and the finalize prompt is next; a finalized run always reports
/// [`RunCursor::Locked`]. A revert target pointing at a step the definition
/// no longer declares is ignored.
pub fn run_cursor(definition: &PipelineDefinition, run: &PipelineRun) -> RunCursor {
    if run.finalized {
        return RunCursor::Locked;
    }
    let first_gap = definition
        .steps()
        .iter()
        .position(|step| !run.has_value(&step.id));
    let revert = run
        .revert_target
        .as_deref()
        .and_then(|step_id| definition.position(step_id));
    let resume_at = match (first_gap, revert) {
        (Some(gap), Some(target)) => Some(gap.min(target)),
        (gap, target) => gap.or(target),
    };
    match resume_at {
        Some(position) => RunCursor::Step(definition.steps()[position].id.clone()),
        None => RunCursor::Finalize,
    }
}

/// Executes run state transitions against the store.
pub struct WorkflowRunController {
    catalog: DefinitionCatalog,
    store: Arc<dyn PipelineStateStore>,
    locks: Arc<KeyLocks>,
}

impl WorkflowRunController {
    /// Creates a controller over the catalog and store.
    ///
    /// The lock registry must be shared with the [`crate::keys::PipelineKeyManager`]
    /// operating on the same store.
    pub fn new(
        catalog: DefinitionCatalog,
        store: Arc<dyn PipelineStateStore>,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            catalog,
            store,
            locks,
        }
    }

    /// The definition catalog this controller serves.
    pub fn catalog(&self) -> &DefinitionCatalog {
        &self.catalog
    }

    /// Resolves the definition governing a run key.
    pub fn definition_for(&self, key: &str) -> Result<&PipelineDefinition, RunError> {
        let parsed = RunKey::parse(key)?;
        match self.catalog.get(&parsed.kind) {
            Some(definition) => Ok(definition),
            None => Err(RunError::UnknownKind {
                key: key.to_string(),
                kind: parsed.kind,
            }),
        }
    }

    fn load_run(&self, key: &str) -> Result<PipelineRun, RunError> {
        self.store
            .get(key)?
            .ok_or_else(|| RunError::NotFound(key.to_string()))
    }

    /// Records a submitted value for a step and reports what follows.
    ///
    /// Steps must be completed in authoring order: every step before
    /// `step_id` needs a value on record. Resubmitting a completed step is
    /// allowed and overwrites its value; resubmitting the pending revert
    /// target additionally clears the revert marker. Field-level validation
    /// of `value` stays with the caller.
    pub fn submit_step(
        &self,
        key: &str,
        step_id: &str,
        value: Value,
    ) -> Result<RunCursor, RunError> {
        let definition = self.definition_for(key)?;
        self.locks.with(key, || {
            let mut run = self.load_run(key)?;
            if run.finalized {
                return Err(RunError::Finalized(key.to_string()));
            }
            let position = definition
                .position(step_id)
                .ok_or_else(|| RunError::UnknownStep {
                    key: key.to_string(),
                    step_id: step_id.to_string(),
                })?;
            if let Some(missing) = definition.steps()[..position]
                .iter()
                .find(|step| !run.has_value(&step.id))
            {
                return Err(RunError::OutOfOrder {
                    key: key.to_string(),
                    step_id: step_id.to_string(),
                    missing: missing.id.clone(),
                });
            }
            run.record_value(step_id, value);
            let next = match definition.following(step_id) {
                Some(step) => RunCursor::Step(step.id.clone()),
                None => RunCursor::Finalize,
            };
            self.store.set(run)?;
            debug!(key = %key, step_id = %step_id, "step value recorded");
            Ok(next)
        })
    }

    /// Points the run back at an earlier step.
    ///
    /// Values for steps strictly after `step_id` are dropped; the target
    /// step's own value is always retained, whether or not its form will
    /// offer it back. Idempotent: repeating the call changes nothing.
    pub fn revert_to(&self, key: &str, step_id: &str) -> Result<(), RunError> {
        let definition = self.definition_for(key)?;
        self.locks.with(key, || {
            let mut run = self.load_run(key)?;
            if run.finalized {
                return Err(RunError::Finalized(key.to_string()));
            }
            let position = definition
                .position(step_id)
                .ok_or_else(|| RunError::UnknownStep {
                    key: key.to_string(),
                    step_id: step_id.to_string(),
                })?;
            let later: Vec<&str> = definition.steps()[position + 1..]
                .iter()
                .map(|step| step.id.as_str())
                .collect();
            run.remove_values(later);
            run.set_revert_target(step_id);
            self.store.set(run)?;
            debug!(key = %key, step_id = %step_id, "run reverted");
            Ok(())
        })
    }

    /// Seals the run once every step has a value.
    pub fn finalize(&self, key: &str) -> Result<(), RunError> {
        let definition = self.definition_for(key)?;
        self.locks.with(key, || {
            let mut run = self.load_run(key)?;
            if run.finalized {
                return Ok(());
            }
            if let Some(missing) = definition
                .steps()
                .iter()
                .find(|step| !run.has_value(&step.id))
            {
                return Err(RunError::PrematureFinalize {
                    key: key.to_string(),
                    missing: missing.id.clone(),
                });
            }
            run.set_finalized(true);
            self.store.set(run)?;
            debug!(key = %key, "run finalized");
            Ok(())
        })
    }

    /// Reopens a sealed run. Values are left exactly as they were.
    pub fn unfinalize(&self, key: &str) -> Result<(), RunError> {
        self.definition_for(key)?;
        self.locks.with(key, || {
            let mut run = self.load_run(key)?;
            if !run.finalized {
                return Ok(());
            }
            run.set_finalized(false);
            self.store.set(run)?;
            debug!(key = %key, "run reopened");
            Ok(())
        })
    }

    /// Reports where rendering should resume for the run.
    ///
    /// Reads the record fresh on every call; never cache the answer, since
    /// another submission may have moved the run underneath the caller.
    pub fn current_step(&self, key: &str) -> Result<RunCursor, RunError> {
        let definition = self.definition_for(key)?;
        let run = self.load_run(key)?;
        Ok(run_cursor(definition, &run))
    }

    /// Snapshot of the persisted run record.
    pub fn run(&self, key: &str) -> Result<PipelineRun, RunError> {
        self.definition_for(key)?;
        self.load_run(key)
    }

    /// Display states for every declared step, in authoring order.
    pub fn step_states(&self, key: &str) -> Result<Vec<(String, StepState)>, RunError> {
        let definition = self.definition_for(key)?;
        let run = self.load_run(key)?;
        Ok(definition
            .steps()
            .iter()
            .map(|step| (step.id.clone(), run.step_state(&step.id)))
            .collect())
    }

    /// The single render directive for the run's cursor.
    pub fn next_directive(&self, key: &str) -> Result<StepDirective, RunError> {
        let definition = self.definition_for(key)?;
        let run = self.load_run(key)?;
        Ok(emitter::next_directive(definition, &run))
    }

    /// Full render pass for the run, completed steps first.
    pub fn directives(&self, key: &str) -> Result<Vec<StepDirective>, RunError> {
        let definition = self.definition_for(key)?;
        let run = self.load_run(key)?;
        Ok(emitter::traverse(definition, &run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::PipelineKeyManager;
    use serde_json::json;
    use std::thread;
    use stepchain_types::{PipelineDefinition, StepDefinition};
    use stepchain_util::{InMemoryStateStore, JsonStateStore};
    use tempfile::tempdir;

    fn release_catalog() -> DefinitionCatalog {
        let definition = PipelineDefinition::new(
            "release",
            vec![
                StepDefinition::new("pick_base"),
                StepDefinition::new("cut_branch"),
                StepDefinition::new("tag"),
            ],
        )
        .expect("definition should validate");
        DefinitionCatalog::from_definitions([definition]).expect("catalog should build")
    }

    fn harness_with_store(
        store: Arc<dyn PipelineStateStore>,
    ) -> (PipelineKeyManager, WorkflowRunController) {
        let locks = Arc::new(KeyLocks::new());
        let keys = PipelineKeyManager::new(Arc::clone(&store), Arc::clone(&locks));
        let controller = WorkflowRunController::new(release_catalog(), store, locks);
        (keys, controller)
    }

    fn harness() -> (PipelineKeyManager, WorkflowRunController) {
        harness_with_store(Arc::new(InMemoryStateStore::new()))
    }

    fn completed_run(keys: &PipelineKeyManager, controller: &WorkflowRunController) -> String {
        let key = "alice-release-01".to_string();
        keys.resolve_or_create(&key).unwrap();
        controller.submit_step(&key, "pick_base", json!("x")).unwrap();
        controller.submit_step(&key, "cut_branch", json!("y")).unwrap();
        controller.submit_step(&key, "tag", json!("z")).unwrap();
        key
    }

    #[test]
    fn submit_walks_steps_in_order() {
        let (keys, controller) = harness();
        let key = "alice-release-01";
        keys.resolve_or_create(key).unwrap();

        let next = controller.submit_step(key, "pick_base", json!("main")).unwrap();
        assert_eq!(next, RunCursor::Step("cut_branch".into()));

        let next = controller.submit_step(key, "cut_branch", json!("release/1.2")).unwrap();
        assert_eq!(next, RunCursor::Step("tag".into()));

        let next = controller.submit_step(key, "tag", json!("v1.2.0")).unwrap();
        assert_eq!(next, RunCursor::Finalize);
    }

    #[test]
    fn submit_rejects_unknown_key_and_kind() {
        let (_keys, controller) = harness();
        assert!(matches!(
            controller.submit_step("alice-release-01", "pick_base", json!("main")),
            Err(RunError::NotFound(_))
        ));
        assert!(matches!(
            controller.submit_step("alice-rollback-01", "pick_base", json!("main")),
            Err(RunError::UnknownKind { .. })
        ));
        assert!(matches!(
            controller.submit_step("not a key", "pick_base", json!("main")),
            Err(RunError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn submit_rejects_unknown_step() {
        let (keys, controller) = harness();
        keys.resolve_or_create("alice-release-01").unwrap();
        let err = controller
            .submit_step("alice-release-01", "sign_off", json!("ok"))
            .expect_err("undeclared step should be rejected");
        assert!(matches!(err, RunError::UnknownStep { step_id, .. } if step_id == "sign_off"));
    }

    #[test]
    fn submit_enforces_authoring_order() {
        let (keys, controller) = harness();
        let key = "alice-release-01";
        keys.resolve_or_create(key).unwrap();

        let err = controller
            .submit_step(key, "cut_branch", json!("release/1.2"))
            .expect_err("skipping a step should be rejected");
        assert!(matches!(
            err,
            RunError::OutOfOrder { missing, .. } if missing == "pick_base"
        ));

        controller.submit_step(key, "pick_base", json!("main")).unwrap();
        controller.submit_step(key, "cut_branch", json!("release/1.2")).unwrap();
    }

    #[test]
    fn resubmission_is_idempotent() {
        let (keys, controller) = harness();
        let key = "alice-release-01";
        keys.resolve_or_create(key).unwrap();

        let first = controller.submit_step(key, "pick_base", json!("main")).unwrap();
        let values_after_first = controller.run(key).unwrap().values;
        let second = controller.submit_step(key, "pick_base", json!("main")).unwrap();
        let values_after_second = controller.run(key).unwrap().values;

        assert_eq!(first, second);
        assert_eq!(values_after_first, values_after_second);
        assert_eq!(values_after_second.len(), 1);
    }

    #[test]
    fn earlier_steps_can_be_overwritten() {
        let (keys, controller) = harness();
        let key = completed_run(&keys, &controller);

        let next = controller.submit_step(&key, "pick_base", json!("develop")).unwrap();
        assert_eq!(next, RunCursor::Step("cut_branch".into()));
        let run = controller.run(&key).unwrap();
        assert_eq!(run.value("pick_base"), Some(&json!("develop")));
        assert_eq!(run.value("tag"), Some(&json!("z")));
    }

    #[test]
    fn current_step_tracks_first_gap() {
        let (keys, controller) = harness();
        let key = "alice-release-01";
        keys.resolve_or_create(key).unwrap();
        assert_eq!(
            controller.current_step(key).unwrap(),
            RunCursor::Step("pick_base".into())
        );

        controller.submit_step(key, "pick_base", json!("main")).unwrap();
        assert_eq!(
            controller.current_step(key).unwrap(),
            RunCursor::Step("cut_branch".into())
        );

        controller.submit_step(key, "cut_branch", json!("release/1.2")).unwrap();
        controller.submit_step(key, "tag", json!("v1.2.0")).unwrap();
        assert_eq!(controller.current_step(key).unwrap(), RunCursor::Finalize);
    }

    #[test]
    fn revert_drops_later_values_and_moves_the_cursor() {
        let (keys, controller) = harness();
        let key = completed_run(&keys, &controller);

        controller.revert_to(&key, "cut_branch").unwrap();

        let run = controller.run(&key).unwrap();
        assert_eq!(run.value("pick_base"), Some(&json!("x")));
        assert_eq!(run.value("cut_branch"), Some(&json!("y")));
        assert_eq!(run.value("tag"), None);
        assert_eq!(run.revert_target.as_deref(), Some("cut_branch"));
        assert_eq!(
            controller.current_step(&key).unwrap(),
            RunCursor::Step("cut_branch".into())
        );
    }

    #[test]
    fn revert_is_idempotent() {
        let (keys, controller) = harness();
        let key = completed_run(&keys, &controller);

        controller.revert_to(&key, "cut_branch").unwrap();
        let values_after_first = controller.run(&key).unwrap().values;
        controller.revert_to(&key, "cut_branch").unwrap();
        let values_after_second = controller.run(&key).unwrap().values;

        assert_eq!(values_after_first, values_after_second);
    }

    #[test]
    fn resubmitting_the_target_clears_the_marker() {
        let (keys, controller) = harness();
        let key = completed_run(&keys, &controller);
        controller.revert_to(&key, "cut_branch").unwrap();

        let next = controller
            .submit_step(&key, "cut_branch", json!("release/1.3"))
            .unwrap();
        assert_eq!(next, RunCursor::Step("tag".into()));

        let run = controller.run(&key).unwrap();
        assert_eq!(run.revert_target, None);
        assert_eq!(
            controller.current_step(&key).unwrap(),
            RunCursor::Step("tag".into())
        );
    }

    #[test]
    fn revert_to_an_unstarted_step_resumes_at_the_first_gap() {
        let (keys, controller) = harness();
        let key = "alice-release-01";
        keys.resolve_or_create(key).unwrap();
        controller.submit_step(key, "pick_base", json!("main")).unwrap();

        controller.revert_to(key, "tag").unwrap();
        assert_eq!(
            controller.current_step(key).unwrap(),
            RunCursor::Step("cut_branch".into())
        );
    }

    #[test]
    fn revert_rejects_unknown_step_and_finalized_runs() {
        let (keys, controller) = harness();
        let key = completed_run(&keys, &controller);

        assert!(matches!(
            controller.revert_to(&key, "sign_off"),
            Err(RunError::UnknownStep { .. })
        ));

        controller.finalize(&key).unwrap();
        assert!(matches!(
            controller.revert_to(&key, "cut_branch"),
            Err(RunError::Finalized(_))
        ));
    }

    #[test]
    fn finalize_requires_every_step() {
        let (keys, controller) = harness();
        let key = "alice-release-01";
        keys.resolve_or_create(key).unwrap();
        controller.submit_step(key, "pick_base", json!("main")).unwrap();

        let err = controller.finalize(key).expect_err("incomplete run should not finalize");
        assert!(matches!(
            err,
            RunError::PrematureFinalize { missing, .. } if missing == "cut_branch"
        ));
    }

    #[test]
    fn finalize_seals_the_run_against_submissions() {
        let (keys, controller) = harness();
        let key = completed_run(&keys, &controller);

        controller.finalize(&key).unwrap();
        assert_eq!(controller.current_step(&key).unwrap(), RunCursor::Locked);

        let err = controller
            .submit_step(&key, "pick_base", json!("x2"))
            .expect_err("finalized run should reject submissions");
        assert!(matches!(err, RunError::Finalized(_)));
        assert_eq!(
            controller.run(&key).unwrap().value("pick_base"),
            Some(&json!("x"))
        );

        // Sealing twice stays quiet.
        controller.finalize(&key).unwrap();
    }

    #[test]
    fn unfinalize_restores_editing_without_touching_values() {
        let (keys, controller) = harness();
        let key = completed_run(&keys, &controller);
        controller.finalize(&key).unwrap();
        let sealed_values = controller.run(&key).unwrap().values;

        controller.unfinalize(&key).unwrap();
        let run = controller.run(&key).unwrap();
        assert!(!run.finalized);
        assert_eq!(run.values, sealed_values);
        assert_eq!(controller.current_step(&key).unwrap(), RunCursor::Finalize);

        controller.submit_step(&key, "tag", json!("v1.2.1")).unwrap();
    }

    #[test]
    fn step_states_follow_the_record() {
        let (keys, controller) = harness();
        let key = completed_run(&keys, &controller);
        controller.revert_to(&key, "cut_branch").unwrap();

        let states = controller.step_states(&key).unwrap();
        assert_eq!(
            states,
            vec![
                ("pick_base".to_string(), StepState::Completed),
                ("cut_branch".to_string(), StepState::RevertTarget),
                ("tag".to_string(), StepState::NotStarted),
            ]
        );
    }

    #[test]
    fn runs_resume_across_store_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store: Arc<dyn PipelineStateStore> =
                Arc::new(JsonStateStore::new(Some(path.clone())).unwrap());
            let (keys, controller) = harness_with_store(store);
            keys.resolve_or_create("alice-release-01").unwrap();
            controller
                .submit_step("alice-release-01", "pick_base", json!("main"))
                .unwrap();
        }

        let store: Arc<dyn PipelineStateStore> =
            Arc::new(JsonStateStore::new(Some(path)).unwrap());
        let (_keys, controller) = harness_with_store(store);
        assert_eq!(
            controller.current_step("alice-release-01").unwrap(),
            RunCursor::Step("cut_branch".into())
        );
    }

    #[test]
    fn racing_submissions_leave_one_coherent_value() {
        let (keys, controller) = harness();
        let key = "alice-release-01";
        keys.resolve_or_create(key).unwrap();

        let controller = Arc::new(controller);
        let mut handles = Vec::new();
        for index in 0..2 {
            let controller = Arc::clone(&controller);
            handles.push(thread::spawn(move || {
                controller
                    .submit_step("alice-release-01", "pick_base", json!(index))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let run = controller.run(key).unwrap();
        assert_eq!(run.values.len(), 1);
        let stored = run.value("pick_base").unwrap();
        assert!(stored == &json!(0) || stored == &json!(1));
    }
}
