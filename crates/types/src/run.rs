//! Persisted run record and its derived projections.
//!
//! A [`PipelineRun`] is the JSON blob stored per run key. It carries the
//! submitted step values plus the two flags the state machine needs to
//! reconstruct where a run stands: `finalized` and `revert_target`. The
//! record itself stays dumb on purpose; ordering rules live in the engine.

use chrono::serde::ts_seconds;
use chrono::{DateTime, Timelike, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Display-facing state of one step, derived from the run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// No value has been submitted for the step.
    NotStarted,
    /// A value is on record and the step is not otherwise marked.
    Completed,
    /// A value is on record and the step is the pending revert target.
    RevertTarget,
    /// The run is finalized, so the step can no longer be edited.
    Locked,
}

/// Where rendering should resume for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunCursor {
    /// Render the form for this step id next.
    Step(String),
    /// Every step is complete; render the finalize prompt.
    Finalize,
    /// The run is finalized; render the terminal summary.
    Locked,
}

/// The per-run record persisted by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Full run key this record is stored under.
    pub key: String,
    /// Submitted values keyed by step id, in submission order.
    #[serde(default)]
    pub values: IndexMap<String, Value>,
    /// Whether the run has been sealed against further edits.
    #[serde(default)]
    pub finalized: bool,
    /// Step id a revert pointed at, pending resubmission of that step.
    #[serde(default)]
    pub revert_target: Option<String>,
    /// When the run record was first created.
    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
    /// When the run record was last mutated.
    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,
}

/// Current time truncated to whole seconds, matching the persisted precision.
fn now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}

impl PipelineRun {
    /// Creates an empty record for a freshly resolved key.
    pub fn new(key: impl Into<String>) -> Self {
        let now = now_secs();
        Self {
            key: key.into(),
            values: IndexMap::new(),
            finalized: false,
            revert_target: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a value has been submitted for the step.
    pub fn has_value(&self, step_id: &str) -> bool {
        self.values.contains_key(step_id)
    }

    /// The submitted value for the step, if any.
    pub fn value(&self, step_id: &str) -> Option<&Value> {
        self.values.get(step_id)
    }

    /// Derives the display state of one step from the record flags.
    pub fn step_state(&self, step_id: &str) -> StepState {
        if self.finalized {
            return StepState::Locked;
        }
        if !self.has_value(step_id) {
            return StepState::NotStarted;
        }
        if self.revert_target.as_deref() == Some(step_id) {
            return StepState::RevertTarget;
        }
        StepState::Completed
    }

    /// Records a submitted value and clears a revert target aimed at the
    /// same step. Ordering checks happen in the engine before this runs.
    pub fn record_value(&mut self, step_id: impl Into<String>, value: Value) {
        let step_id = step_id.into();
        if self.revert_target.as_deref() == Some(step_id.as_str()) {
            self.revert_target = None;
        }
        self.values.insert(step_id, value);
        self.touch();
    }

    /// Drops the values for the given step ids, keeping the rest intact.
    pub fn remove_values<'a>(&mut self, step_ids: impl IntoIterator<Item = &'a str>) {
        let mut removed = false;
        for step_id in step_ids {
            removed |= self.values.shift_remove(step_id).is_some();
        }
        if removed {
            self.touch();
        }
    }

    /// Points the revert marker at a step.
    pub fn set_revert_target(&mut self, step_id: impl Into<String>) {
        self.revert_target = Some(step_id.into());
        self.touch();
    }

    /// Seals or unseals the record.
    pub fn set_finalized(&mut self, finalized: bool) {
        self.finalized = finalized;
        self.touch();
    }

    /// Refreshes the mutation timestamp.
    pub fn touch(&mut self) {
        self.updated_at = now_secs();
    }
}
