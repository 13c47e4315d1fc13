//! Render directives derived from run state.
//!
//! The presentation layer never walks run records itself; it consumes
//! directives computed here. The contract is strict: a full pass yields the
//! completed steps in order followed by exactly one non-completed directive,
//! and every step shown as completed pairs with exactly one successor
//! directive. That keeps rendering a single-step-at-a-time chain and makes
//! it impossible to race two forms of the same run. Nothing here holds
//! state; every function derives its answer from the definition and the
//! current record.

use serde_json::Value;
use stepchain_types::{PipelineDefinition, PipelineRun, RunCursor};

use crate::controller::run_cursor;

/// One render instruction for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StepDirective {
    /// Render this step's input form.
    Input {
        /// Step to render.
        step_id: String,
        /// Value to pre-populate the form with, when one applies.
        prefill: Option<Value>,
    },
    /// Render this step read-only; it has a recorded value.
    Completed {
        /// Step to render.
        step_id: String,
    },
    /// Every step is complete; render the finalize prompt.
    FinalizeTerminal,
    /// The run is sealed; render the terminal summary.
    Locked,
}

impl StepDirective {
    /// The step this directive points at, when it points at one.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::Input { step_id, .. } | Self::Completed { step_id } => Some(step_id),
            Self::FinalizeTerminal | Self::Locked => None,
        }
    }

    /// Whether this directive renders a completed step.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// The value offered as the form default when a step is displayed.
///
/// A retained value is offered back only when the step allows refill;
/// otherwise the step's suggestion hook runs against the previous step's
/// value, and the form stays blank when neither applies.
fn prefill_for(definition: &PipelineDefinition, run: &PipelineRun, step_id: &str) -> Option<Value> {
    let step = definition.step(step_id)?;
    if step.refill
        && let Some(retained) = run.value(step_id)
    {
        return Some(retained.clone());
    }
    let previous = definition
        .preceding(step_id)
        .and_then(|prev| run.value(&prev.id));
    definition.suggested_default(step_id, previous)
}

/// The single directive for the run's cursor position.
pub fn next_directive(definition: &PipelineDefinition, run: &PipelineRun) -> StepDirective {
    match run_cursor(definition, run) {
        RunCursor::Step(step_id) => {
            let prefill = prefill_for(definition, run, &step_id);
            StepDirective::Input { step_id, prefill }
        }
        RunCursor::Finalize => StepDirective::FinalizeTerminal,
        RunCursor::Locked => StepDirective::Locked,
    }
}

/// What one step renders as right now.
///
/// Returns `None` for steps the traversal has not reached yet and for step
/// ids the definition does not declare.
pub fn step_directive(
    definition: &PipelineDefinition,
    run: &PipelineRun,
    step_id: &str,
) -> Option<StepDirective> {
    definition.step(step_id)?;
    if run.finalized {
        return run
            .has_value(step_id)
            .then(|| StepDirective::Completed {
                step_id: step_id.to_string(),
            });
    }
    match run_cursor(definition, run) {
        RunCursor::Step(cursor) if cursor == step_id => {
            let prefill = prefill_for(definition, run, step_id);
            Some(StepDirective::Input {
                step_id: step_id.to_string(),
                prefill,
            })
        }
        _ => run.has_value(step_id).then(|| StepDirective::Completed {
            step_id: step_id.to_string(),
        }),
    }
}

/// The one directive that follows a completed step.
///
/// Defined only for steps currently rendered as completed; for the last
/// declared step the successor is the run's terminal marker. Together with
/// [`step_directive`] this pins the chain: one completed response, one
/// follow-up, never a fan-out.
pub fn successor_of(
    definition: &PipelineDefinition,
    run: &PipelineRun,
    step_id: &str,
) -> Option<StepDirective> {
    if !matches!(
        step_directive(definition, run, step_id),
        Some(StepDirective::Completed { .. })
    ) {
        return None;
    }
    match definition.following(step_id) {
        Some(next) => step_directive(definition, run, &next.id),
        None if run.finalized => Some(StepDirective::Locked),
        None => Some(StepDirective::FinalizeTerminal),
    }
}

/// Full render pass for a run.
///
/// Emits the completed prefix in authoring order, then exactly one closing
/// directive: the cursor's input form, the finalize prompt, or the locked
/// marker.
pub fn traverse(definition: &PipelineDefinition, run: &PipelineRun) -> Vec<StepDirective> {
    let mut directives = Vec::new();
    for step in definition.steps() {
        match step_directive(definition, run, &step.id) {
            Some(directive) if directive.is_completed() => directives.push(directive),
            Some(directive) => {
                directives.push(directive);
                return directives;
            }
            None => break,
        }
    }
    directives.push(if run.finalized {
        StepDirective::Locked
    } else {
        StepDirective::FinalizeTerminal
    });
    directives
}
