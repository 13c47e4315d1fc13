//! Pipeline definition model.
//!
//! A [`PipelineDefinition`] is the authored description of one workflow
//! kind: an ordered list of steps plus optional per-step suggestion hooks.
//! Definitions are validated on construction and immutable afterwards, so
//! everything downstream can rely on step ids being unique and the step
//! list being non-empty.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use indexmap::IndexMap;
use thiserror::Error;

/// Errors raised while assembling pipeline definitions or a catalog.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The workflow kind is empty or contains characters outside `[A-Za-z0-9_]`.
    #[error("workflow kind must be a non-empty run of letters, digits, or underscores, got '{0}'")]
    InvalidKind(String),
    /// The definition declares no steps at all.
    #[error("workflow '{0}' must declare at least one step")]
    EmptySteps(String),
    /// A step was declared without an id.
    #[error("workflow '{kind}' declares a step with an empty id")]
    EmptyStepId {
        /// Workflow kind that owns the offending step.
        kind: String,
    },
    /// Two steps in the same definition share an id.
    #[error("duplicate step id detected in workflow '{kind}': '{step_id}'")]
    DuplicateStepId {
        /// Workflow kind that owns the offending steps.
        kind: String,
        /// The id declared more than once.
        step_id: String,
    },
    /// Two steps in the same definition share a done key.
    #[error("duplicate done key detected in workflow '{kind}': '{done_key}'")]
    DuplicateDoneKey {
        /// Workflow kind that owns the offending steps.
        kind: String,
        /// The done key declared more than once.
        done_key: String,
    },
    /// A suggestion hook was attached to a step id the definition does not declare.
    #[error("workflow '{kind}' has no step '{step_id}' to attach a suggestion hook to")]
    UnknownSuggestStep {
        /// Workflow kind the hook was attached to.
        kind: String,
        /// The step id that does not exist.
        step_id: String,
    },
    /// Two definitions with the same kind were inserted into one catalog.
    #[error("duplicate workflow kind detected in catalog: '{0}'")]
    DuplicateKind(String),
}

/// One authored step inside a pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Stable identifier, unique within the owning definition.
    pub id: String,
    /// Field name the presentation layer files the submitted value under.
    /// Defaults to the step id when omitted.
    #[serde(default)]
    pub done_key: String,
    /// Human-readable label shown when the step is rendered.
    #[serde(default)]
    pub label: String,
    /// Optional longer description for the step form.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether a previously submitted value is offered back as the form
    /// default when this step is displayed again.
    #[serde(default)]
    pub refill: bool,
}

impl StepDefinition {
    /// Builds a minimal step with `done_key` and `label` derived from the id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            done_key: id.clone(),
            label: id.clone(),
            id,
            description: None,
            refill: false,
        }
    }

    /// Returns a copy of this step with refill enabled.
    pub fn with_refill(mut self) -> Self {
        self.refill = true;
        self
    }

    /// Returns a copy of this step with the given label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Returns a copy of this step with the given done key.
    pub fn with_done_key(mut self, done_key: impl Into<String>) -> Self {
        self.done_key = done_key.into();
        self
    }
}

/// Computes the default value offered when a step's form is rendered.
///
/// Hooks are attached per step and receive the submitted value of the
/// immediately preceding step, when one exists. Returning `None` leaves the
/// form blank.
pub trait SuggestDefault: Send + Sync {
    /// Produces a default for the step given the previous step's value.
    fn default_for(&self, previous: Option<&Value>) -> Option<Value>;
}

impl<F> SuggestDefault for F
where
    F: Fn(Option<&Value>) -> Option<Value> + Send + Sync,
{
    fn default_for(&self, previous: Option<&Value>) -> Option<Value> {
        self(previous)
    }
}

/// Shared handle to a suggestion hook.
pub type SuggestHook = Arc<dyn SuggestDefault>;

/// A validated, immutable description of one workflow kind.
#[derive(Clone)]
pub struct PipelineDefinition {
    kind: String,
    title: Option<String>,
    description: Option<String>,
    steps: Vec<StepDefinition>,
    suggest_hooks: HashMap<String, SuggestHook>,
}

impl PipelineDefinition {
    /// Validates the step table and builds a definition.
    ///
    /// Steps with an empty `done_key` inherit their id. Validation rejects
    /// an empty or malformed kind, an empty step list, empty step ids, and
    /// duplicate ids or done keys.
    pub fn new(
        kind: impl Into<String>,
        steps: Vec<StepDefinition>,
    ) -> Result<Self, DefinitionError> {
        let kind = kind.into();
        if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DefinitionError::InvalidKind(kind));
        }
        if steps.is_empty() {
            return Err(DefinitionError::EmptySteps(kind));
        }
        let mut steps = steps;
        for step in &mut steps {
            if step.id.is_empty() {
                return Err(DefinitionError::EmptyStepId { kind });
            }
            if step.done_key.is_empty() {
                step.done_key = step.id.clone();
            }
        }
        for (index, step) in steps.iter().enumerate() {
            if steps[..index].iter().any(|other| other.id == step.id) {
                return Err(DefinitionError::DuplicateStepId {
                    kind,
                    step_id: step.id.clone(),
                });
            }
            if steps[..index].iter().any(|other| other.done_key == step.done_key) {
                return Err(DefinitionError::DuplicateDoneKey {
                    kind,
                    done_key: step.done_key.clone(),
                });
            }
        }
        Ok(Self {
            kind,
            title: None,
            description: None,
            steps,
            suggest_hooks: HashMap::new(),
        })
    }

    /// Returns a copy of this definition with a display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Returns a copy of this definition with a longer description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches a suggestion hook to one of the declared steps.
    pub fn with_suggest(
        mut self,
        step_id: impl Into<String>,
        hook: SuggestHook,
    ) -> Result<Self, DefinitionError> {
        let step_id = step_id.into();
        if self.step(&step_id).is_none() {
            return Err(DefinitionError::UnknownSuggestStep {
                kind: self.kind.clone(),
                step_id,
            });
        }
        self.suggest_hooks.insert(step_id, hook);
        Ok(self)
    }

    /// The workflow kind this definition describes.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Optional display title.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Optional longer description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// All steps in authoring order.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Number of declared steps, always at least one.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Looks up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// Zero-based position of a step within the authoring order.
    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == step_id)
    }

    /// The first step in authoring order.
    pub fn first_step(&self) -> &StepDefinition {
        &self.steps[0]
    }

    /// The step immediately after `step_id`, if any.
    pub fn following(&self, step_id: &str) -> Option<&StepDefinition> {
        let position = self.position(step_id)?;
        self.steps.get(position + 1)
    }

    /// The step immediately before `step_id`, if any.
    pub fn preceding(&self, step_id: &str) -> Option<&StepDefinition> {
        let position = self.position(step_id)?;
        position.checked_sub(1).and_then(|prev| self.steps.get(prev))
    }

    /// Iterates over step ids in authoring order.
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.id.as_str())
    }

    /// Runs the step's suggestion hook against the previous step's value.
    pub fn suggested_default(&self, step_id: &str, previous: Option<&Value>) -> Option<Value> {
        self.suggest_hooks
            .get(step_id)
            .and_then(|hook| hook.default_for(previous))
    }

    /// Whether the step has a suggestion hook attached.
    pub fn has_suggest_hook(&self, step_id: &str) -> bool {
        self.suggest_hooks.contains_key(step_id)
    }
}

impl fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hooks: Vec<&str> = self.suggest_hooks.keys().map(String::as_str).collect();
        hooks.sort_unstable();
        f.debug_struct("PipelineDefinition")
            .field("kind", &self.kind)
            .field("title", &self.title)
            .field("description", &self.description)
            .field("steps", &self.steps)
            .field("suggest_hooks", &hooks)
            .finish()
    }
}

/// All pipeline definitions known to the process, keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct DefinitionCatalog {
    by_kind: IndexMap<String, PipelineDefinition>,
}

impl DefinitionCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from a list of definitions, rejecting duplicate kinds.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = PipelineDefinition>,
    ) -> Result<Self, DefinitionError> {
        let mut catalog = Self::new();
        for definition in definitions {
            catalog.insert(definition)?;
        }
        Ok(catalog)
    }

    /// Adds one definition, rejecting a kind that is already present.
    pub fn insert(&mut self, definition: PipelineDefinition) -> Result<(), DefinitionError> {
        let kind = definition.kind().to_string();
        if self.by_kind.contains_key(&kind) {
            return Err(DefinitionError::DuplicateKind(kind));
        }
        self.by_kind.insert(kind, definition);
        Ok(())
    }

    /// Looks up the definition for a workflow kind.
    pub fn get(&self, kind: &str) -> Option<&PipelineDefinition> {
        self.by_kind.get(kind)
    }

    /// Iterates over registered kinds in insertion order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.by_kind.keys().map(String::as_str)
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    /// Whether the catalog holds no definitions.
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}
