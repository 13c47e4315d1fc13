//! Run-record persistence for pipelines.
//!
//! This module exposes the key/value contract the engine persists runs
//! through, along with a JSON-backed implementation mirroring the ergonomics
//! of the other config files (tilde expansion, config directory fallback).
//! Keys are opaque strings here; prefix scoping is plain `starts_with`.

use dirs_next::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use stepchain_types::PipelineRun;
use thiserror::Error;
use tracing::warn;

/// Environment variable controlling the state file location.
pub const STATE_PATH_ENV: &str = "STEPCHAIN_STATE_PATH";

/// Default filename for the persisted run state.
pub const STATE_FILE_NAME: &str = "state.json";

/// Errors surfaced by state store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// I/O failure while reading or writing the state file.
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// On-disk shape of the state file.
#[derive(Default, Serialize, Deserialize)]
struct StateFile {
    runs: BTreeMap<String, PipelineRun>,
}

impl StateFile {
    fn get(&self, key: &str) -> Option<PipelineRun> {
        self.runs.get(key).cloned()
    }

    fn upsert(&mut self, run: PipelineRun) {
        self.runs.insert(run.key.clone(), run);
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.runs
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn remove(&mut self, key: &str) -> bool {
        self.runs.remove(key).is_some()
    }

    fn remove_prefix(&mut self, prefix: &str) -> usize {
        let before = self.runs.len();
        self.runs.retain(|key, _| !key.starts_with(prefix));
        before - self.runs.len()
    }
}

/// Shared trait implemented by run persistence backends.
///
/// Every operation is scoped by the full run key or a key prefix; backends
/// never interpret key contents beyond byte-wise prefix matching.
pub trait PipelineStateStore: Send + Sync {
    /// Retrieve the run stored under the provided key.
    fn get(&self, key: &str) -> Result<Option<PipelineRun>, StateStoreError>;

    /// Store or replace the run under its own key.
    fn set(&self, run: PipelineRun) -> Result<(), StateStoreError>;

    /// List all stored keys starting with the prefix, in ascending order.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StateStoreError>;

    /// Remove the run stored under the key. Returns whether one existed.
    fn delete(&self, key: &str) -> Result<bool, StateStoreError>;

    /// Remove every run whose key starts with the prefix. Returns the count.
    fn delete_all(&self, prefix: &str) -> Result<usize, StateStoreError>;
}

/// JSON-backed state store persisted on disk.
pub struct JsonStateStore {
    path: PathBuf,
    runs: Mutex<StateFile>,
}

impl JsonStateStore {
    /// Create a new store at the provided path (or the default path when omitted).
    pub fn new<P: Into<Option<PathBuf>>>(path: P) -> Result<Self, StateStoreError> {
        let resolved_path = match path.into() {
            Some(path) => expand_tilde_path(path),
            None => default_state_path(),
        };

        let file = load_state_file(&resolved_path)?;
        Ok(Self {
            path: resolved_path,
            runs: Mutex::new(file),
        })
    }

    /// Initialize a store using the default location.
    pub fn with_defaults() -> Result<Self, StateStoreError> {
        Self::new(None::<PathBuf>)
    }

    /// Access the underlying state file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, state_file: &StateFile) -> Result<(), StateStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(state_file)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl PipelineStateStore for JsonStateStore {
    fn get(&self, key: &str) -> Result<Option<PipelineRun>, StateStoreError> {
        let runs = self.runs.lock().expect("state lock poisoned");
        Ok(runs.get(key))
    }

    fn set(&self, run: PipelineRun) -> Result<(), StateStoreError> {
        let mut runs = self.runs.lock().expect("state lock poisoned");
        runs.upsert(run);
        self.save_locked(&runs)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StateStoreError> {
        let runs = self.runs.lock().expect("state lock poisoned");
        Ok(runs.keys_with_prefix(prefix))
    }

    fn delete(&self, key: &str) -> Result<bool, StateStoreError> {
        let mut runs = self.runs.lock().expect("state lock poisoned");
        let removed = runs.remove(key);
        if removed {
            self.save_locked(&runs)?;
        }
        Ok(removed)
    }

    fn delete_all(&self, prefix: &str) -> Result<usize, StateStoreError> {
        let mut runs = self.runs.lock().expect("state lock poisoned");
        let removed = runs.remove_prefix(prefix);
        if removed > 0 {
            self.save_locked(&runs)?;
        }
        Ok(removed)
    }
}

/// In-memory state store primarily used for unit testing.
#[derive(Default)]
pub struct InMemoryStateStore {
    runs: Mutex<StateFile>,
}

impl InMemoryStateStore {
    /// Create an empty in-memory state store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineStateStore for InMemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<PipelineRun>, StateStoreError> {
        let runs = self.runs.lock().expect("state lock poisoned");
        Ok(runs.get(key))
    }

    fn set(&self, run: PipelineRun) -> Result<(), StateStoreError> {
        let mut runs = self.runs.lock().expect("state lock poisoned");
        runs.upsert(run);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StateStoreError> {
        let runs = self.runs.lock().expect("state lock poisoned");
        Ok(runs.keys_with_prefix(prefix))
    }

    fn delete(&self, key: &str) -> Result<bool, StateStoreError> {
        let mut runs = self.runs.lock().expect("state lock poisoned");
        Ok(runs.remove(key))
    }

    fn delete_all(&self, prefix: &str) -> Result<usize, StateStoreError> {
        let mut runs = self.runs.lock().expect("state lock poisoned");
        Ok(runs.remove_prefix(prefix))
    }
}

fn expand_tilde_path(path: PathBuf) -> PathBuf {
    if let Some(first) = path.components().next()
        && first.as_os_str() != "~"
    {
        return path;
    }

    let input = path.to_string_lossy();
    let trimmed = input.trim();

    if trimmed == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }

    if let Some(rest) = trimmed.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }

    if let Some(rest) = trimmed.strip_prefix("~\\") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }

    PathBuf::from(trimmed)
}

fn default_state_path() -> PathBuf {
    if let Ok(path) = env::var(STATE_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde_path(PathBuf::from(path));
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepchain")
        .join(STATE_FILE_NAME)
}

fn load_state_file(path: &Path) -> Result<StateFile, StateStoreError> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<StateFile>(&content) {
            Ok(file) => Ok(file),
            Err(error) => {
                warn!("Failed to parse state file at {}: {}", path.display(), error);
                Ok(StateFile::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
        Err(error) => Err(StateStoreError::Io(error)),
    }
}
