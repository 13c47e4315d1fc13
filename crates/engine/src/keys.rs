//! Run key conventions: parsing, suggestion, and resolution.
//!
//! Every run is addressed by a key of the form `{profile}-{kind}-{number}`.
//! Profile and kind segments are restricted to letters, digits, and
//! underscores so the hyphen separators stay unambiguous and prefix scans
//! over the store cannot bleed into neighbouring kinds.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use stepchain_types::PipelineRun;
use stepchain_util::PipelineStateStore;
use tracing::debug;

use crate::error::RunError;
use crate::locks::KeyLocks;

static RUN_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_]+)-([A-Za-z0-9_]+)-(\d+)$").expect("run key regex should compile"));

/// Minimum digit width used when formatting run numbers.
const MIN_NUMBER_WIDTH: usize = 2;

/// Prefix shared by every run key of one profile and workflow kind.
pub fn run_prefix(profile: &str, kind: &str) -> String {
    format!("{profile}-{kind}-")
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Structured form of a run key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKey {
    /// Owning profile segment.
    pub profile: String,
    /// Workflow kind segment.
    pub kind: String,
    /// Numeric run suffix.
    pub number: u64,
}

impl RunKey {
    /// Parses a key string into its three parts.
    pub fn parse(key: &str) -> Result<Self, RunError> {
        let captures = RUN_KEY_REGEX
            .captures(key)
            .ok_or_else(|| RunError::InvalidKeyFormat(key.to_string()))?;
        let number = captures[3]
            .parse::<u64>()
            .map_err(|_| RunError::InvalidKeyFormat(key.to_string()))?;
        Ok(Self {
            profile: captures[1].to_string(),
            kind: captures[2].to_string(),
            number,
        })
    }

    /// Prefix covering all runs of this key's profile and kind.
    pub fn prefix(&self) -> String {
        run_prefix(&self.profile, &self.kind)
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:0width$}",
            self.profile,
            self.kind,
            self.number,
            width = MIN_NUMBER_WIDTH
        )
    }
}

/// Generates, resolves, and discards run keys against the state store.
pub struct PipelineKeyManager {
    store: Arc<dyn PipelineStateStore>,
    locks: Arc<KeyLocks>,
}

impl PipelineKeyManager {
    /// Creates a manager over the given store.
    ///
    /// The lock registry must be the same instance the run controller uses,
    /// otherwise creation and mutation of one key are not serialized against
    /// each other.
    pub fn new(store: Arc<dyn PipelineStateStore>, locks: Arc<KeyLocks>) -> Self {
        Self { store, locks }
    }

    /// Suggests the next free key for a profile and workflow kind.
    ///
    /// Scans existing keys under the `{profile}-{kind}-` prefix and returns
    /// the successor of the highest numeric suffix, starting at `01`. The
    /// width grows naturally past two digits (`99` is followed by `100`).
    /// Pure: repeated calls return the same key until a run is created.
    pub fn suggest_next_key(&self, profile: &str, kind: &str) -> Result<String, RunError> {
        if !valid_segment(profile) || !valid_segment(kind) {
            return Err(RunError::InvalidKeyFormat(run_prefix(profile, kind)));
        }
        let next = self
            .store
            .list(&run_prefix(profile, kind))?
            .iter()
            .filter_map(|key| RunKey::parse(key).ok())
            .map(|parsed| parsed.number)
            .max()
            .map_or(1, |highest| highest.saturating_add(1));
        let suggested = RunKey {
            profile: profile.to_string(),
            kind: kind.to_string(),
            number: next,
        };
        Ok(suggested.to_string())
    }

    /// Returns the run stored under the key, creating an empty one first if
    /// none exists yet.
    ///
    /// Idempotent: a second call with the same key returns the now-existing
    /// run, including any values submitted in between.
    pub fn resolve_or_create(&self, key: &str) -> Result<PipelineRun, RunError> {
        RunKey::parse(key)?;
        self.locks.with(key, || {
            if let Some(existing) = self.store.get(key)? {
                return Ok(existing);
            }
            let run = PipelineRun::new(key);
            self.store.set(run.clone())?;
            debug!(key = %key, "run record created");
            Ok(run)
        })
    }

    /// Lists existing run keys for a profile and workflow kind, ascending.
    pub fn list_keys(&self, profile: &str, kind: &str) -> Result<Vec<String>, RunError> {
        if !valid_segment(profile) || !valid_segment(kind) {
            return Err(RunError::InvalidKeyFormat(run_prefix(profile, kind)));
        }
        Ok(self.store.list(&run_prefix(profile, kind))?)
    }

    /// Deletes the run stored under the key. Returns whether one existed.
    pub fn discard(&self, key: &str) -> Result<bool, RunError> {
        RunKey::parse(key)?;
        self.locks.with(key, || Ok(self.store.delete(key)?))
    }

    /// Deletes every run of a profile and workflow kind. Returns the count.
    pub fn discard_all(&self, profile: &str, kind: &str) -> Result<usize, RunError> {
        if !valid_segment(profile) || !valid_segment(kind) {
            return Err(RunError::InvalidKeyFormat(run_prefix(profile, kind)));
        }
        Ok(self.store.delete_all(&run_prefix(profile, kind))?)
    }
}
