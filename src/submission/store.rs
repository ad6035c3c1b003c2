//! Persisted local state
//!
//! Small key/value store that survives a restart of the participant's
//! session: refresh and instruction counters, the assigned condition and
//! one "already saved" flag per dedupe key. Every mutation is written
//! through to disk when the store is file-backed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StateError;

/// On-disk shape of the local state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateData {
    /// Experiment that wrote the state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    /// Page refresh counter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_count: Option<u32>,
    /// Instructions viewed counter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions_viewed_count: Option<u32>,
    /// Assigned between-subject condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Saved flag per dedupe key
    #[serde(default)]
    pub saved: BTreeMap<String, bool>,
}

/// Local state store, in memory or backed by a JSON file.
#[derive(Debug)]
pub struct LocalState {
    path: Option<PathBuf>,
    data: Mutex<StateData>,
}

impl LocalState {
    /// Creates a store that lives only as long as the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StateData::default()),
        }
    }

    /// Opens (or starts) the state file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file exists but cannot be read and
    /// [`StateError::Corrupt`] if it is not valid state JSON.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => StateData::default(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StateError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateData::default(),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        debug!(path = %path.display(), "local state opened");
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> StateData {
        self.lock().clone()
    }

    /// Scopes the store to `experiment_name`.
    ///
    /// State written by a different experiment is discarded. Returns
    /// `true` when that happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn begin_experiment(&self, experiment_name: &str) -> Result<bool, StateError> {
        self.update(|data| {
            let stale = data
                .experiment_name
                .as_deref()
                .is_some_and(|name| name != experiment_name);
            if stale {
                info!(
                    previous = data.experiment_name.as_deref().unwrap_or(""),
                    current = experiment_name,
                    "clearing local state from another experiment"
                );
                *data = StateData::default();
            }
            data.experiment_name = Some(experiment_name.to_string());
            stale
        })
    }

    /// Counts a (re)start of the session: 0 on the first visit, then +1.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn count_page_refresh(&self) -> Result<u32, StateError> {
        self.update(|data| {
            let count = data.refresh_count.map_or(0, |n| n.saturating_add(1));
            data.refresh_count = Some(count);
            count
        })
    }

    /// Counts a view of the instructions: 0 on the first view, then +1.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn count_instructions_viewed(&self) -> Result<u32, StateError> {
        self.update(|data| {
            let count = data
                .instructions_viewed_count
                .map_or(0, |n| n.saturating_add(1));
            data.instructions_viewed_count = Some(count);
            count
        })
    }

    /// Returns the participant's condition, assigning one if needed.
    ///
    /// A stored condition is kept while it is still one of `conditions`;
    /// otherwise one is sampled with `rng` and stored. Returns `None` when
    /// `conditions` is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn assign_condition<R: Rng + ?Sized>(
        &self,
        conditions: &[String],
        rng: &mut R,
    ) -> Result<Option<String>, StateError> {
        self.update(|data| {
            if let Some(current) = &data.condition {
                if conditions.contains(current) {
                    return Some(current.clone());
                }
            }
            let picked = conditions.choose(rng).cloned();
            data.condition.clone_from(&picked);
            picked
        })
    }

    /// Returns whether `key` was saved successfully.
    #[must_use]
    pub fn is_settled(&self, key: &str) -> bool {
        self.lock().saved.get(key).copied().unwrap_or(false)
    }

    /// Records whether `key` was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn mark_settled(&self, key: &str, saved: bool) -> Result<(), StateError> {
        self.update(|data| {
            data.saved.insert(key.to_string(), saved);
        })
    }

    /// Forgets everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn clear(&self) -> Result<(), StateError> {
        self.update(|data| *data = StateData::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateData> {
        self.data.lock().expect("local state lock poisoned")
    }

    /// Applies `f` to a copy and keeps it only once it is on disk.
    fn update<T>(&self, f: impl FnOnce(&mut StateData) -> T) -> Result<T, StateError> {
        let mut data = self.lock();
        let mut next = data.clone();
        let out = f(&mut next);
        if let Some(path) = &self.path {
            write_atomically(path, &next)?;
        }
        *data = next;
        Ok(out)
    }
}

/// Writes the state next to `path` and renames it into place.
fn write_atomically(path: &Path, data: &StateData) -> Result<(), StateError> {
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };
    let encoded = serde_json::to_vec_pretty(data).map_err(|e| io_err(std::io::Error::other(e)))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, encoded).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}
