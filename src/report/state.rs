use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};

use super::{Freshness, Reporter};
use crate::actions::Errors;

/// Registrar remembering the last successful run of every backup in a JSON file.
#[derive(Debug, Clone)]
pub struct StateFileRegistrar {
    path: PathBuf,
    intervals: HashMap<String, TimeDelta>,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct State {
    #[serde(default)]
    backups: BTreeMap<String, BackupState>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct BackupState {
    last: DateTime<Utc>,
}

impl StateFileRegistrar {
    /// `intervals` holds the preferred interval of every backup with a
    /// freshness policy.
    pub fn new(path: impl Into<PathBuf>, intervals: HashMap<String, TimeDelta>) -> Self {
        Self {
            path: path.into(),
            intervals,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> io::Result<State> {
        match fs::read(&self.path) {
            Ok(content) => serde_json::from_slice(&content).map_err(io::Error::other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(State::default()),
            Err(e) => Err(e),
        }
    }

    fn store(&self, state: &State) -> io::Result<()> {
        let content = serde_json::to_vec_pretty(state).map_err(io::Error::other)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)
    }

    /// Last successful run of `name`, if any was registered.
    pub fn last_success(&self, name: &str) -> io::Result<Option<DateTime<Utc>>> {
        Ok(self.load()?.backups.get(name).map(|backup| backup.last))
    }

    pub(crate) fn record_success_at(&self, name: &str, timestamp: DateTime<Utc>) -> io::Result<()> {
        let mut state = self.load()?;
        state
            .backups
            .insert(name.to_string(), BackupState { last: timestamp });
        self.store(&state)
    }

    pub(crate) fn freshness_at(&self, name: &str, now: DateTime<Utc>) -> Freshness {
        let Some(interval) = self.intervals.get(name) else {
            return Freshness::Unknown;
        };
        match self.last_success(name) {
            Ok(Some(last)) if now - last > *interval => Freshness::Outdated,
            Ok(Some(_)) => Freshness::UpToDate,
            Ok(None) => Freshness::Outdated,
            Err(e) => {
                log::warn!(target: "report::state", "Reading state file '{}' failed: {e}", self.path.display());
                Freshness::Unknown
            }
        }
    }
}

impl Reporter for StateFileRegistrar {
    fn finish_backup(&self, name: &str, errors: &Errors) {
        if !errors.is_empty() {
            return;
        }
        if let Err(e) = self.record_success_at(name, Utc::now()) {
            log::warn!(
                target: "report::state",
                "Registering backup '{name}' in '{}' failed: {e}",
                self.path.display()
            );
        }
    }

    fn is_backup_outdated(&self, name: &str) -> Freshness {
        self.freshness_at(name, Utc::now())
    }
}
