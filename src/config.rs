//! Loading of the TOML configuration file.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};
use serde::de::DeserializeOwned;

/// Configuration of all backups.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    /// Registrar remembering when backups last succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrar: Option<RegistrarConfig>,

    /// Backups by name.
    #[serde(default)]
    pub backups: BTreeMap<String, BackupConfig>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistrarConfig {
    /// JSON file the time of the last successful run of every backup is kept in.
    pub state_file: PathBuf,
}

/// A named backup: an ordered list of action descriptors.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// A backup older than this many hours is outdated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_hours: Option<u64>,

    /// Action descriptors, each with an `action` type discriminator.
    #[serde(default)]
    pub actions: Vec<toml::Table>,
}

impl Configuration {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!(target: "config", "Using config file '{}'", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn backup(&self, name: &str) -> Result<&BackupConfig, ConfigError> {
        self.backups
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBackup(name.to_string()))
    }
}

/// Invalid or incomplete configuration. Fatal to the enclosing backup.
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("Unable to read config file '{}': {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[display("Invalid config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[display("Backup '{_0}' not found in configuration")]
    UnknownBackup(#[error(ignore)] String),
    #[display("Unknown action type '{_0}'")]
    UnknownAction(#[error(ignore)] String),
    #[display("Invalid action descriptor: {_0}")]
    InvalidDescriptor(toml::de::Error),
    #[display("Invalid '{action}' config: {source}")]
    InvalidAction {
        action: String,
        source: toml::de::Error,
    },
    #[display("Required parameter '{key}' not specified in '{action}' config")]
    MissingKey { action: String, key: String },
}

/// Placeholder for actions whose keys fit into a single struct.
#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct NoKeys {}

#[derive(serde::Deserialize)]
struct Split<A, B> {
    #[serde(flatten)]
    first: A,
    #[serde(flatten)]
    second: B,
    #[serde(flatten)]
    unrecognised: toml::Table,
}

/// Deserializes an action's keys into two typed parts.
///
/// Missing required keys fail, unrecognised keys are only warned about.
pub(crate) fn parse_action_config<A, B>(
    action: &str,
    table: toml::Table,
) -> Result<(A, B), ConfigError>
where
    A: DeserializeOwned,
    B: DeserializeOwned,
{
    log::debug!(target: "config", "Initialising '{action}' action");
    let split: Split<A, B> =
        toml::Value::Table(table)
            .try_into()
            .map_err(|source| ConfigError::InvalidAction {
                action: action.to_string(),
                source,
            })?;

    for key in split.unrecognised.keys() {
        log::warn!(target: "config", "Ignoring unrecognised parameter '{key}' in '{action}' config");
    }
    Ok((split.first, split.second))
}
