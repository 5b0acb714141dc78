//! Synchronisation of a directory with `rsync`.

use super::{run_pipeline, Action, Capability, Errors};
use crate::config::{parse_action_config, ConfigError, NoKeys};
use crate::process::{CommandLine, FileTarget, Pipeline};

const KIND: &str = "RsyncFiles";

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RsyncConfig {
    pub source_directory: String,
    pub destination_directory: String,
    #[serde(default)]
    pub source_host: Option<String>,
    #[serde(default)]
    pub destination_host: Option<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Mirrors a directory, deleting files gone from the source.
///
/// If both hosts are remote, `rsync` runs on the destination host and pulls
/// from the source host.
#[derive(Debug, Clone)]
pub struct RsyncFiles {
    config: RsyncConfig,
}

impl RsyncFiles {
    pub fn from_config(table: toml::Table) -> Result<Self, ConfigError> {
        let (config, NoKeys {}) = parse_action_config(KIND, table)?;
        Ok(Self { config })
    }

    pub fn command(&self) -> CommandLine {
        let config = &self.config;
        let runs_on_destination = config.source_host.is_some() && config.destination_host.is_some();

        let source = match &config.source_host {
            Some(host) => format!("{host}:{}", config.source_directory),
            None => config.source_directory.clone(),
        };
        let destination = match &config.destination_host {
            Some(host) if !runs_on_destination => format!("{host}:{}", config.destination_directory),
            _ => config.destination_directory.clone(),
        };

        let mut rsync = vec![
            "rsync".to_string(),
            "--archive".to_string(),
            "--verbose".to_string(),
            "--timeout=120".to_string(),
            "--delete-after".to_string(),
            "--delete-excluded".to_string(),
        ];
        rsync.extend(config.excludes.iter().map(|exclude| format!("--exclude={exclude}")));
        rsync.extend([source, destination]);

        let command = CommandLine::Args(rsync);
        if runs_on_destination {
            FileTarget::from_host(config.destination_host.as_deref()).wrap(command)
        } else {
            command
        }
    }
}

impl Action for RsyncFiles {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Do]
    }

    fn default_retries(&self) -> u32 {
        2
    }

    fn perform(&self, dry_run: bool) -> Errors {
        log::debug!(target: "action::rsync", "Executing '{KIND}' action");
        run_pipeline(&Pipeline::single(self.command()), dry_run)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::actions::ActionError;

    fn rsync(content: &str) -> RsyncFiles {
        RsyncFiles::from_config(toml::from_str(content).unwrap()).unwrap()
    }

    #[test]
    fn local_to_remote() {
        let action = rsync(
            r#"
            source-directory = "/photos/"
            destination-directory = "/mirror/photos"
            destination-host = "nas"
            excludes = [".thumbnails"]
            "#,
        );

        assert_eq!(
            action.command().to_string(),
            "rsync --archive --verbose --timeout=120 --delete-after --delete-excluded --exclude=.thumbnails /photos/ nas:/mirror/photos"
        );
    }

    #[test]
    fn remote_to_remote_runs_on_destination() {
        let action = rsync(
            r#"
            source-directory = "/photos/"
            source-host = "laptop"
            destination-directory = "/mirror/photos"
            destination-host = "nas"
            "#,
        );

        assert_eq!(
            action.command(),
            CommandLine::new([
                "ssh",
                "nas",
                "rsync --archive --verbose --timeout=120 --delete-after --delete-excluded laptop:/photos/ /mirror/photos"
            ])
        );
    }

    #[test]
    fn only_supports_do() {
        let action = rsync("source-directory = \"/a\"\ndestination-directory = \"/b\"");

        assert!(action.supports(Capability::Do));
        assert!(!action.is_transactional());
        assert!(matches!(
            action.rollback(false).as_slice(),
            [ActionError::Unsupported { .. }]
        ));
        assert_eq!(action.default_retries(), 2);
    }

    #[test]
    fn dry_run_syncs_nothing() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a"), "a").unwrap();
        let destination = tempfile::tempdir().unwrap();

        let mut config = toml::Table::new();
        config.insert(
            "source-directory".into(),
            format!("{}/", source.path().display()).into(),
        );
        config.insert(
            "destination-directory".into(),
            destination.path().to_str().unwrap().into(),
        );
        let action = RsyncFiles::from_config(config).unwrap();

        assert!(action.perform(true).is_empty());
        assert!(!destination.path().join("a").exists());
    }
}
