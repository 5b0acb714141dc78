//! Updates of [git-annex] repositories.
//!
//! [git-annex]: https://git-annex.branchable.com/

use super::{run_pipeline, Action, Capability, Errors};
use crate::config::{parse_action_config, ConfigError, NoKeys};
use crate::process::{shell_quote, CommandLine, FileTarget, Pipeline};

const KIND: &str = "UpdateGitAnnex";

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitAnnexConfig {
    /// Repository to update.
    pub destination_directory: String,
    #[serde(default)]
    pub destination_host: Option<String>,
    /// Remotes to sync with; all remotes if empty.
    #[serde(default)]
    pub remotes: Vec<String>,
}

/// Syncs a git-annex repository with its remotes and fetches wanted content.
#[derive(Debug, Clone)]
pub struct UpdateGitAnnex {
    config: GitAnnexConfig,
}

impl UpdateGitAnnex {
    pub fn from_config(table: toml::Table) -> Result<Self, ConfigError> {
        let (config, NoKeys {}) = parse_action_config(KIND, table)?;
        Ok(Self { config })
    }

    /// Runs `git annex <args>` inside the repository.
    fn in_repository(&self, args: Vec<String>) -> Pipeline {
        let mut git_annex = vec!["git".to_string(), "annex".to_string()];
        git_annex.extend(args);
        let command = CommandLine::Args(git_annex);

        match &self.config.destination_host {
            Some(host) => {
                let remote = format!(
                    "cd {} && {}",
                    shell_quote(&self.config.destination_directory),
                    command.to_shell_string()
                );
                Pipeline::single(FileTarget::remote(host.clone()).wrap(CommandLine::shell(remote)))
            }
            None => Pipeline::single(command).with_working_dir(&self.config.destination_directory),
        }
    }

    pub fn sync_pipeline(&self) -> Pipeline {
        let mut args = vec![
            "sync".to_string(),
            "--no-resolvemerge".to_string(),
            "--no-content".to_string(),
        ];
        args.extend(self.config.remotes.iter().cloned());
        self.in_repository(args)
    }

    pub fn get_pipeline(&self) -> Pipeline {
        self.in_repository(vec!["get".to_string(), "--auto".to_string()])
    }
}

impl Action for UpdateGitAnnex {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Do]
    }

    fn default_retries(&self) -> u32 {
        1
    }

    fn perform(&self, dry_run: bool) -> Errors {
        log::debug!(target: "action::git-annex", "Executing '{KIND}' action");

        let errors = run_pipeline(&self.sync_pipeline(), dry_run);
        if !errors.is_empty() {
            log::error!(target: "action::git-annex", "Not getting content, sync failed");
            return errors;
        }
        run_pipeline(&self.get_pipeline(), dry_run)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn annex(content: &str) -> UpdateGitAnnex {
        UpdateGitAnnex::from_config(toml::from_str(content).unwrap()).unwrap()
    }

    #[test]
    fn local_repository_uses_working_directory() {
        let action = annex(
            r#"
            destination-directory = "/srv/annex"
            remotes = ["origin", "nas"]
            "#,
        );

        let sync = action.sync_pipeline();

        assert_eq!(sync.working_dir(), Some(Path::new("/srv/annex")));
        assert_eq!(
            sync.stages(),
            &[CommandLine::new([
                "git",
                "annex",
                "sync",
                "--no-resolvemerge",
                "--no-content",
                "origin",
                "nas"
            ])]
        );
    }

    #[test]
    fn remote_repository_changes_directory_in_shell() {
        let action = annex(
            r#"
            destination-directory = "/srv/my annex"
            destination-host = "nas"
            "#,
        );

        let get = action.get_pipeline();

        assert_eq!(get.working_dir(), None);
        assert_eq!(
            get.stages(),
            &[CommandLine::new([
                "ssh",
                "nas",
                "cd '/srv/my annex' && git annex get --auto"
            ])]
        );
    }

    #[test]
    fn failed_sync_skips_get() {
        let action = annex("destination-directory = \"/nonexistent/annex/repository\"");

        // Starting in a missing directory fails before git runs; only one error.
        assert_eq!(action.perform(false).len(), 1);
        assert!(action.perform(true).is_empty());
    }
}
