//! Running a configured backup.
//!
//! A backup is an ordered list of actions. Regular actions run first, each on
//! its own with retries (see [`executor`]). The actions flagged
//! `all-or-nothing` then run together as one transaction (see
//! [`transaction`]).

use crate::actions::{Action, ActionEntry, ActionRegistry, Capability, Errors};
use crate::config::{BackupConfig, ConfigError};
use crate::report::Reporter;

pub mod executor;
pub mod transaction;

pub use executor::execute;
pub use transaction::run_all_or_nothing;

/// A named backup built from its configuration.
#[derive(Debug)]
pub struct Backup {
    name: String,
    description: Option<String>,
    actions: Vec<ActionEntry>,
}

impl Backup {
    pub fn new(name: impl Into<String>, description: Option<String>, actions: Vec<ActionEntry>) -> Self {
        Self {
            name: name.into(),
            description,
            actions,
        }
    }

    /// Builds every action of the backup. The first invalid action descriptor
    /// fails the whole backup.
    pub fn from_config(
        name: &str,
        config: &BackupConfig,
        registry: &ActionRegistry,
    ) -> Result<Self, ConfigError> {
        let actions = config
            .actions
            .iter()
            .map(|descriptor| registry.build(descriptor))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(name, config.description.clone(), actions))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Runs all actions and returns the errors of every one of them.
    pub fn run(&self, reporter: &dyn Reporter, dry_run: bool) -> Errors {
        reporter.start_backup(&self.name, self.description());

        let (group, regular): (Vec<_>, Vec<_>) = self
            .actions
            .iter()
            .enumerate()
            .partition(|(_, entry)| entry.all_or_nothing);

        let mut errors = Errors::new();
        for (id, entry) in regular {
            reporter.start_action(id, entry.label());
            let action_errors = execute(entry.action.as_ref(), entry.retries, dry_run);
            reporter.finish_action(id, &action_errors);
            errors.extend(action_errors);
        }

        if !group.is_empty() {
            log::info!(
                target: "backup",
                "Running {} action(s) of backup '{}' all-or-nothing",
                group.len(),
                self.name
            );
            for (id, entry) in &group {
                reporter.start_action(*id, entry.label());
            }
            let actions: Vec<&dyn Action> = group
                .iter()
                .map(|(_, entry)| entry.action.as_ref())
                .collect();
            let group_errors = run_all_or_nothing(&actions, dry_run);
            for (id, _) in &group {
                reporter.finish_action(*id, &group_errors);
            }
            errors.extend(group_errors);
        }

        reporter.finish_backup(&self.name, &errors);
        errors
    }

    /// Verifies the result of every action supporting verification.
    pub fn verify(&self, reporter: &dyn Reporter, dry_run: bool) -> Errors {
        reporter.start_verify(&self.name, self.description());

        let mut errors = Errors::new();
        for (id, entry) in self.actions.iter().enumerate() {
            if !entry.action.supports(Capability::Verify) {
                log::debug!(target: "backup", "'{}' can't be verified, skipping", entry.label());
                continue;
            }
            reporter.start_action(id, entry.label());
            let action_errors = entry.action.verify(dry_run);
            reporter.finish_action(id, &action_errors);
            errors.extend(action_errors);
        }

        reporter.finish_verify(&self.name, &errors);
        errors
    }
}
