//! Reporting of backup progress to logs and registrars.
//!
//! Reporters are fire-and-forget: their methods don't return errors and a
//! failing reporter never aborts a backup.

use std::fmt;

use crate::actions::Errors;

mod state;

pub use state::StateFileRegistrar;

/// Whether a backup is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Outdated,
    UpToDate,
    Unknown,
}

impl Freshness {
    /// Combines the answers of two reporters; a definite answer wins over
    /// [`Freshness::Unknown`] and [`Freshness::Outdated`] wins over
    /// [`Freshness::UpToDate`].
    pub fn or(self, other: Freshness) -> Freshness {
        match (self, other) {
            (Self::Outdated, _) | (_, Self::Outdated) => Self::Outdated,
            (Self::UpToDate, _) | (_, Self::UpToDate) => Self::UpToDate,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Outdated => "outdated",
            Self::UpToDate => "up to date",
            Self::Unknown => "unknown",
        })
    }
}

/// Receiver of backup lifecycle events.
#[allow(unused_variables)]
pub trait Reporter {
    fn start_backup(&self, name: &str, description: Option<&str>) {}

    fn finish_backup(&self, name: &str, errors: &Errors) {}

    fn start_verify(&self, name: &str, description: Option<&str>) {}

    fn finish_verify(&self, name: &str, errors: &Errors) {}

    fn start_action(&self, id: usize, description: &str) {}

    fn finish_action(&self, id: usize, errors: &Errors) {}

    fn is_backup_outdated(&self, name: &str) -> Freshness {
        Freshness::Unknown
    }
}

/// Reports lifecycle events as log messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl LogReporter {
    fn outcome(what: &str, errors: &Errors) {
        if errors.is_empty() {
            log::info!(target: "report", "{what} completed without errors");
        } else {
            log::info!(target: "report", "{} error(s) encountered during {}", errors.len(), what.to_lowercase());
        }
    }
}

impl Reporter for LogReporter {
    fn start_backup(&self, name: &str, description: Option<&str>) {
        match description.filter(|d| !d.is_empty()) {
            Some(description) => log::info!(target: "report", "Starting backup '{description}'"),
            None => log::info!(target: "report", "Starting backup '{name}'"),
        }
    }

    fn finish_backup(&self, _name: &str, errors: &Errors) {
        Self::outcome("Backup", errors);
    }

    fn start_verify(&self, name: &str, description: Option<&str>) {
        match description.filter(|d| !d.is_empty()) {
            Some(description) => log::info!(target: "report", "Starting verification '{description}'"),
            None => log::info!(target: "report", "Starting verification '{name}'"),
        }
    }

    fn finish_verify(&self, _name: &str, errors: &Errors) {
        Self::outcome("Verification", errors);
    }

    fn start_action(&self, _id: usize, description: &str) {
        log::info!(target: "report", "Starting action '{description}'");
    }

    fn finish_action(&self, _id: usize, errors: &Errors) {
        Self::outcome("Action", errors);
    }
}

/// Forwards every event to all contained reporters.
#[derive(Default)]
pub struct Reporters {
    reporters: Vec<Box<dyn Reporter>>,
}

impl Reporters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, reporter: impl Reporter + 'static) -> &mut Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    fn each(&self, f: impl Fn(&dyn Reporter)) {
        self.reporters.iter().for_each(|reporter| f(reporter.as_ref()));
    }
}

impl Reporter for Reporters {
    fn start_backup(&self, name: &str, description: Option<&str>) {
        self.each(|r| r.start_backup(name, description));
    }

    fn finish_backup(&self, name: &str, errors: &Errors) {
        self.each(|r| r.finish_backup(name, errors));
    }

    fn start_verify(&self, name: &str, description: Option<&str>) {
        self.each(|r| r.start_verify(name, description));
    }

    fn finish_verify(&self, name: &str, errors: &Errors) {
        self.each(|r| r.finish_verify(name, errors));
    }

    fn start_action(&self, id: usize, description: &str) {
        self.each(|r| r.start_action(id, description));
    }

    fn finish_action(&self, id: usize, errors: &Errors) {
        self.each(|r| r.finish_action(id, errors));
    }

    fn is_backup_outdated(&self, name: &str) -> Freshness {
        self.reporters
            .iter()
            .fold(Freshness::Unknown, |freshness, reporter| {
                freshness.or(reporter.is_backup_outdated(name))
            })
    }
}
