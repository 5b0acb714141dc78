//! Actions: configured units of work performed during a backup.
//!
//! Currently the following actions are implemented:
//!
//! - [ArchiveFiles](archive::ArchiveFiles): `tar` archive of a directory.
//! - [ArchivePostgreSQL](archive::ArchivePostgreSQL): `pg_dump` of a database.
//! - [ArchiveMySQL](archive::ArchiveMySQL): `mysqldump` of a database.
//! - [ArchiveMinecraftServerJavaEdition](minecraft::ArchiveMinecraftServerJavaEdition):
//!   archive of a Minecraft server container with saving paused.
//! - [RsyncFiles](rsync::RsyncFiles): `rsync` of a directory.
//! - [UpdateGitAnnex](repositories::UpdateGitAnnex): `git annex sync` and `get`.

use std::fmt;
use std::io;

use derive_more::{Error, From};

use crate::process::{Pipeline, PipelineError, PipelineOutput};
use crate::util::RotationError;

pub mod archive;
pub mod minecraft;
pub mod registry;
pub mod repositories;
pub mod rsync;

pub use registry::{ActionEntry, ActionRegistry};

/// Errors accumulated by an action. Empty means success.
pub type Errors = Vec<ActionError>;

/// Operations an action may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Capability {
    #[display("do")]
    Do,
    #[display("prepare")]
    Prepare,
    #[display("commit")]
    Commit,
    #[display("rollback")]
    Rollback,
    #[display("verify")]
    Verify,
}

/// Capabilities an action needs to take part in an all-or-nothing group.
pub const TRANSACTIONAL: [Capability; 3] =
    [Capability::Prepare, Capability::Commit, Capability::Rollback];

/// A configured unit of work.
///
/// Implementations override the operations listed in
/// [`capabilities`](Action::capabilities); every other operation fails with
/// [`ActionError::Unsupported`] without side effects.
///
/// # Dry Run
///
/// On a dry run (`dry_run=true`) no process is started and no file is
/// altered. Instead everything that would be executed is logged.
pub trait Action {
    /// Configuration discriminator of the action.
    fn kind(&self) -> &'static str;

    /// Operations implemented by the action.
    fn capabilities(&self) -> &'static [Capability];

    /// Additional attempts after a failed first one, unless configured.
    fn default_retries(&self) -> u32 {
        0
    }

    fn is_transactional(&self) -> bool {
        TRANSACTIONAL
            .iter()
            .all(|capability| self.capabilities().contains(capability))
    }

    /// Whether `capability` can be invoked. Transactional actions always
    /// support [`Capability::Do`].
    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
            || (capability == Capability::Do && self.is_transactional())
    }

    /// Performs the action.
    ///
    /// For transactional actions this prepares, then commits if preparing
    /// succeeded or rolls back otherwise.
    fn perform(&self, dry_run: bool) -> Errors {
        if !self.is_transactional() {
            return vec![ActionError::unsupported(self.kind(), Capability::Do)];
        }

        let errors = self.prepare(dry_run);
        if errors.is_empty() {
            self.commit(dry_run)
        } else {
            for error in self.rollback(dry_run) {
                log::error!(target: "action", "Rollback of '{}' failed: {error}", self.kind());
            }
            errors
        }
    }

    fn prepare(&self, _dry_run: bool) -> Errors {
        vec![ActionError::unsupported(self.kind(), Capability::Prepare)]
    }

    fn commit(&self, _dry_run: bool) -> Errors {
        vec![ActionError::unsupported(self.kind(), Capability::Commit)]
    }

    fn rollback(&self, _dry_run: bool) -> Errors {
        vec![ActionError::unsupported(self.kind(), Capability::Rollback)]
    }

    fn verify(&self, _dry_run: bool) -> Errors {
        vec![ActionError::unsupported(self.kind(), Capability::Verify)]
    }
}

/// Failure of an action.
#[derive(Debug, Error, From)]
pub enum ActionError {
    /// The pipeline couldn't be run at all, e.g. a program doesn't exist.
    #[from]
    Process(PipelineError),
    /// A process exited unsuccessfully.
    ProcessExit {
        program: String,
        code: Option<i32>,
        stderr: Vec<String>,
    },
    #[from]
    Rotation(RotationError),
    /// The invoked operation isn't implemented by the action.
    Unsupported {
        action: &'static str,
        capability: Capability,
    },
    /// A file expected to exist is missing.
    MissingFile {
        file: String,
        target: String,
    },
    Io {
        context: String,
        source: io::Error,
    },
}

impl ActionError {
    pub fn unsupported(action: &'static str, capability: Capability) -> Self {
        Self::Unsupported { action, capability }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(e) => write!(f, "{e}"),
            Self::ProcessExit {
                program,
                code,
                stderr,
            } => {
                match code {
                    Some(code) => write!(f, "Subprocess '{program}' exited with error code {code}")?,
                    None => write!(f, "Subprocess '{program}' was terminated by a signal")?,
                }
                if stderr.is_empty() {
                    f.write_str(" (no stderr output available)")
                } else {
                    write!(f, ": {}", stderr.join("\n"))
                }
            }
            Self::Rotation(e) => write!(f, "{e}"),
            Self::Unsupported { action, capability } => {
                write!(f, "'{action}' action doesn't support '{capability}' command")
            }
            Self::MissingFile { file, target } => {
                write!(f, "File '{file}' doesn't exist on {target}")
            }
            Self::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

/// Runs `pipeline` and collects an error for every unsuccessful stage.
///
/// On a dry run the pipeline is only described.
pub(crate) fn run_pipeline(pipeline: &Pipeline, dry_run: bool) -> Errors {
    if dry_run {
        log::info!(target: "action", "Dry run, would execute: {pipeline}");
        return Vec::new();
    }

    log::debug!(target: "action", "Executing: {pipeline}");
    match pipeline.run() {
        Ok(output) => stage_errors(&output),
        Err(e) => {
            log::error!(target: "action", "{e}");
            vec![e.into()]
        }
    }
}

/// Logs the result of every stage and turns failed ones into errors.
pub(crate) fn stage_errors(output: &PipelineOutput) -> Errors {
    output
        .stages
        .iter()
        .filter_map(|stage| {
            if stage.success() {
                log::debug!(target: "action", "Subprocess '{}' exited successfully", stage.program);
                return None;
            }
            let error = ActionError::ProcessExit {
                program: stage.program.clone(),
                code: stage.exit_code,
                stderr: stage.stderr_lines(),
            };
            log::error!(target: "action", "{error}");
            Some(error)
        })
        .collect()
}
