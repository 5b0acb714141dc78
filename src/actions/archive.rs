//! Archive actions: stream the output of an archiving program into a file.
//!
//! The produced pipeline has up to three stages:
//!
//! 1. the archiving program, run in a container and/or over `ssh` on the
//!    source host, optionally compressed on the source host,
//! 2. an optional local compression program,
//! 3. `ssh <destination-host> 'cat > <destination-file>.tmp'` if the
//!    destination is remote; otherwise the output goes into the local
//!    `<destination-file>.tmp`.
//!
//! Preparing writes the temporary file, committing rotates it into place and
//! rolling back removes it.

use serde::de::DeserializeOwned;

use super::{run_pipeline, Action, ActionError, Capability, Errors};
use crate::config::{parse_action_config, ConfigError};
use crate::process::{shell_quote, CommandLine, FileTarget, Pipeline};
use crate::util::{rotate_file, UserAtHost};

/// Suffix of the file an archive is written to before rotation.
pub const TMP_SUFFIX: &str = ".tmp";

const CAPABILITIES: &[Capability] = &[
    Capability::Prepare,
    Capability::Commit,
    Capability::Rollback,
    Capability::Verify,
];

/// Keys shared by all archive actions.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchiveConfig {
    /// File the archive is rotated into.
    pub destination_file: String,

    /// Host the archiving program runs on, reached via `ssh`.
    #[serde(default)]
    pub source_host: Option<String>,

    /// `[user@]container` the archiving program runs in, via `docker exec`.
    #[serde(default)]
    pub source_container: Option<UserAtHost>,

    /// Shell command compressing on the source host, e.g. `gzip`.
    #[serde(default)]
    pub source_compression: Option<String>,

    /// Compression program run locally.
    #[serde(default)]
    pub compression: Option<String>,

    /// Host the destination file lives on, reached via `ssh`.
    #[serde(default)]
    pub destination_host: Option<String>,

    /// Shell command compressing on the destination host.
    #[serde(default)]
    pub destination_compression: Option<String>,

    /// Number of older archives to keep as `<destination-file>.<n>`.
    #[serde(default)]
    pub keep: u32,
}

/// The program producing the archive of an [`Archive`] action.
pub trait ArchiveSource: DeserializeOwned {
    /// Configuration discriminator of the action.
    const KIND: &'static str;

    /// Fills in defaults before the configuration is parsed.
    fn defaults(_table: &mut toml::Table) {}

    /// Checks constraints spanning the shared and the source specific keys.
    fn check(&self, _config: &ArchiveConfig) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Command writing the archive to its standard output.
    fn archive_command(&self) -> CommandLine;

    /// Commands run in the source context before the archive is created.
    fn pre_archive_commands(&self) -> Vec<CommandLine> {
        Vec::new()
    }

    /// Commands run in the source context after the archive was created,
    /// whether that succeeded or not.
    fn post_archive_commands(&self) -> Vec<CommandLine> {
        Vec::new()
    }
}

/// Archive action producing its archive with `S`.
#[derive(Debug, Clone)]
pub struct Archive<S> {
    config: ArchiveConfig,
    source: S,
}

impl<S: ArchiveSource> Archive<S> {
    pub fn from_config(mut table: toml::Table) -> Result<Self, ConfigError> {
        S::defaults(&mut table);
        let (config, source): (ArchiveConfig, S) = parse_action_config(S::KIND, table)?;
        source.check(&config)?;
        Ok(Self { config, source })
    }

    fn destination_target(&self) -> FileTarget {
        FileTarget::from_host(self.config.destination_host.as_deref())
    }

    fn tmp_file(&self) -> String {
        format!("{}{TMP_SUFFIX}", self.config.destination_file)
    }

    /// Wraps `command` into the container and the remote shell of the source.
    ///
    /// The container is the innermost context, the remote shell the outermost.
    fn wrap_source(&self, command: CommandLine, compress: bool) -> CommandLine {
        let mut command = command;

        if let Some(container) = &self.config.source_container {
            let mut docker = vec!["docker".to_string(), "exec".to_string()];
            if let Some(user) = &container.user {
                docker.extend(["--user".to_string(), user.clone()]);
            }
            docker.push(container.host.clone());
            match command {
                CommandLine::Args(args) => docker.extend(args),
                CommandLine::Shell(shell) => docker.extend(["sh".to_string(), "-c".to_string(), shell]),
            }
            command = CommandLine::Args(docker);
        }

        if let Some(host) = &self.config.source_host {
            let mut remote = command.to_shell_string();
            if let Some(compression) = self.config.source_compression.as_ref().filter(|_| compress) {
                remote.push_str(&format!(" | {compression}"));
            }
            command = CommandLine::new(["ssh".to_string(), host.clone(), remote]);
        }

        command
    }

    fn compression_command(&self) -> Option<CommandLine> {
        let config = &self.config;
        let compression = if config.compression.is_some() {
            config.compression.as_deref()
        } else if config.source_host.is_none() && config.source_compression.is_some() {
            config.source_compression.as_deref()
        } else if config.destination_host.is_none() && config.destination_compression.is_some() {
            config.destination_compression.as_deref()
        } else {
            None
        };
        compression.map(|compression| CommandLine::new(compression.split_whitespace()))
    }

    fn destination_command(&self) -> Option<CommandLine> {
        let host = self.config.destination_host.as_ref()?;
        let mut remote = String::from("cat");
        if let Some(compression) = &self.config.destination_compression {
            remote.push_str(&format!(" | {compression}"));
        }
        remote.push_str(&format!(" > {}", shell_quote(&self.tmp_file())));
        Some(CommandLine::new(["ssh".to_string(), host.clone(), remote]))
    }

    /// Pipeline writing the archive into the temporary destination file.
    pub fn archive_pipeline(&self) -> Pipeline {
        let mut stages = vec![self.wrap_source(self.source.archive_command(), true)];
        stages.extend(self.compression_command());
        let destination = self.destination_command();
        let local_destination = destination.is_none();
        stages.extend(destination);

        let pipeline = Pipeline::new(stages);
        if local_destination {
            pipeline.with_output(self.tmp_file())
        } else {
            pipeline
        }
    }

    fn run_source_commands(&self, commands: Vec<CommandLine>, dry_run: bool) -> Errors {
        commands
            .into_iter()
            .flat_map(|command| {
                run_pipeline(&Pipeline::single(self.wrap_source(command, false)), dry_run)
            })
            .collect()
    }
}

impl<S: ArchiveSource> Action for Archive<S> {
    fn kind(&self) -> &'static str {
        S::KIND
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn prepare(&self, dry_run: bool) -> Errors {
        log::debug!(target: "action::archive", "Executing '{}' action", S::KIND);

        let mut errors = self.run_source_commands(self.source.pre_archive_commands(), dry_run);
        if errors.is_empty() {
            errors.extend(run_pipeline(&self.archive_pipeline(), dry_run));
        } else {
            log::error!(target: "action::archive", "Not archiving, preparatory commands failed");
        }
        errors.extend(self.run_source_commands(self.source.post_archive_commands(), dry_run));
        errors
    }

    fn commit(&self, dry_run: bool) -> Errors {
        match rotate_file(
            &self.destination_target(),
            &self.config.destination_file,
            TMP_SUFFIX,
            self.config.keep,
            dry_run,
        ) {
            Ok(()) => Vec::new(),
            Err(e) => {
                log::error!(target: "action::archive", "{e}");
                vec![e.into()]
            }
        }
    }

    fn rollback(&self, dry_run: bool) -> Errors {
        let target = self.destination_target();
        let tmp_file = self.tmp_file();
        if dry_run {
            log::info!(target: "action::archive", "Dry run, would remove '{tmp_file}' on {target}");
            return Vec::new();
        }

        log::debug!(target: "action::archive", "Removing temporary file '{tmp_file}' on {target}");
        let removed = target.is_file(&tmp_file).and_then(|exists| {
            if exists {
                target.remove_file(&tmp_file)
            } else {
                Ok(())
            }
        });
        match removed {
            Ok(()) => Vec::new(),
            Err(source) => vec![ActionError::Io {
                context: format!("Unable to remove temporary file '{tmp_file}' on {target}"),
                source,
            }],
        }
    }

    fn verify(&self, dry_run: bool) -> Errors {
        let target = self.destination_target();
        let file = &self.config.destination_file;
        if dry_run {
            log::info!(target: "action::archive", "Dry run, would check that '{file}' exists on {target}");
            return Vec::new();
        }

        match target.is_file(file) {
            Ok(true) => Vec::new(),
            Ok(false) => vec![ActionError::MissingFile {
                file: file.clone(),
                target: target.to_string(),
            }],
            Err(source) => vec![ActionError::Io {
                context: format!("Unable to check '{file}' on {target}"),
                source,
            }],
        }
    }
}

/// `tar` archive of a directory.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Files {
    pub source_directory: String,
    #[serde(default)]
    pub one_file_system: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Restrict `tar` to options supported by minimal implementations.
    #[serde(default)]
    pub minimalistic_tar: bool,
}

impl Files {
    pub(crate) fn tar_command(&self) -> CommandLine {
        let full = !self.minimalistic_tar;
        let mut tar = vec![
            "tar".to_string(),
            format!("--directory={}", self.source_directory),
            "--create".to_string(),
            "--numeric-owner".to_string(),
        ];
        if full {
            tar.extend(["--acls".to_string(), "--xattrs".to_string()]);
        }
        if self.one_file_system {
            tar.push("--one-file-system".to_string());
        }
        if full {
            tar.push("--sort=name".to_string());
        }
        if self.follow_symlinks && full {
            tar.push("--dereference".to_string());
        }
        tar.extend(self.excludes.iter().map(|exclude| format!("--exclude={exclude}")));
        tar.extend(["--file=-".to_string(), ".".to_string()]);
        CommandLine::Args(tar)
    }
}

impl ArchiveSource for Files {
    const KIND: &'static str = "ArchiveFiles";

    fn archive_command(&self) -> CommandLine {
        self.tar_command()
    }
}

/// `pg_dump` of a PostgreSQL database.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PostgreSql {
    /// `[user@]database`
    pub source_database: UserAtHost,
}

impl ArchiveSource for PostgreSql {
    const KIND: &'static str = "ArchivePostgreSQL";

    fn archive_command(&self) -> CommandLine {
        let mut pg_dump = vec!["pg_dump".to_string(), self.source_database.host.clone()];
        if let Some(user) = &self.source_database.user {
            pg_dump.push(format!("--username={user}"));
        }
        CommandLine::Args(pg_dump)
    }
}

/// `mysqldump` of a MySQL or MariaDB database.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MySql {
    /// `[user@]database`
    pub source_database: UserAtHost,
}

impl ArchiveSource for MySql {
    const KIND: &'static str = "ArchiveMySQL";

    fn archive_command(&self) -> CommandLine {
        let mut mysqldump = vec![
            "mysqldump".to_string(),
            "--opt".to_string(),
            "--single-transaction".to_string(),
        ];
        if let Some(user) = &self.source_database.user {
            mysqldump.push(format!("--user={user}"));
        }
        mysqldump.push(self.source_database.host.clone());
        CommandLine::Args(mysqldump)
    }
}

pub type ArchiveFiles = Archive<Files>;
pub type ArchivePostgreSQL = Archive<PostgreSql>;
pub type ArchiveMySQL = Archive<MySql>;
