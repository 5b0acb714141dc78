use std::collections::HashMap;
use std::process::ExitCode;

use bsts_lib::actions::ActionRegistry;
use bsts_lib::backup::Backup;
use bsts_lib::cli::{Cli, Command, DoArgs, VerifyArgs};
use bsts_lib::config::{ConfigError, Configuration};
use bsts_lib::report::{Freshness, LogReporter, Reporter, Reporters, StateFileRegistrar};

use chrono::TimeDelta;
use clap::Parser;

const EXECUTION_FAILED: u8 = 1;
const INVALID_CONFIG: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    if let Err(e) = env_logger.try_init() {
        eprintln!("Initialising the logger failed: {e}");
    }

    let config = match Configuration::load(&cli.config) {
        Ok(config) => config,
        Err(e) => return config_error(&e),
    };

    match cli.command {
        Command::List => {
            for (name, backup) in &config.backups {
                match &backup.description {
                    Some(description) => println!("{name}\t{description}"),
                    None => println!("{name}"),
                }
            }
            ExitCode::SUCCESS
        }
        Command::Status => {
            let reporters = reporters(&config, true);
            for name in config.backups.keys() {
                println!("{name}\t{}", reporters.is_backup_outdated(name));
            }
            ExitCode::SUCCESS
        }
        Command::Show { backup } => {
            let backup = match config.backup(&backup) {
                Ok(backup) => backup,
                Err(e) => return config_error(&e),
            };
            match toml::to_string_pretty(backup) {
                Ok(content) => {
                    print!("{content}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    log::error!("Printing the configuration failed: {e}");
                    ExitCode::from(EXECUTION_FAILED)
                }
            }
        }
        Command::Do(DoArgs {
            backup,
            auto,
            dry_run,
        }) => {
            let backup = match build_backup(&config, &backup) {
                Ok(backup) => backup,
                Err(e) => return config_error(&e),
            };
            if dry_run {
                log::warn!("Running in dry-run mode");
            }
            let reporters = reporters(&config, dry_run);

            if auto {
                let freshness = reporters.is_backup_outdated(backup.name());
                if freshness == Freshness::UpToDate {
                    log::info!("Backup '{}' is up to date, skipping", backup.name());
                    return ExitCode::SUCCESS;
                }
                log::debug!("Backup '{}' is {freshness}", backup.name());
            }

            outcome(&backup.run(&reporters, dry_run))
        }
        Command::Verify(VerifyArgs { backup, dry_run }) => {
            let backup = match build_backup(&config, &backup) {
                Ok(backup) => backup,
                Err(e) => return config_error(&e),
            };
            outcome(&backup.verify(&reporters(&config, true), dry_run))
        }
    }
}

fn build_backup(config: &Configuration, name: &str) -> Result<Backup, ConfigError> {
    let registry = ActionRegistry::with_builtin_actions();
    Backup::from_config(name, config.backup(name)?, &registry)
}

/// Reporters of a run. A read-only registrar only answers freshness queries.
fn reporters(config: &Configuration, read_only: bool) -> Reporters {
    let mut reporters = Reporters::new();
    reporters.add(LogReporter);

    if let Some(registrar) = &config.registrar {
        let intervals: HashMap<_, _> = config
            .backups
            .iter()
            .filter_map(|(name, backup)| {
                let hours = i64::try_from(backup.interval_hours?).ok()?;
                Some((name.clone(), TimeDelta::try_hours(hours)?))
            })
            .collect();
        let registrar = StateFileRegistrar::new(&registrar.state_file, intervals);
        if read_only {
            reporters.add(ReadOnly(registrar));
        } else {
            reporters.add(registrar);
        }
    }
    reporters
}

/// Answers freshness queries without recording anything.
struct ReadOnly(StateFileRegistrar);

impl Reporter for ReadOnly {
    fn is_backup_outdated(&self, name: &str) -> Freshness {
        self.0.is_backup_outdated(name)
    }
}

fn config_error(e: &ConfigError) -> ExitCode {
    log::error!("{e}");
    ExitCode::from(INVALID_CONFIG)
}

fn outcome(errors: &[bsts_lib::actions::ActionError]) -> ExitCode {
    if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        for error in errors {
            log::error!("{error}");
        }
        ExitCode::from(EXECUTION_FAILED)
    }
}
