use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Configuration file of all backups.
    #[arg(long, short = 'c', env = "BSTS_CONFIG", default_value = "bsts.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the configured backups.
    List,
    /// Show whether the configured backups are due.
    Status,
    /// Print the configuration of a backup.
    Show {
        /// Name of the backup.
        backup: String,
    },
    /// Run a backup.
    Do(DoArgs),
    /// Check the results of a backup.
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
pub struct DoArgs {
    /// Name of the backup.
    pub backup: String,

    /// Only run the backup if it is outdated.
    #[arg(long)]
    pub auto: bool,

    /// Log what would be executed instead of executing it.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Name of the backup.
    pub backup: String,

    /// Log what would be checked instead of checking it.
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_do_flags() {
        let cli = Cli::try_parse_from(["bsts", "-c", "/etc/bsts.toml", "do", "home", "--auto", "--dry-run"])
            .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/bsts.toml"));
        let Command::Do(args) = cli.command else {
            panic!("expected do command");
        };
        assert_eq!(args.backup, "home");
        assert!(args.auto);
        assert!(args.dry_run);
    }

    #[test]
    fn backup_name_is_required() {
        assert!(Cli::try_parse_from(["bsts", "show"]).is_err());
    }
}
