use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use super::{shell_quote, CommandLine, Pipeline};

/// Exit code `ssh` uses for its own failures, as opposed to the remote command's.
const SSH_FAILURE: i32 = 255;

/// Program reaching remote hosts.
pub const REMOTE_SHELL: &str = "ssh";

/// Where files of an action live: on this machine or behind a remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTarget {
    Local,
    Remote {
        host: String,
        /// Remote shell invocation, called with the host and the flattened command appended.
        shell: Vec<String>,
    },
}

impl FileTarget {
    /// `host` reached via [`REMOTE_SHELL`].
    pub fn remote(host: impl Into<String>) -> Self {
        Self::remote_with_shell(host, [REMOTE_SHELL])
    }

    pub fn remote_with_shell<I, S>(host: impl Into<String>, shell: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Remote {
            host: host.into(),
            shell: shell.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_host(host: Option<&str>) -> Self {
        match host {
            Some(host) => Self::remote(host),
            None => Self::Local,
        }
    }

    /// Wraps `command` to run on the target.
    pub fn wrap(&self, command: CommandLine) -> CommandLine {
        match self {
            Self::Local => command,
            Self::Remote { host, shell } => {
                let mut args = shell.clone();
                args.push(host.clone());
                args.push(command.to_shell_string());
                CommandLine::Args(args)
            }
        }
    }

    pub fn is_file(&self, path: &str) -> io::Result<bool> {
        match self {
            Self::Local => Ok(Path::new(path).is_file()),
            Self::Remote { .. } => {
                let code = self.run_remote(&format!("test -f {}", shell_quote(path)))?;
                match code {
                    Some(0) => Ok(true),
                    Some(SSH_FAILURE) | None => Err(io::Error::other(format!(
                        "remote shell failed while checking '{path}' on {self}"
                    ))),
                    Some(_) => Ok(false),
                }
            }
        }
    }

    pub fn remove_file(&self, path: &str) -> io::Result<()> {
        match self {
            Self::Local => fs::remove_file(path),
            Self::Remote { .. } => {
                let code = self.run_remote(&format!("rm {}", shell_quote(path)))?;
                expect_success(code, || format!("rm {path}"))
            }
        }
    }

    /// Renames `from` to `to`, replacing `to` if it exists.
    pub fn rename_file(&self, from: &str, to: &str) -> io::Result<()> {
        match self {
            Self::Local => fs::rename(from, to),
            Self::Remote { .. } => {
                let code = self.run_remote(&format!(
                    "mv {} {}",
                    shell_quote(from),
                    shell_quote(to)
                ))?;
                expect_success(code, || format!("mv {from} {to}"))
            }
        }
    }

    fn run_remote(&self, command: &str) -> io::Result<Option<i32>> {
        let command = self.wrap(CommandLine::shell(command));
        let output = Pipeline::single(command)
            .run()
            .map_err(io::Error::other)?;
        let stage = output.first().ok_or_else(|| io::Error::other("empty pipeline"))?;
        for line in stage.stderr.lines() {
            log::debug!(target: "process::target", "{self}: {line}");
        }
        Ok(stage.exit_code)
    }
}

fn expect_success(code: Option<i32>, describe: impl FnOnce() -> String) -> io::Result<()> {
    match code {
        Some(0) => Ok(()),
        Some(code) => Err(io::Error::other(format!(
            "'{}' exited with code {code}",
            describe()
        ))),
        None => Err(io::Error::other(format!(
            "'{}' was terminated by a signal",
            describe()
        ))),
    }
}

impl fmt::Display for FileTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("localhost"),
            Self::Remote { host, .. } => f.write_str(host),
        }
    }
}
