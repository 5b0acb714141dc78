//! Composition and execution of external process pipelines.
//!
//! A [`Pipeline`] wires the standard output of every stage into the standard
//! input of the next one, like `tar | gzip | ssh host 'cat > file'` in a shell.
//! Every stage's standard error is drained on its own thread so that no stage
//! stalls on a full stderr pipe while the rest of the pipeline still flows.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::thread;

use derive_more::{Display, Error};

pub mod target;

pub use target::FileTarget;

/// A single stage of a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Program followed by its arguments, executed without a shell.
    Args(Vec<String>),
    /// A string interpreted by `sh -c`.
    Shell(String),
}

impl CommandLine {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Args(args.into_iter().map(Into::into).collect())
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell(command.into())
    }

    /// Name of the executed program, used in log and error messages.
    pub fn program(&self) -> &str {
        match self {
            Self::Args(args) => args.first().map(String::as_str).unwrap_or_default(),
            Self::Shell(_) => "sh",
        }
    }

    /// Flattens the command into a single string a remote shell can interpret.
    pub fn to_shell_string(&self) -> String {
        match self {
            Self::Args(args) => args
                .iter()
                .map(|arg| shell_quote(arg))
                .collect::<Vec<_>>()
                .join(" "),
            Self::Shell(command) => command.clone(),
        }
    }

    fn to_command(&self) -> Command {
        match self {
            Self::Args(args) => {
                let mut command = Command::new(self.program());
                command.args(args.iter().skip(1));
                command
            }
            Self::Shell(shell) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(shell);
                command
            }
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Args(_) => f.write_str(&self.to_shell_string()),
            Self::Shell(command) => write!(f, "sh -c {}", shell_quote(command)),
        }
    }
}

/// Quotes `arg` for a POSIX shell if it contains anything but safe characters.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Ordered sequence of [`CommandLine`]s forming one logical operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<CommandLine>,
    output: Option<PathBuf>,
    working_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(stages: Vec<CommandLine>) -> Self {
        Self {
            stages,
            output: None,
            working_dir: None,
        }
    }

    pub fn single(command: CommandLine) -> Self {
        Self::new(vec![command])
    }

    /// Redirects the standard output of the last stage into `path`.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Runs every stage in `dir`.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stages(&self) -> &[CommandLine] {
        &self.stages
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Starts all stages and blocks until every one of them exited.
    ///
    /// Non-zero exit codes are returned as data in [`PipelineOutput`]; only a
    /// failure to create the output file or to start a stage is an error.
    pub fn run(&self) -> Result<PipelineOutput, PipelineError> {
        log::trace!(target: "process", "Running: {self}");

        // Opened before any stage starts, closed after every stage exited.
        let output_file = match &self.output {
            Some(path) => Some(File::create(path).map_err(|source| {
                PipelineError::OutputFile {
                    path: path.clone(),
                    source,
                }
            })?),
            None => None,
        };

        let mut children: Vec<Child> = Vec::with_capacity(self.stages.len());
        let mut stderrs: Vec<Option<ChildStderr>> = Vec::with_capacity(self.stages.len());
        let last = self.stages.len().saturating_sub(1);

        for (index, stage) in self.stages.iter().enumerate() {
            let mut command = stage.to_command();
            if let Some(dir) = &self.working_dir {
                command.current_dir(dir);
            }

            let stdin = match children.last_mut().and_then(|child| child.stdout.take()) {
                Some(previous) => Stdio::from(previous),
                None => Stdio::null(),
            };
            let stdout = match (&output_file, index == last) {
                (Some(file), true) => match file.try_clone() {
                    Ok(file) => Stdio::from(file),
                    Err(source) => {
                        abort(children);
                        return Err(PipelineError::OutputFile {
                            path: self.output.clone().unwrap_or_default(),
                            source,
                        });
                    }
                },
                _ => Stdio::piped(),
            };
            command.stdin(stdin).stdout(stdout).stderr(Stdio::piped());

            match command.spawn() {
                Ok(mut child) => {
                    stderrs.push(child.stderr.take());
                    children.push(child);
                }
                Err(source) => {
                    abort(children);
                    return Err(PipelineError::Start {
                        program: stage.program().to_string(),
                        source,
                    });
                }
            }
        }

        let final_stdout = children.last_mut().and_then(|child| child.stdout.take());

        let stages = thread::scope(|scope| {
            let drains: Vec<_> = stderrs
                .into_iter()
                .map(|stderr| scope.spawn(move || drain(stderr)))
                .collect();

            let stdout = drain(final_stdout);

            let statuses: Vec<_> = children.iter_mut().map(Child::wait).collect();

            let stderrs: Vec<_> = drains
                .into_iter()
                .map(|drain| drain.join().unwrap_or_default())
                .collect();

            self.stages
                .iter()
                .zip(statuses)
                .zip(stderrs)
                .enumerate()
                .map(|(index, ((stage, status), stderr))| {
                    let status = status.map_err(|source| PipelineError::Wait {
                        program: stage.program().to_string(),
                        source,
                    })?;
                    Ok(StageOutput {
                        program: stage.program().to_string(),
                        exit_code: status.code(),
                        stdout: if index == last {
                            stdout.clone()
                        } else {
                            String::new()
                        },
                        stderr,
                    })
                })
                .collect::<Result<Vec<_>, PipelineError>>()
        })?;

        drop(output_file);

        Ok(PipelineOutput { stages })
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dir) = &self.working_dir {
            write!(f, "(in {}) ", dir.display())?;
        }
        let stages = self
            .stages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ");
        f.write_str(&stages)?;
        if let Some(output) = &self.output {
            write!(f, " > {}", output.display())?;
        }
        Ok(())
    }
}

/// Reads a child's stream to the end, lossily decoded.
fn drain(stream: Option<impl Read>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut stream) = stream {
        if let Err(e) = stream.read_to_end(&mut buffer) {
            log::warn!(target: "process", "Reading process output failed: {e}");
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Kills and reaps already started stages of a pipeline that failed to start.
fn abort(children: Vec<Child>) {
    for mut child in children {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Result of a single pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub program: String,
    /// [None] if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output, empty unless this is the last stage and its
    /// output is not redirected to a file.
    pub stdout: String,
    pub stderr: String,
}

impl StageOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lines(&self) -> Vec<String> {
        self.stderr.lines().map(str::to_string).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    pub stages: Vec<StageOutput>,
}

impl PipelineOutput {
    pub fn exit_codes(&self) -> Vec<Option<i32>> {
        self.stages.iter().map(|stage| stage.exit_code).collect()
    }

    pub fn success(&self) -> bool {
        self.stages.iter().all(StageOutput::success)
    }

    pub fn first(&self) -> Option<&StageOutput> {
        self.stages.first()
    }

    pub fn last(&self) -> Option<&StageOutput> {
        self.stages.last()
    }
}

/// Failure of the runner itself, as opposed to a failing stage.
#[derive(Debug, Display, Error)]
pub enum PipelineError {
    /// Executable of a stage could not be started.
    #[display("Unable to start '{program}': {source}")]
    Start { program: String, source: io::Error },
    /// Output file could not be created.
    #[display("Unable to open output file '{}': {source}", path.display())]
    OutputFile { path: PathBuf, source: io::Error },
    /// Waiting for a stage to exit failed.
    #[display("Unable to wait for '{program}': {source}")]
    Wait { program: String, source: io::Error },
}
