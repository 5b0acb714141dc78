//! Generational rotation of backup files.
//!
//! A freshly written `file.tmp` becomes `file`, the previous `file` becomes
//! `file.1`, `file.1` becomes `file.2` and so on, up to `file.<keep>`.

use derive_more::{Display, Error};

use crate::process::FileTarget;

/// Rotation of a backup file failed.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum RotationError {
    /// The freshly written candidate doesn't exist; nothing was renamed.
    #[display("Temporary file '{_0}' doesn't exist, not rotating files")]
    TemporaryFileMissing(#[error(ignore)] String),
    /// Whether the candidate exists couldn't be determined; nothing was renamed.
    #[display("Unable to check whether '{file}' exists, not rotating files: {reason}")]
    Check { file: String, reason: String },
    /// At least one step failed; the remaining steps were still attempted.
    #[display("Unable to rotate file '{file}': {}", failures.join("; "))]
    Incomplete { file: String, failures: Vec<String> },
}

/// Name of generation `number` of `filename`; generation 0 is `filename` itself.
pub fn generation(filename: &str, number: u32) -> String {
    if number == 0 {
        filename.to_string()
    } else {
        format!("{filename}.{number}")
    }
}

/// Rotates `filename` on `target`, keeping `keep` older generations.
///
/// Every step is attempted even if an earlier one failed; a partially
/// applied rotation is reported, not repaired. On a dry run the steps are
/// only described.
pub fn rotate_file(
    target: &FileTarget,
    filename: &str,
    tmp_suffix: &str,
    keep: u32,
    dry_run: bool,
) -> Result<(), RotationError> {
    let tmp_filename = format!("{filename}{tmp_suffix}");

    if dry_run {
        log::info!(target: "rotation", "Dry run, would rotate '{filename}' on {target} keeping {keep} old generation(s):");
        if keep > 0 {
            log::info!(target: "rotation", "  remove {} if it exists", generation(filename, keep));
        }
        for number in (1..=keep).rev() {
            log::info!(
                target: "rotation",
                "  rename {} to {} if it exists",
                generation(filename, number - 1),
                generation(filename, number)
            );
        }
        log::info!(target: "rotation", "  rename {tmp_filename} to {filename}");
        return Ok(());
    }

    log::debug!(target: "rotation", "Rotating '{filename}' on {target}");

    match target.is_file(&tmp_filename) {
        Ok(true) => {}
        Ok(false) => return Err(RotationError::TemporaryFileMissing(tmp_filename)),
        Err(e) => {
            log::error!(target: "rotation", "Checking '{tmp_filename}' failed: {e}");
            return Err(RotationError::Check {
                file: tmp_filename,
                reason: e.to_string(),
            });
        }
    }

    let mut failures = Vec::new();
    let mut record = |step: String, result: std::io::Result<()>| {
        if let Err(e) = result {
            log::error!(target: "rotation", "{step} failed: {e}");
            failures.push(format!("{step}: {e}"));
        }
    };

    if keep > 0 {
        let oldest = generation(filename, keep);
        match target.is_file(&oldest) {
            Ok(true) => {
                log::debug!(target: "rotation", "Removing {oldest}");
                record(format!("Removing {oldest}"), target.remove_file(&oldest));
            }
            Ok(false) => {}
            Err(e) => record(format!("Checking {oldest}"), Err(e)),
        }
    }

    for number in (1..=keep).rev() {
        let from = generation(filename, number - 1);
        let to = generation(filename, number);
        match target.is_file(&from) {
            Ok(true) => {
                log::debug!(target: "rotation", "Renaming {from} to {to}");
                record(
                    format!("Renaming {from} to {to}"),
                    target.rename_file(&from, &to),
                );
            }
            Ok(false) => {}
            Err(e) => record(format!("Checking {from}"), Err(e)),
        }
    }

    log::debug!(target: "rotation", "Renaming {tmp_filename} to {filename}");
    record(
        format!("Renaming {tmp_filename} to {filename}"),
        target.rename_file(&tmp_filename, filename),
    );

    if failures.is_empty() {
        Ok(())
    } else {
        Err(RotationError::Incomplete {
            file: filename.to_string(),
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn read(dir: &Path, name: &str) -> Option<String> {
        fs::read_to_string(dir.join(name)).ok()
    }

    fn base(dir: &Path) -> String {
        dir.join("archive.tar").to_str().unwrap().to_string()
    }

    #[test]
    fn shifts_all_generations() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();
        write(dir, "archive.tar.tmp", "new");
        write(dir, "archive.tar", "gen0");
        write(dir, "archive.tar.1", "gen1");
        write(dir, "archive.tar.2", "gen2");
        write(dir, "archive.tar.3", "gen3");

        rotate_file(&FileTarget::Local, &base(dir), ".tmp", 3, false).unwrap();

        assert_eq!(read(dir, "archive.tar").as_deref(), Some("new"));
        assert_eq!(read(dir, "archive.tar.1").as_deref(), Some("gen0"));
        assert_eq!(read(dir, "archive.tar.2").as_deref(), Some("gen1"));
        assert_eq!(read(dir, "archive.tar.3").as_deref(), Some("gen2"));
        assert_eq!(read(dir, "archive.tar.4"), None);
        assert_eq!(read(dir, "archive.tar.tmp"), None);
    }

    #[test]
    fn fills_gaps_without_complaining() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();
        write(dir, "archive.tar.tmp", "new");
        write(dir, "archive.tar", "gen0");

        rotate_file(&FileTarget::Local, &base(dir), ".tmp", 2, false).unwrap();

        assert_eq!(read(dir, "archive.tar").as_deref(), Some("new"));
        assert_eq!(read(dir, "archive.tar.1").as_deref(), Some("gen0"));
        assert_eq!(read(dir, "archive.tar.2"), None);
    }

    #[test]
    fn keep_zero_only_replaces_base() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();
        write(dir, "archive.tar.tmp", "new");
        write(dir, "archive.tar", "old");
        write(dir, "archive.tar.1", "untouched");

        rotate_file(&FileTarget::Local, &base(dir), ".tmp", 0, false).unwrap();

        assert_eq!(read(dir, "archive.tar").as_deref(), Some("new"));
        assert_eq!(read(dir, "archive.tar.1").as_deref(), Some("untouched"));
        assert_eq!(read(dir, "archive.tar.tmp"), None);
    }

    #[test]
    fn missing_temporary_file_fails_without_renames() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();
        write(dir, "archive.tar", "gen0");
        write(dir, "archive.tar.1", "gen1");

        let err = rotate_file(&FileTarget::Local, &base(dir), ".tmp", 2, false).unwrap_err();

        assert!(matches!(err, RotationError::TemporaryFileMissing(_)));
        assert_eq!(read(dir, "archive.tar").as_deref(), Some("gen0"));
        assert_eq!(read(dir, "archive.tar.1").as_deref(), Some("gen1"));
        assert_eq!(read(dir, "archive.tar.2"), None);
    }

    #[test]
    fn failed_step_does_not_stop_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();
        write(dir, "archive.tar.tmp", "new");
        write(dir, "archive.tar", "gen0");
        // A non-empty directory can't be replaced by the previous archive.
        fs::create_dir(dir.join("archive.tar.1")).unwrap();
        write(dir, "archive.tar.1/blocker", "");

        let err = rotate_file(&FileTarget::Local, &base(dir), ".tmp", 1, false).unwrap_err();

        let RotationError::Incomplete { file, failures } = err else {
            panic!("expected incomplete rotation, got {err:?}");
        };
        assert_eq!(file, base(dir));
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("Renaming"), "{failures:?}");
        assert_eq!(read(dir, "archive.tar").as_deref(), Some("new"));
        assert_eq!(read(dir, "archive.tar.tmp"), None);
        assert!(dir.join("archive.tar.1/blocker").exists());
    }

    #[test]
    fn rotates_on_remote_target() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();
        write(dir, "archive.tar.tmp", "new");
        write(dir, "archive.tar", "gen0");
        write(dir, "archive.tar.1", "gen1");
        let target = FileTarget::remote_with_shell("nas", ["sh", "-c", "exec sh -c \"$2\"", "ssh"]);

        rotate_file(&target, &base(dir), ".tmp", 1, false).unwrap();

        assert_eq!(read(dir, "archive.tar").as_deref(), Some("new"));
        assert_eq!(read(dir, "archive.tar.1").as_deref(), Some("gen0"));
        assert_eq!(read(dir, "archive.tar.2"), None);
    }

    #[test]
    fn unreachable_remote_is_not_a_missing_file() {
        let target = FileTarget::remote_with_shell(
            "nas",
            ["sh", "-c", "echo 'Connection refused' >&2; exit 255", "ssh"],
        );

        let err = rotate_file(&target, "/backup/archive.tar", ".tmp", 2, false).unwrap_err();

        assert!(
            matches!(&err, RotationError::Check { file, .. } if file == "/backup/archive.tar.tmp"),
            "{err:?}"
        );
        assert!(!err.to_string().contains("doesn't exist"));
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();
        write(dir, "archive.tar", "gen0");

        rotate_file(&FileTarget::Local, &base(dir), ".tmp", 2, true).unwrap();

        assert_eq!(read(dir, "archive.tar").as_deref(), Some("gen0"));
        assert_eq!(read(dir, "archive.tar.1"), None);
    }

    #[test]
    fn generation_names() {
        assert_eq!(generation("file", 0), "file");
        assert_eq!(generation("file", 3), "file.3");
    }
}
