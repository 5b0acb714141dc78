//! Library to compose backups from external tools.
//!
//! A backup is a named, ordered list of [actions](actions) such as `tar`
//! archives, database dumps, `rsync` mirrors or `git annex` updates. Actions
//! run as pipelines of external processes (see [`process`]) and finished
//! archives are rotated into place (see [`util::rotate_file`]). The
//! [`backup`] module runs the actions of a backup with retries and
//! all-or-nothing groups.

#![forbid(unsafe_code)]

pub mod actions;
pub mod backup;
pub mod cli;
pub mod config;
pub mod process;
pub mod report;
pub mod util;
