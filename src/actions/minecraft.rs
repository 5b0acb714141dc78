//! Archive of a [Minecraft server] container with world saving paused.
//!
//! [Minecraft server]: https://github.com/itzg/docker-minecraft-server

use super::archive::{Archive, ArchiveConfig, ArchiveSource, Files};
use crate::config::ConfigError;
use crate::process::CommandLine;

/// World directory of the `itzg/minecraft-server` image.
const DEFAULT_SOURCE_DIRECTORY: &str = "/data";

/// Seconds given to the server to flush the world to disk.
const SAVE_GRACE_SECONDS: &str = "5";

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(transparent)]
pub struct MinecraftServer {
    files: Files,
}

impl ArchiveSource for MinecraftServer {
    const KIND: &'static str = "ArchiveMinecraftServerJavaEdition";

    fn defaults(table: &mut toml::Table) {
        if !table.contains_key("source-directory") {
            table.insert("source-directory".into(), DEFAULT_SOURCE_DIRECTORY.into());
        }
    }

    fn check(&self, config: &ArchiveConfig) -> Result<(), ConfigError> {
        if config.source_container.is_none() {
            return Err(ConfigError::MissingKey {
                action: Self::KIND.to_string(),
                key: "source-container".to_string(),
            });
        }
        Ok(())
    }

    fn archive_command(&self) -> CommandLine {
        self.files.tar_command()
    }

    fn pre_archive_commands(&self) -> Vec<CommandLine> {
        vec![
            CommandLine::new(["rcon-cli", "save-off"]),
            CommandLine::new(["rcon-cli", "save-all"]),
            CommandLine::new(["sleep", SAVE_GRACE_SECONDS]),
        ]
    }

    fn post_archive_commands(&self) -> Vec<CommandLine> {
        vec![CommandLine::new(["rcon-cli", "save-on"])]
    }
}

pub type ArchiveMinecraftServerJavaEdition = Archive<MinecraftServer>;
