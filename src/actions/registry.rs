//! Table mapping configuration discriminators to action constructors.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::ConfigError;

use super::archive::{ArchiveFiles, ArchiveMySQL, ArchivePostgreSQL};
use super::minecraft::ArchiveMinecraftServerJavaEdition;
use super::repositories::UpdateGitAnnex;
use super::rsync::RsyncFiles;
use super::Action;

/// Builds an action from its type specific configuration keys.
pub type Constructor = fn(toml::Table) -> Result<Box<dyn Action>, ConfigError>;

/// Registered action types, passed to whoever builds actions from configuration.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl ActionRegistry {
    /// Registry without any action type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of all action types implemented by this crate.
    pub fn with_builtin_actions() -> Self {
        let mut registry = Self::new();
        registry
            .register("ArchiveFiles", |table| Ok(Box::new(ArchiveFiles::from_config(table)?)))
            .register("ArchivePostgreSQL", |table| {
                Ok(Box::new(ArchivePostgreSQL::from_config(table)?))
            })
            .register("ArchiveMySQL", |table| Ok(Box::new(ArchiveMySQL::from_config(table)?)))
            .register("ArchiveMinecraftServerJavaEdition", |table| {
                Ok(Box::new(ArchiveMinecraftServerJavaEdition::from_config(table)?))
            })
            .register("RsyncFiles", |table| Ok(Box::new(RsyncFiles::from_config(table)?)))
            .register("UpdateGitAnnex", |table| {
                Ok(Box::new(UpdateGitAnnex::from_config(table)?))
            });
        registry
    }

    pub fn register(&mut self, kind: &'static str, constructor: Constructor) -> &mut Self {
        self.constructors.insert(kind, constructor);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    /// Builds the action described by `descriptor`.
    pub fn build(&self, descriptor: &toml::Table) -> Result<ActionEntry, ConfigError> {
        let Descriptor {
            action: kind,
            description,
            all_or_nothing,
            retries,
            rest,
        } = toml::Value::Table(descriptor.clone())
            .try_into()
            .map_err(ConfigError::InvalidDescriptor)?;

        let constructor = self
            .constructors
            .get(kind.as_str())
            .ok_or_else(|| ConfigError::UnknownAction(kind.clone()))?;
        let action = constructor(rest)?;
        let retries = retries.unwrap_or_else(|| action.default_retries());

        Ok(ActionEntry {
            kind,
            description,
            all_or_nothing,
            retries,
            action,
        })
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

/// Keys shared by every action descriptor.
#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Descriptor {
    action: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    all_or_nothing: bool,
    #[serde(default)]
    retries: Option<u32>,
    #[serde(flatten)]
    rest: toml::Table,
}

/// An action together with how the backup runs it.
pub struct ActionEntry {
    pub kind: String,
    pub description: Option<String>,
    /// Run as part of the backup's all-or-nothing group.
    pub all_or_nothing: bool,
    /// Additional attempts after a failed first one.
    pub retries: u32,
    pub action: Box<dyn Action>,
}

impl ActionEntry {
    /// Description for log output, falling back to the action type.
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.kind)
    }
}

impl fmt::Debug for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEntry")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("all_or_nothing", &self.all_or_nothing)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(content: &str) -> toml::Table {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn builds_registered_actions() {
        let registry = ActionRegistry::with_builtin_actions();

        let entry = registry
            .build(&descriptor(
                r#"
                action = "RsyncFiles"
                description = "Mirror photos"
                all-or-nothing = false
                source-directory = "/photos"
                destination-directory = "/mirror"
                "#,
            ))
            .unwrap();

        assert_eq!(entry.kind, "RsyncFiles");
        assert_eq!(entry.label(), "Mirror photos");
        assert!(!entry.all_or_nothing);
        assert_eq!(entry.retries, 2);
        assert_eq!(entry.action.kind(), "RsyncFiles");
    }

    #[test]
    fn configured_retries_override_default() {
        let registry = ActionRegistry::with_builtin_actions();

        let entry = registry
            .build(&descriptor(
                r#"
                action = "ArchiveFiles"
                all-or-nothing = true
                retries = 4
                source-directory = "/srv"
                destination-file = "/backup/srv.tar"
                "#,
            ))
            .unwrap();

        assert!(entry.all_or_nothing);
        assert_eq!(entry.retries, 4);
        assert_eq!(entry.label(), "ArchiveFiles");
    }

    #[test]
    fn unknown_action_type() {
        let registry = ActionRegistry::with_builtin_actions();

        let err = registry
            .build(&descriptor("action = \"FormatDisk\""))
            .unwrap_err();

        assert!(matches!(err, ConfigError::UnknownAction(kind) if kind == "FormatDisk"));
    }

    #[test]
    fn missing_discriminator() {
        let registry = ActionRegistry::with_builtin_actions();

        let err = registry
            .build(&descriptor("source-directory = \"/srv\""))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidDescriptor(_)));
    }

    #[test]
    fn empty_registry_knows_nothing() {
        let registry = ActionRegistry::new();

        assert_eq!(registry.kinds().count(), 0);
        assert!(registry
            .build(&descriptor("action = \"RsyncFiles\""))
            .is_err());
    }
}
