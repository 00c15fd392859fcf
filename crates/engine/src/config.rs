//! Persistence configuration
//!
//! Controls how loads treat failing records, whether missing entities are
//! spawned, which storage codec containers use, and what metadata every
//! save carries. Configs can be built in code or parsed from TOML:
//!
//! ```toml
//! load_mode = "best_effort"
//! creation_policy = "create_missing"
//! codec = "zstd"
//! sync_directory = true
//!
//! [metadata]
//! display_name = "Autosave"
//! build_version = "1.4.2"
//! ```

use serde::{Deserialize, Serialize};
use starfire_core::{EntityTypeId, Error, MAX_CAPTURE_DEPTH};
use starfire_durability::{get_codec, ContainerMetadata};
use std::path::{Path, PathBuf};

/// How a load treats a record that fails to migrate or restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Abort on the first failing record
    #[default]
    Strict,
    /// Skip the failing record and continue
    BestEffort,
}

/// What a restore does with a record whose entity does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationPolicy {
    /// Spawn the entity through the collection's factory
    #[default]
    CreateMissing,
    /// Only restore onto entities already known by id
    RestoreExistingOnly,
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Failure handling during loads (default: strict)
    pub load_mode: LoadMode,
    /// Creation of missing entities (default: create missing)
    pub creation_policy: CreationPolicy,
    /// Storage codec identifier (default: "identity")
    pub codec: String,
    /// Fsync the parent directory after the rename (default: true)
    pub sync_directory: bool,
    /// Types captured as roots; `None` captures every registered type
    pub persist_types: Option<Vec<EntityTypeId>>,
    /// Directory holding save slots
    pub save_dir: Option<PathBuf>,
    /// Recursion depth before referenced entities are queued (default: 100)
    pub max_capture_depth: usize,
    /// Metadata written into every container
    pub metadata: ContainerMetadata,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            load_mode: LoadMode::Strict,
            creation_policy: CreationPolicy::CreateMissing,
            codec: "identity".to_string(),
            sync_directory: true,
            persist_types: None,
            save_dir: None,
            max_capture_depth: MAX_CAPTURE_DEPTH,
            metadata: ContainerMetadata::default(),
        }
    }
}

impl PersistenceConfig {
    /// Strict loads (default)
    ///
    /// The first failing record aborts the load before any entity is touched.
    pub fn strict() -> Self {
        PersistenceConfig {
            load_mode: LoadMode::Strict,
            ..Default::default()
        }
    }

    /// Best-effort loads
    ///
    /// Failing records are skipped and reported.
    pub fn best_effort() -> Self {
        PersistenceConfig {
            load_mode: LoadMode::BestEffort,
            ..Default::default()
        }
    }

    /// Config for tests
    ///
    /// Skips the directory fsync, which tmpfs and some CI filesystems reject.
    pub fn for_testing() -> Self {
        PersistenceConfig {
            sync_directory: false,
            ..Default::default()
        }
    }

    /// Set load mode
    pub fn with_load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = mode;
        self
    }

    /// Set creation policy
    pub fn with_creation_policy(mut self, policy: CreationPolicy) -> Self {
        self.creation_policy = policy;
        self
    }

    /// Set codec identifier
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    /// Enable or disable the parent directory fsync
    pub fn with_sync_directory(mut self, sync: bool) -> Self {
        self.sync_directory = sync;
        self
    }

    /// Restrict capture roots to the listed types
    pub fn with_persist_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityTypeId>,
    {
        self.persist_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Set the save slot directory
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// Set capture recursion depth
    pub fn with_max_capture_depth(mut self, depth: usize) -> Self {
        self.max_capture_depth = depth;
        self
    }

    /// Set container metadata
    pub fn with_metadata(mut self, metadata: ContainerMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        get_codec(&self.codec).map_err(|e| ConfigError::InvalidCodec(e.to_string()))?;
        if self.max_capture_depth == 0 {
            return Err(ConfigError::InvalidCaptureDepth(self.max_capture_depth));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PersistenceConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Unknown storage codec
    #[error("Invalid codec: {0}")]
    InvalidCodec(String),

    /// Capture depth must be at least one
    #[error("Invalid capture depth: {0}")]
    InvalidCaptureDepth(usize),

    /// TOML could not be read or parsed
    #[error("Config parse error: {0}")]
    Parse(String),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PersistenceConfig::default();
        assert_eq!(config.load_mode, LoadMode::Strict);
        assert_eq!(config.creation_policy, CreationPolicy::CreateMissing);
        assert_eq!(config.codec, "identity");
        assert!(config.sync_directory);
        assert_eq!(config.max_capture_depth, MAX_CAPTURE_DEPTH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert_eq!(PersistenceConfig::strict().load_mode, LoadMode::Strict);
        assert_eq!(PersistenceConfig::best_effort().load_mode, LoadMode::BestEffort);
        assert!(!PersistenceConfig::for_testing().sync_directory);
    }

    #[test]
    fn test_builder_pattern() {
        let config = PersistenceConfig::default()
            .with_load_mode(LoadMode::BestEffort)
            .with_creation_policy(CreationPolicy::RestoreExistingOnly)
            .with_codec("zstd")
            .with_persist_types(["npc", "door"])
            .with_metadata(ContainerMetadata::named("Quicksave"));

        assert_eq!(config.load_mode, LoadMode::BestEffort);
        assert_eq!(config.creation_policy, CreationPolicy::RestoreExistingOnly);
        assert_eq!(config.codec, "zstd");
        assert_eq!(config.persist_types.as_ref().map(|t| t.len()), Some(2));
        assert_eq!(config.metadata.display_name, "Quicksave");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_codec() {
        let config = PersistenceConfig::default().with_codec("lz77");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCodec(_))));
    }

    #[test]
    fn test_validate_zero_depth() {
        let config = PersistenceConfig::default().with_max_capture_depth(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCaptureDepth(0))
        ));
    }

    #[test]
    fn test_from_toml() {
        let config = PersistenceConfig::from_toml_str(
            r#"
            load_mode = "best_effort"
            creation_policy = "restore_existing_only"
            codec = "zstd"
            sync_directory = false

            [metadata]
            display_name = "Autosave"
            build_version = "1.4.2"
            "#,
        )
        .unwrap();

        assert_eq!(config.load_mode, LoadMode::BestEffort);
        assert_eq!(config.creation_policy, CreationPolicy::RestoreExistingOnly);
        assert_eq!(config.codec, "zstd");
        assert!(!config.sync_directory);
        assert_eq!(config.metadata.display_name, "Autosave");
        assert!(config.metadata.content_features.is_empty());
        assert_eq!(config.max_capture_depth, MAX_CAPTURE_DEPTH);
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        assert!(matches!(
            PersistenceConfig::from_toml_str("load_mode = \"sometimes\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            PersistenceConfig::from_toml_str("codec = \"rar\""),
            Err(ConfigError::InvalidCodec(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = PersistenceConfig::best_effort()
            .with_save_dir("/var/saves")
            .with_metadata(ContainerMetadata::named("Slot A").with_feature("dlc1"));
        let text = config.to_toml_string().unwrap();
        let parsed = PersistenceConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_error_into_core_error() {
        let err: Error = ConfigError::InvalidCodec("lz77".into()).into();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
