//! Container metadata section

use serde::{Deserialize, Serialize};

/// Descriptive data stored alongside the records
///
/// Encoded with named fields so later builds can add fields without
/// breaking older readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Name shown to players in save listings
    #[serde(default)]
    pub display_name: String,
    /// Build that wrote the container
    #[serde(default)]
    pub build_version: String,
    /// Content features (DLC, mods) the save depends on
    #[serde(default)]
    pub content_features: Vec<String>,
}

impl ContainerMetadata {
    /// Metadata with a display name
    pub fn named(display_name: impl Into<String>) -> Self {
        ContainerMetadata {
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Set the build version
    pub fn with_build_version(mut self, version: impl Into<String>) -> Self {
        self.build_version = version.into();
        self
    }

    /// Add a required content feature
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.content_features.push(feature.into());
        self
    }

    /// Whether every field is empty
    pub fn is_empty(&self) -> bool {
        self.display_name.is_empty()
            && self.build_version.is_empty()
            && self.content_features.is_empty()
    }
}
