// src/config.rs

//! Engine configuration
//!
//! All settings have defaults suited to iOS `.ipa` archives. A TOML file can
//! override any subset of them:
//!
//! ```toml
//! compression_level = 6
//! display_name_key = "CFBundleName"
//! keep_backup = true
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default metadata document marking a component root
pub const DEFAULT_METADATA_FILENAME: &str = "Info.plist";
/// Default key holding a component's identifier
pub const DEFAULT_IDENTIFIER_KEY: &str = "CFBundleIdentifier";
/// Default key holding a component's human-readable name
pub const DEFAULT_DISPLAY_NAME_KEY: &str = "CFBundleDisplayName";

/// Highest deflate level accepted by the archive writer
pub const MAX_COMPRESSION_LEVEL: i64 = 9;

/// Configuration for a collision resolution run
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// File name of the per-component metadata document
    pub metadata_filename: String,
    /// Dictionary key holding the component identifier
    pub identifier_key: String,
    /// Dictionary key holding the display name mirrored on rewrite
    pub display_name_key: String,
    /// Whether to suffix the display name of rewritten components
    pub mirror_display_name: bool,
    /// Bundle directory suffixes recognised as components
    pub component_suffixes: Vec<String>,
    /// Treat metadata documents in unrecognised directories as components
    pub include_unrecognized_bundles: bool,
    /// Deflate level for repacked entries (0..=9)
    pub compression_level: i64,
    /// Directory for backups (defaults to the archive's directory)
    pub backup_dir: Option<PathBuf>,
    /// Keep the backup after a successful run
    pub keep_backup: bool,
    /// Read component metadata in parallel during discovery
    pub parallel_discovery: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metadata_filename: DEFAULT_METADATA_FILENAME.to_string(),
            identifier_key: DEFAULT_IDENTIFIER_KEY.to_string(),
            display_name_key: DEFAULT_DISPLAY_NAME_KEY.to_string(),
            mirror_display_name: true,
            component_suffixes: ["app", "appex", "framework", "xctest"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            include_unrecognized_bundles: false,
            compression_level: MAX_COMPRESSION_LEVEL,
            backup_dir: None,
            keep_backup: false,
            parallel_discovery: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidInput(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::InvalidInput(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_COMPRESSION_LEVEL).contains(&self.compression_level) {
            return Err(Error::InvalidInput(format!(
                "compression_level must be between 0 and {}, got {}",
                MAX_COMPRESSION_LEVEL, self.compression_level
            )));
        }
        if self.metadata_filename.is_empty() || self.metadata_filename.contains('/') {
            return Err(Error::InvalidInput(format!(
                "metadata_filename must be a plain file name, got {:?}",
                self.metadata_filename
            )));
        }
        if self.identifier_key.is_empty() {
            return Err(Error::InvalidInput(
                "identifier_key must not be empty".to_string(),
            ));
        }
        if self.identifier_key == self.display_name_key {
            return Err(Error::InvalidInput(
                "identifier_key and display_name_key must differ".to_string(),
            ));
        }
        Ok(())
    }
}
