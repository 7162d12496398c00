//! VFS configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) gives a working setup:
//!
//! ```toml
//! mount_root = "/mnt"
//! device_root = "/dev"
//! name_prefix_len = 3
//! autorun = false
//! autorun_names = ["autorun", "autorun.lua", ".autorun"]
//! excluded_addresses = ["boot-disk-address"]
//! leak_cleanup = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Mount naming, autorun and stream cleanup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Directory under which filesystem providers are auto-mounted.
    pub mount_root: String,

    /// Directory under which raw block (`drive`) providers are auto-mounted.
    pub device_root: String,

    /// Initial number of address characters used for a mount name.
    pub name_prefix_len: usize,

    /// Initial value of the autorun flag.
    pub autorun: bool,

    /// Script names tried, in order, at a new mount point.
    pub autorun_names: Vec<String>,

    /// Provider addresses never auto-mounted (boot disk, tmpfs).
    pub excluded_addresses: Vec<String>,

    /// Close leaked streams on a later scheduler tick.
    pub leak_cleanup: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            mount_root: "/mnt".to_string(),
            device_root: "/dev".to_string(),
            name_prefix_len: 3,
            autorun: false,
            autorun_names: vec![
                "autorun".to_string(),
                "autorun.lua".to_string(),
                ".autorun".to_string(),
            ],
            excluded_addresses: Vec::new(),
            leak_cleanup: true,
        }
    }
}

impl VfsConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Check invariants serde can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name_prefix_len == 0 {
            return Err(ConfigError::Invalid("name_prefix_len must be at least 1".into()));
        }
        for (field, root) in [("mount_root", &self.mount_root), ("device_root", &self.device_root)] {
            if !root.starts_with('/') {
                return Err(ConfigError::Invalid(format!("{field} must be absolute: {root}")));
            }
        }
        Ok(())
    }

    /// Returns true if the address must not be auto-mounted.
    pub fn is_excluded(&self, address: &str) -> bool {
        self.excluded_addresses.iter().any(|a| a == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = VfsConfig::from_toml_str("").unwrap();
        assert_eq!(config, VfsConfig::default());
        assert_eq!(config.mount_root, "/mnt");
        assert_eq!(config.name_prefix_len, 3);
        assert!(config.leak_cleanup);
    }

    #[test]
    fn test_partial_override() {
        let config = VfsConfig::from_toml_str(
            r#"
            autorun = true
            excluded_addresses = ["boot"]
            "#,
        )
        .unwrap();
        assert!(config.autorun);
        assert!(config.is_excluded("boot"));
        assert!(!config.is_excluded("other"));
        assert_eq!(config.device_root, "/dev");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            VfsConfig::from_toml_str("name_prefix_len = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            VfsConfig::from_toml_str("mount_root = \"mnt\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            VfsConfig::from_toml_str("autorun = \"yes\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vfs.toml");
        std::fs::write(&path, "mount_root = \"/media\"\n").unwrap();
        assert_eq!(VfsConfig::load(&path).unwrap().mount_root, "/media");
        assert!(matches!(
            VfsConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
