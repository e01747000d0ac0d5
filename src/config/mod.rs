//! Configuration management for ClipKeep
//!
//! This module handles loading, validating, and managing configuration
//! for the history engine. The engine consumes these values; it never
//! writes them back on its own.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::history::{MergePolicy, PinPosition, SortBy};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Clipboard monitoring
    #[serde(default)]
    pub clipboard: ClipboardConfig,

    /// History storage and ordering
    #[serde(default)]
    pub history: HistoryConfig,

    /// Quick-access shortcuts
    #[serde(default)]
    pub shortcuts: ShortcutConfig,

    /// Image previews
    #[serde(default)]
    pub previews: PreviewConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Clipboard monitoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardConfig {
    /// Poll interval of the change counter in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long the self-write guard stays up after the engine writes
    #[serde(default = "default_suppress_ms")]
    pub suppress_ms: u64,

    /// Regular expressions; matching text is not recorded
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Applications whose copies are not recorded
    #[serde(default)]
    pub ignored_applications: Vec<String>,

    /// Skip content that looks like a password, key or token
    #[serde(default)]
    pub ignore_sensitive: bool,
}

/// History configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of unpinned items
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default)]
    pub sort_by: SortBy,

    #[serde(default)]
    pub pin_position: PinPosition,

    #[serde(default)]
    pub merge_policy: MergePolicy,

    /// Collapse whitespace and drop control characters in titles
    #[serde(default = "default_strip_formatting")]
    pub strip_formatting: bool,

    #[serde(default = "default_max_title_length")]
    pub max_title_length: usize,

    /// Path to SQLite database
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

/// Shortcut configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortcutConfig {
    /// Number of numeric shortcuts (`1`..`9`, `0`)
    #[serde(default = "default_shortcut_count")]
    pub count: usize,

    /// Characters available for pins
    #[serde(default = "default_pin_characters")]
    pub pin_characters: String,
}

/// Preview configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Longest edge of the small thumbnail in pixels
    #[serde(default = "default_thumbnail_edge")]
    pub thumbnail_edge: u32,

    /// Longest edge of the large preview in pixels
    #[serde(default = "default_preview_edge")]
    pub preview_edge: u32,
}

// Default value functions
fn default_poll_interval_ms() -> u64 {
    500
}

fn default_suppress_ms() -> u64 {
    300
}

fn default_max_items() -> usize {
    200
}

fn default_strip_formatting() -> bool {
    true
}

fn default_max_title_length() -> usize {
    200
}

fn default_database() -> PathBuf {
    PathBuf::from("~/.local/share/clipkeep/history.db")
}

fn default_shortcut_count() -> usize {
    10
}

fn default_pin_characters() -> String {
    ('a'..='z').collect()
}

fn default_thumbnail_edge() -> u32 {
    64
}

fn default_preview_edge() -> u32 {
    512
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            suppress_ms: default_suppress_ms(),
            ignore_patterns: Vec::new(),
            ignored_applications: Vec::new(),
            ignore_sensitive: false,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            sort_by: SortBy::default(),
            pin_position: PinPosition::default(),
            merge_policy: MergePolicy::default(),
            strip_formatting: default_strip_formatting(),
            max_title_length: default_max_title_length(),
            database: default_database(),
        }
    }
}

impl Default for ShortcutConfig {
    fn default() -> Self {
        Self {
            count: default_shortcut_count(),
            pin_characters: default_pin_characters(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            thumbnail_edge: default_thumbnail_edge(),
            preview_edge: default_preview_edge(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clipboard: ClipboardConfig::default(),
            history: HistoryConfig::default(),
            shortcuts: ShortcutConfig::default(),
            previews: PreviewConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Checks in order:
    /// 1. Path from CLIPKEEP_CONFIG environment variable
    /// 2. ~/.config/clipkeep/config.toml
    /// 3. Falls back to defaults if none exists
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => {
                let mut config = Self::default();
                config.expand_paths();
                Ok(config)
            }
        }
    }

    /// Load configuration with optional custom path
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(toml_str)?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("clipkeep").join("config.toml"))
    }

    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CLIPKEEP_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::default_path().filter(|p| p.exists())
    }

    fn expand_paths(&mut self) {
        self.history.database = expand_path(&self.history.database);
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(50..=10_000).contains(&self.clipboard.poll_interval_ms) {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be between 50 and 10000".to_string(),
            ));
        }

        for pattern in &self.clipboard.ignore_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("invalid ignore pattern '{}': {}", pattern, e))
            })?;
        }

        if !(1..=10_000).contains(&self.history.max_items) {
            return Err(ConfigError::Validation(
                "max_items must be between 1 and 10000".to_string(),
            ));
        }

        if self.history.max_title_length == 0 {
            return Err(ConfigError::Validation(
                "max_title_length must be at least 1".to_string(),
            ));
        }

        if self.shortcuts.count > 10 {
            return Err(ConfigError::Validation(
                "shortcuts.count must not exceed 10".to_string(),
            ));
        }

        let mut pins: Vec<char> = self.shortcuts.pin_characters.chars().collect();
        let total = pins.len();
        pins.sort_unstable();
        pins.dedup();
        if pins.len() != total {
            return Err(ConfigError::Validation(
                "pin_characters must not repeat a character".to_string(),
            ));
        }
        if pins.iter().any(|c| c.is_ascii_digit() || c.is_whitespace()) {
            return Err(ConfigError::Validation(
                "pin_characters must not contain digits or whitespace".to_string(),
            ));
        }

        if self.previews.thumbnail_edge == 0 || self.previews.preview_edge == 0 {
            return Err(ConfigError::Validation(
                "preview edges must be at least 1 pixel".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Write the commented example configuration
    pub fn write_example(path: &Path, force: bool) -> Result<(), ConfigError> {
        if !force && path.exists() {
            return Err(ConfigError::Validation(
                "Config file already exists. Use --force to overwrite.".to_string(),
            ));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::generate_example())?;
        Ok(())
    }

    /// Generate example configuration file
    pub fn generate_example() -> String {
        let config = Config::default();

        format!(
            r#"# ClipKeep Configuration File
# Location: ~/.config/clipkeep/config.toml

# Clipboard monitoring
[clipboard]
# How often the clipboard change counter is polled (milliseconds)
poll_interval_ms = {}
# How long copies made by ClipKeep itself are ignored (milliseconds)
suppress_ms = {}
# Regular expressions; matching text is never recorded
ignore_patterns = []
# Applications whose copies are never recorded
ignored_applications = []
# Skip content that looks like a password, key or token
ignore_sensitive = {}

# History
[history]
# Maximum number of unpinned items
max_items = {}
# last_copied_at, number_of_copies or first_copied_at
sort_by = "last_copied_at"
# top or bottom
pin_position = "top"
# exact, superset or session
merge_policy = "superset"
# Collapse whitespace in titles
strip_formatting = {}
max_title_length = {}
# Path to history database
database = "{}"

# Quick-access shortcuts
[shortcuts]
# Number of numeric shortcuts (1-9, 0)
count = {}
# Characters handed out when pinning
pin_characters = "{}"

# Image previews
[previews]
thumbnail_edge = {}
preview_edge = {}

# Logging level (trace, debug, info, warn, error)
log_level = "{}"
"#,
            config.clipboard.poll_interval_ms,
            config.clipboard.suppress_ms,
            config.clipboard.ignore_sensitive,
            config.history.max_items,
            config.history.strip_formatting,
            config.history.max_title_length,
            config.history.database.display(),
            config.shortcuts.count,
            config.shortcuts.pin_characters,
            config.previews.thumbnail_edge,
            config.previews.preview_edge,
            config.log_level
        )
    }
}

/// Expand tilde in path
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(path_str.as_ref());
    PathBuf::from(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.clipboard.poll_interval_ms, 500);
        assert_eq!(config.history.max_items, 200);
        assert_eq!(config.history.sort_by, SortBy::LastCopiedAt);
        assert_eq!(config.shortcuts.count, 10);
        assert_eq!(config.shortcuts.pin_characters.len(), 26);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let toml_str = r#"
            [clipboard]
            poll_interval_ms = 250

            [history]
            max_items = 50
            sort_by = "number_of_copies"
            pin_position = "bottom"
            merge_policy = "exact"
        "#;

        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.clipboard.poll_interval_ms, 250);
        assert_eq!(config.history.max_items, 50);
        assert_eq!(config.history.sort_by, SortBy::NumberOfCopies);
        assert_eq!(config.history.pin_position, PinPosition::Bottom);
        assert_eq!(config.history.merge_policy, MergePolicy::Exact);
    }

    #[test]
    fn test_validation_poll_interval() {
        let result = Config::from_toml("[clipboard]\npoll_interval_ms = 10");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_bad_pattern() {
        let result = Config::from_toml("[clipboard]\nignore_patterns = [\"(unclosed\"]");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_pin_characters() {
        let repeated = Config::from_toml("[shortcuts]\npin_characters = \"abca\"");
        assert!(matches!(repeated, Err(ConfigError::Validation(_))));

        let digits = Config::from_toml("[shortcuts]\npin_characters = \"ab1\"");
        assert!(matches!(digits, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_tilde_is_expanded() {
        let config = Config::from_toml("[history]\ndatabase = \"~/history.db\"").unwrap();
        assert!(!config.history.database.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.history.max_items = 42;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.history.max_items, 42);
    }

    #[test]
    fn test_generate_example_parses() {
        let example = Config::generate_example();
        assert!(example.contains("ClipKeep Configuration"));

        let parsed = Config::from_toml(&example).unwrap();
        assert_eq!(parsed.history.max_items, 200);
        assert_eq!(parsed.shortcuts.count, 10);
    }

    #[test]
    fn test_write_example_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clipkeep").join("config.toml");

        Config::write_example(&path, false).unwrap();
        assert!(Config::write_example(&path, false).is_err());
        assert!(Config::write_example(&path, true).is_ok());
    }
}
