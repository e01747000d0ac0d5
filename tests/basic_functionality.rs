//! Basic functionality tests to ensure the build is working

use clipkeep::config::Config;
use clipkeep::history::{HistoryItem, StoreOptions};

#[test]
fn test_version() {
    assert_eq!(clipkeep::VERSION, env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(!config.history.database.as_os_str().is_empty());
}

#[test]
fn test_store_options_follow_config() {
    let mut config = Config::default();
    config.history.max_items = 42;
    config.shortcuts.pin_characters = "xyz".to_string();

    let options = StoreOptions::from_config(&config);
    assert_eq!(options.max_items, 42);
    assert_eq!(options.pin_characters, vec!['x', 'y', 'z']);
}

#[test]
fn test_error_conversion() {
    let id = HistoryItem::from_text("x").id;
    let error: clipkeep::Error = clipkeep::history::HistoryError::NotFound(id).into();
    assert!(error.to_string().contains(&id.to_string()));
}
