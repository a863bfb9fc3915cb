//! Integration tests for CLI file handling
//!
//! Tests file I/O for the `switchboard config` and `switchboard
//! validate-routing` subcommands, plus loading saved routing documents from
//! the directory a generated config points at.

use std::fs;
use std::path::Path;
use switchboard::cli::{generate_config_template, validate_routing_file};
use switchboard::config::Config;
use switchboard::error::AppError;
use switchboard::saved_configs::SavedConfigRegistry;
use tempfile::TempDir;

/// Helper to create temporary directory for file operations
fn create_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

// ─────────────────────────────────────────────────────────────────────────────
// Template Content Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_generated_template_creates_valid_config_file() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("config.toml");

    fs::write(&config_path, generate_config_template()).expect("Failed to write template");

    let config =
        Config::from_file(&config_path).expect("Generated template should load as valid Config");

    assert_eq!(config.server.port, 8787);
    assert!(config.provider("openai").is_some());
    assert!(config.saved_configs.dir.is_none());
}

#[test]
fn test_template_has_all_required_sections() {
    let template = generate_config_template();

    for section in [
        "[server]",
        "[retry]",
        "[sticky_session]",
        "[providers.openai]",
        "[guardrails]",
        "[saved_configs]",
        "[observability]",
    ] {
        assert!(template.contains(section), "Missing {}", section);
    }
}

#[test]
fn test_missing_config_file_reports_path() {
    let temp_dir = create_temp_dir();
    let missing = temp_dir.path().join("absent.toml");

    match Config::from_file(&missing) {
        Err(AppError::ConfigFileRead { path, .. }) => assert!(path.ends_with("absent.toml")),
        other => panic!("expected ConfigFileRead, got {:?}", other.map(|_| ())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing Document Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_validate_routing_reports_bad_document() {
    let temp_dir = create_temp_dir();
    let path = temp_dir.path().join("routing.json");
    fs::write(&path, r#"{"strategy": {"mode": "fallback"}, "targets": []}"#).unwrap();

    let err = validate_routing_file(&path).expect_err("empty targets should be rejected");
    assert!(err.to_string().contains("config"), "error should name the node path: {}", err);
}

#[test]
fn test_validate_routing_missing_file() {
    let result = validate_routing_file(Path::new("/nonexistent/routing.json"));
    assert!(matches!(result, Err(AppError::ConfigFileRead { .. })));
}

#[test]
fn test_saved_config_dir_from_config_file() {
    let temp_dir = create_temp_dir();
    let configs = temp_dir.path().join("configs");
    fs::create_dir(&configs).unwrap();
    fs::write(
        configs.join("support-bot.json"),
        r#"{"strategy": {"mode": "fallback"}, "targets": [{"provider": "openai"}, {"provider": "anthropic"}]}"#,
    )
    .unwrap();
    fs::write(configs.join("notes.txt"), "ignored").unwrap();

    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        format!(
            "[server]\nhost = \"127.0.0.1\"\nport = 3000\n\n[saved_configs]\ndir = \"{}\"\n",
            configs.display()
        ),
    )
    .unwrap();

    let config = Config::from_file(&config_path).unwrap();
    let dir = config.saved_configs.dir.as_deref().expect("dir should be set");
    let registry = SavedConfigRegistry::load_dir(dir).unwrap();

    assert_eq!(registry.len(), 1);
    let saved = registry.get("support-bot").expect("slug comes from the file stem");
    assert_eq!(saved.version().len(), 12);
}
