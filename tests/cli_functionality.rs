//! Integration tests for the docaiche binary
//!
//! These run the compiled binary against temporary configuration files.
//! Unit tests for argument parsing live in the cli module.

use serde_json::Value;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn docaiche() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_docaiche"));
    command
        .env("RUST_LOG", "off")
        .env_remove("DOCAICHE_DATABASE_URL");
    command
}

#[test]
fn test_show_config_json_masks_secrets() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("config.yaml");
    fs::write(
        &config,
        "app:\n  workers: 3\n\
         ai:\n  primary_provider: openai\n  openai:\n    api_key: sk-live-secret-value\n    model: gpt-4o-mini\n",
    )
    .unwrap();

    let output = docaiche()
        .args(["show-config", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let tree: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(tree["app"]["workers"], 3);
    assert_eq!(tree["ai"]["openai"]["api_key"], "***");
    assert_eq!(tree["ai"]["openai"]["model"], "gpt-4o-mini");
    assert!(!String::from_utf8_lossy(&output.stdout).contains("sk-live-secret-value"));
}

#[test]
fn test_show_config_yaml_output() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("config.yaml");
    fs::write(&config, "redis:\n  host: cache.internal\n").unwrap();

    let output = docaiche()
        .args(["show-config", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());

    let tree: Value = serde_yaml::from_slice(&output.stdout).unwrap();
    assert_eq!(tree["redis"]["host"], "cache.internal");
}

#[test]
fn test_invalid_configuration_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("config.yaml");
    fs::write(&config, "app:\n  workers: 99\n").unwrap();

    let output = docaiche()
        .args(["show-config", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("app.workers"));
}

#[test]
fn test_unknown_provider_rejected() {
    let output = docaiche()
        .args(["test-provider", "nonexistent"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown provider"));
}

#[test]
fn test_set_value_visible_to_show_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("config.yaml");
    fs::write(&config, "app:\n  workers: 2\n").unwrap();
    let database = format!("sqlite://{}", temp_dir.path().join("config.db").display());

    let output = docaiche()
        .args(["set", "redis.db", "3", "--database", &database, "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Stored redis.db"));

    let output = docaiche()
        .env("DOCAICHE_DATABASE_URL", &database)
        .args(["show-config", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let tree: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(tree["redis"]["db"], 3);
    assert_eq!(tree["app"]["workers"], 2);

    // Without a database URL only the file and defaults apply
    let output = docaiche()
        .args(["show-config", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    let tree: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(tree["redis"]["db"], 0);
}

#[test]
fn test_set_without_database_fails() {
    let output = docaiche()
        .args(["set", "redis.db", "3"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("DOCAICHE_DATABASE_URL"));
}
