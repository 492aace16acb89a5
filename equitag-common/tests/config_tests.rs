//! Integration tests for configuration resolution and loading
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate EQUITAG_CONFIG or the working directory are marked
//! with #[serial] to ensure they run sequentially, not in parallel.

use equitag_common::config::{
    load_config, load_toml_config, resolve_config_source, ConfigSource, TomlConfig,
    CONFIG_ENV_VAR,
};
use equitag_common::{Error, IntersectionSpec};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
#[serial]
fn test_cli_argument_wins_over_environment() {
    let dir = TempDir::new().unwrap();
    let cli = write_config(&dir, "cli.toml", "[audit]\nmodel = \"cli\"\n");
    let envp = write_config(&dir, "env.toml", "[audit]\nmodel = \"env\"\n");
    env::set_var(CONFIG_ENV_VAR, &envp);

    let (config, source) = load_config(Some(&cli)).unwrap();
    assert_eq!(config.audit.model, "cli");
    assert_eq!(source, ConfigSource::CommandLine(cli));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_environment_variable_used_without_cli() {
    let dir = TempDir::new().unwrap();
    let envp = write_config(&dir, "env.toml", "[audit]\nmodel = \"env\"\nmin_support = 7\n");
    env::set_var(CONFIG_ENV_VAR, &envp);

    let (config, source) = load_config(None).unwrap();
    assert_eq!(config.audit.model, "env");
    assert_eq!(config.audit.params.min_support, 7);
    assert_eq!(source, ConfigSource::Environment(envp));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_explicit_missing_file_is_missing_input() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let result = load_config(Some(&missing));
    assert!(matches!(result, Err(Error::MissingInput { .. })));
}

#[test]
#[serial]
fn test_working_directory_file_is_picked_up() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    write_config(&dir, "equitag.toml", "[logging]\nlevel = \"debug\"\n");

    let previous = env::current_dir().unwrap();
    env::set_current_dir(dir.path()).unwrap();
    let source = resolve_config_source(None);
    let (config, _) = load_config(None).unwrap();
    env::set_current_dir(previous).unwrap();

    assert!(matches!(source, ConfigSource::WorkingDirectory(_)));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_invalid_parameters_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "bad.toml", "[audit]\nalpha = 1.5\n");

    let result = load_toml_config(&path);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_invalid_toml_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "broken.toml", "[audit\nmodel = 1");

    assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
}

#[test]
fn test_full_config_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "full.toml",
        r#"
[paths]
predictions = "data/predictions_test.csv"
classes = "data/classes.csv"
lexicon = "config/protected_terms.json"
output_dir = "out"

[audit]
model = "logreg"
min_support = 50
base_threshold = 0.4
lambda_fpr = 0.25
namespaces = ["gender", "age"]
intersections = ["gender*age"]

[logging]
level = "warn"
"#,
    );

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.paths.output_dir, std::path::PathBuf::from("out"));
    assert!(config.paths.metadata.is_none());
    assert_eq!(config.audit.params.base_threshold, 0.4);
    assert_eq!(config.audit.params.lambda_precision, 0.0);
    assert_eq!(
        config.audit.params.intersections,
        vec![IntersectionSpec::Explicit(vec!["gender".to_string(), "age".to_string()])]
    );

    let serialized = toml::to_string(&config).unwrap();
    let parsed: TomlConfig = toml::from_str(&serialized).unwrap();
    assert_eq!(parsed, config);
}
