//! Integration tests for mbpoll-common library.

use mbpoll_common::{Error, LogFormat, LoggingConfig, load_config};
use serde::Deserialize;
use std::io::Write;
use tempfile::NamedTempFile;

#[derive(Debug, Deserialize)]
struct FileConfig {
    name: String,
    #[serde(default)]
    logging: LoggingConfig,
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".json5")
        .tempfile()
        .expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

#[test]
fn test_load_config_from_file() {
    let file = config_file(
        r#"{
            // comments are allowed in JSON5
            name: "plant-a",
            logging: { level: "warn", format: "json" },
        }"#,
    );

    let config: FileConfig = load_config(file.path()).expect("load failed");
    assert_eq!(config.name, "plant-a");
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_load_config_missing_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("mbpoll.json5");

    let result: mbpoll_common::Result<FileConfig> = load_config(&path);
    match result {
        Err(Error::Config(msg)) => assert!(msg.contains("Failed to read config file")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_load_config_invalid_content() {
    let file = config_file("{ name: ");

    let result: mbpoll_common::Result<FileConfig> = load_config(file.path());
    match result {
        Err(Error::Config(msg)) => assert!(msg.contains("Failed to parse config file")),
        other => panic!("expected parse error, got {:?}", other),
    }
}
