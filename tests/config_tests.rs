// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::time::Duration;

use cart_runner::cli::Cli;
use cart_runner::config::{RunnerConfig, WEBHOOK_PATH};
use cart_runner::RunnerError;
use clap::Parser;
use tempfile::TempDir;

fn write_keys(dir: &TempDir, content: &str) -> String {
    let path = dir.path().join("keys.txt");
    std::fs::write(&path, content).unwrap();
    path.display().to_string()
}

fn cli(keys: &str, extra: &[&str]) -> Cli {
    let mut args = vec![
        "cart-runner",
        keys,
        "3",
        " bot.example.com ",
        "prod",
        "--emulator",
        "/opt/pico8",
        "--artifact-dir",
        "/tmp/desktop",
    ];
    args.extend_from_slice(extra);
    Cli::try_parse_from(args).unwrap()
}

#[test]
fn test_config_from_keys_file() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(&temp, "key\nsecret\ntoken\ntoken_secret\n");
    let config = RunnerConfig::from_cli(&cli(&keys, &[])).unwrap();

    assert_eq!(config.secrets.consumer_secret, "secret");
    assert_eq!(config.webhook_domain, "bot.example.com");
    assert_eq!(
        config.webhook_url(),
        format!("https://bot.example.com{}", WEBHOOK_PATH)
    );
    assert_eq!(config.concurrency, 3);
    assert_eq!(config.retry.backoff, Duration::from_secs(20));
    assert!(config.retry.max_retries.is_none());
}

#[test]
fn test_short_keys_file_is_fatal() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(&temp, "key\nsecret\n");
    let err = RunnerConfig::from_cli(&cli(&keys, &[])).unwrap_err();
    assert!(matches!(err, RunnerError::Config(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_missing_keys_file_is_fatal() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("absent.txt").display().to_string();
    let err = RunnerConfig::from_cli(&cli(&missing, &[])).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_blank_domain_is_rejected() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(&temp, "a\nb\nc\nd\n");
    let parsed = Cli::try_parse_from([
        "cart-runner",
        keys.as_str(),
        "1",
        "  ",
        "prod",
        "--emulator",
        "/opt/pico8",
        "--artifact-dir",
        "/tmp",
    ])
    .unwrap();
    let err = RunnerConfig::from_cli(&parsed).unwrap_err();
    assert!(err.to_string().contains("webhook domain"));
}

#[test]
fn test_render_settings() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(&temp, "a\nb\nc\nd\n");
    let config = RunnerConfig::from_cli(&cli(
        &keys,
        &["--work-dir", "/srv/carts", "--render-timeout-secs", "12"],
    ))
    .unwrap();
    assert_eq!(config.render.work_dir, std::path::PathBuf::from("/srv/carts"));
    assert_eq!(config.render.timeout, Duration::from_secs(12));
}
