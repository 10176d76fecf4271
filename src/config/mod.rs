// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Configuration module for cart-runner
//!
//! [`RunnerConfig`] is built once at startup from the command line and the
//! keys file, then handed to each component's constructor.

pub mod secrets;

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::error::{Result, RunnerError};

pub use secrets::Secrets;

/// Path the webhook is served on.
pub const WEBHOOK_PATH: &str = "/webhook";

/// Settings for the emulator runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// Emulator executable.
    pub emulator: PathBuf,
    /// Where generated cart files are written; the emulator runs here.
    pub work_dir: PathBuf,
    /// Where the emulator drops its recordings.
    pub artifact_dir: PathBuf,
    /// Hard limit for a single run.
    pub timeout: Duration,
}

/// Retry policy for throttled API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Retry ceiling; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(20),
            max_retries: None,
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub secrets: Secrets,
    /// Maximum number of items processed concurrently.
    pub concurrency: usize,
    /// Public hostname of the webhook.
    pub webhook_domain: String,
    /// Account activity environment name.
    pub env_name: String,
    pub log_file: Option<PathBuf>,
    pub journal_dir: PathBuf,
    pub bind_addr: String,
    pub render: RenderConfig,
    pub retry: RetryPolicy,
    /// Delay before reconnecting the mention stream.
    pub reconnect_delay: Duration,
}

impl RunnerConfig {
    /// Build the configuration from parsed arguments, reading the keys file.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let secrets = Secrets::load(&cli.keys_file)?;
        Self::from_parts(cli, secrets)
    }

    /// Build the configuration from parsed arguments and already-loaded secrets.
    pub fn from_parts(cli: &Cli, secrets: Secrets) -> Result<Self> {
        let emulator = match &cli.emulator {
            Some(path) => path.clone(),
            None => default_emulator_path()?,
        };
        let artifact_dir = match &cli.artifact_dir {
            Some(path) => path.clone(),
            None => default_artifact_dir()?,
        };

        let config = Self {
            secrets,
            concurrency: cli.concurrency,
            webhook_domain: cli.webhook_domain.trim().to_string(),
            env_name: cli.env_name.trim().to_string(),
            log_file: cli.log_file.clone(),
            journal_dir: cli.journal_dir.clone(),
            bind_addr: cli.bind.clone(),
            render: RenderConfig {
                emulator,
                work_dir: cli.work_dir.clone(),
                artifact_dir,
                timeout: Duration::from_secs(cli.render_timeout_secs),
            },
            retry: RetryPolicy {
                backoff: Duration::from_secs(cli.rate_limit_backoff_secs),
                max_retries: cli.max_retries,
            },
            reconnect_delay: Duration::from_secs(cli.reconnect_delay_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that clap cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(RunnerError::Config(
                "number of concurrent cart handlers must be > 0".to_string(),
            ));
        }
        if self.webhook_domain.is_empty() {
            return Err(RunnerError::Config(
                "webhook domain must not be empty".to_string(),
            ));
        }
        if self.env_name.is_empty() {
            return Err(RunnerError::Config(
                "webhook environment name must not be empty".to_string(),
            ));
        }
        if self.render.timeout.is_zero() {
            return Err(RunnerError::Config(
                "render timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Public URL the platform delivers webhook events to.
    pub fn webhook_url(&self) -> String {
        format!("https://{}{}", self.webhook_domain, WEBHOOK_PATH)
    }

    /// Journal file for mention processing.
    pub fn mentions_journal_path(&self) -> PathBuf {
        self.journal_dir.join("mentions.journal.json")
    }

    /// Journal file for direct message processing.
    pub fn direct_messages_journal_path(&self) -> PathBuf {
        self.journal_dir.join("direct_messages.journal.json")
    }
}

/// Bundled emulator location for the current platform.
pub fn default_emulator_path() -> Result<PathBuf> {
    let path = match (std::env::consts::OS, std::env::consts::ARCH) {
        ("macos", _) => "./PICO-8.app/Contents/MacOS/pico8",
        ("linux", "x86_64") => "./pico-8-linux/pico8",
        ("linux", "arm") | ("linux", "aarch64") => "./pico-8-rpi/pico8",
        (os, arch) => {
            return Err(RunnerError::Config(format!(
                "no bundled emulator for {}/{}; pass --emulator",
                os, arch
            )))
        }
    };
    Ok(PathBuf::from(path))
}

/// The emulator saves recordings to the user's desktop.
pub fn default_artifact_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join("Desktop"))
        .ok_or_else(|| RunnerError::Config("Could not find home directory".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn secrets() -> Secrets {
        Secrets::parse("k\ns\nt\nts").unwrap()
    }

    fn cli(extra: &[&str]) -> Cli {
        let mut args = vec![
            "cart-runner",
            "keys.txt",
            "4",
            "bot.example.com",
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
    fn test_defaults() {
        let config = RunnerConfig::from_parts(&cli(&[]), secrets()).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.render.timeout, Duration::from_secs(30));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.render.emulator, PathBuf::from("/opt/pico8"));
    }

    #[test]
    fn test_webhook_url() {
        let config = RunnerConfig::from_parts(&cli(&[]), secrets()).unwrap();
        assert_eq!(config.webhook_url(), "https://bot.example.com/webhook");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut parsed = cli(&[]);
        parsed.concurrency = 0;
        let err = RunnerConfig::from_parts(&parsed, secrets()).unwrap_err();
        assert!(err.to_string().contains("must be > 0"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = RunnerConfig::from_parts(&cli(&["--render-timeout-secs", "0"]), secrets())
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_retry_overrides() {
        let config = RunnerConfig::from_parts(
            &cli(&["--rate-limit-backoff-secs", "1", "--max-retries", "3"]),
            secrets(),
        )
        .unwrap();
        assert_eq!(config.retry.backoff, Duration::from_secs(1));
        assert_eq!(config.retry.max_retries, Some(3));
    }

    #[test]
    fn test_journal_paths() {
        let config =
            RunnerConfig::from_parts(&cli(&["--journal-dir", "/var/lib/carts"]), secrets())
                .unwrap();
        assert_eq!(
            config.mentions_journal_path(),
            PathBuf::from("/var/lib/carts/mentions.journal.json")
        );
        assert_eq!(
            config.direct_messages_journal_path(),
            PathBuf::from("/var/lib/carts/direct_messages.journal.json")
        );
    }
}
