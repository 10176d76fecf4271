// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::fmt;
use std::path::Path;

use crate::error::{Result, RunnerError};

/// OAuth credentials for the bot account.
///
/// Loaded from a file with four lines: API key, API secret, access token
/// and access token secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Secrets {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl Secrets {
    /// Load secrets from a keys file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::Config(format!(
                "Could not load keys file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse the keys file contents.
    pub fn parse(content: &str) -> Result<Self> {
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        match lines.as_slice() {
            [consumer_key, consumer_secret, access_token, access_token_secret, ..] => Ok(Self {
                consumer_key: consumer_key.to_string(),
                consumer_secret: consumer_secret.to_string(),
                access_token: access_token.to_string(),
                access_token_secret: access_token_secret.to_string(),
            }),
            _ => Err(RunnerError::Config(format!(
                "Invalid keys file: expected 4 lines, found {}",
                lines.len()
            ))),
        }
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("consumer_key", &"<redacted>")
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}
