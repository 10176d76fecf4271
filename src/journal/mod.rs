// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Work journal
//!
//! Durable record of which items are in flight and the highest id fully
//! processed. One journal exists per inbound channel. The state is owned by
//! a single actor task ([`actor::spawn`]); everything else talks to it through
//! a [`JournalHandle`].

pub mod actor;

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};

pub use actor::{spawn, spawn_with_observer, JournalEvent, JournalHandle};

/// Persisted journal contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalState {
    /// Highest id whose processing has completed.
    #[serde(default)]
    pub last_completed_id: u64,
    /// Ids admitted but not yet completed.
    #[serde(default)]
    pub in_progress_ids: BTreeSet<u64>,
}

impl JournalState {
    /// Apply one event. Returns whether the state changed.
    pub fn apply(&mut self, event: JournalEvent) -> bool {
        match event {
            JournalEvent::Admitted(id) => self.in_progress_ids.insert(id),
            JournalEvent::Completed(id) => {
                let removed = self.in_progress_ids.remove(&id);
                let advanced = id > self.last_completed_id;
                if advanced {
                    self.last_completed_id = id;
                }
                removed || advanced
            }
        }
    }

    /// Whether any progress has ever been recorded.
    pub fn has_watermark(&self) -> bool {
        self.last_completed_id > 0
    }

    pub fn is_in_progress(&self, id: u64) -> bool {
        self.in_progress_ids.contains(&id)
    }

    /// Load state from `path`.
    ///
    /// A missing or empty file is an empty journal. A file that exists but
    /// cannot be parsed is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(RunnerError::Config(format!(
                    "Could not read journal {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            RunnerError::Config(format!(
                "Could not parse journal {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Write state to `path` through a temporary sibling and a rename.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        let temp_path = path.with_extension("json.tmp");

        tokio::fs::write(&temp_path, &json).await.map_err(|e| {
            RunnerError::Journal(format!(
                "Failed to write {}: {}",
                temp_path.display(),
                e
            ))
        })?;
        tokio::fs::rename(&temp_path, path).await.map_err(|e| {
            RunnerError::Journal(format!("Failed to rename journal file: {}", e))
        })?;
        Ok(())
    }
}
