// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Single-writer journal loop.
//!
//! Admitted and completed events arrive on one ordered queue. After each
//! burst of events the loop writes the whole state to disk once. A failed
//! write disables persistence for the rest of the process; events are still
//! applied so the in-memory state stays correct.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::JournalState;

/// A lifecycle change for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEvent {
    Admitted(u64),
    Completed(u64),
}

/// Sending side of a journal. Cheap to clone.
///
/// The journal task ends, after a final write, once every handle is dropped.
#[derive(Debug, Clone)]
pub struct JournalHandle {
    tx: mpsc::Sender<JournalEvent>,
}

impl JournalHandle {
    pub async fn mark_in_progress(&self, id: u64) {
        self.send(JournalEvent::Admitted(id)).await;
    }

    pub async fn mark_completed(&self, id: u64) {
        self.send(JournalEvent::Completed(id)).await;
    }

    async fn send(&self, event: JournalEvent) {
        if self.tx.send(event).await.is_err() {
            warn!(target: "cart_runner.journal", ?event, "Journal task has stopped, event dropped");
        }
    }
}

/// Start the journal task for the file at `path`, seeded with `state`.
///
/// The returned task resolves to the final state once all handles are gone.
pub fn spawn(
    path: PathBuf,
    state: JournalState,
    capacity: usize,
) -> (JournalHandle, JoinHandle<JournalState>) {
    start(path, state, capacity, None)
}

/// Like [`spawn`], additionally sending a snapshot after every successful write.
pub fn spawn_with_observer(
    path: PathBuf,
    state: JournalState,
    capacity: usize,
    observer: mpsc::UnboundedSender<JournalState>,
) -> (JournalHandle, JoinHandle<JournalState>) {
    start(path, state, capacity, Some(observer))
}

fn start(
    path: PathBuf,
    state: JournalState,
    capacity: usize,
    observer: Option<mpsc::UnboundedSender<JournalState>>,
) -> (JournalHandle, JoinHandle<JournalState>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run(rx, path, state, observer));
    (JournalHandle { tx }, task)
}

async fn run(
    mut rx: mpsc::Receiver<JournalEvent>,
    path: PathBuf,
    mut state: JournalState,
    observer: Option<mpsc::UnboundedSender<JournalState>>,
) -> JournalState {
    let mut persisting = true;

    while let Some(event) = rx.recv().await {
        let mut dirty = state.apply(event);
        while let Ok(event) = rx.try_recv() {
            dirty |= state.apply(event);
        }

        if !dirty || !persisting {
            continue;
        }

        match state.save(&path).await {
            Ok(()) => {
                debug!(
                    target: "cart_runner.journal",
                    path = %path.display(),
                    last_completed_id = state.last_completed_id,
                    in_progress = state.in_progress_ids.len(),
                    "Journal saved"
                );
                if let Some(observer) = &observer {
                    let _ = observer.send(state.clone());
                }
            }
            Err(e) => {
                error!(
                    target: "cart_runner.journal",
                    path = %path.display(),
                    error = %e,
                    "Journal write failed, no further progress will be saved"
                );
                persisting = false;
            }
        }
    }

    state
}
