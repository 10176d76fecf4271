// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Bounded-concurrency dispatch
//!
//! The [`Dispatcher`] admits [`WorkItem`]s under a counting permit. Every
//! admitted item is journaled as in progress, handed to the [`ItemHandler`]
//! on its own task and journaled as completed once the handler returns,
//! whatever the outcome.

pub mod item;
pub mod pipeline;
pub mod recovery;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::journal::JournalHandle;

pub use item::{classify_direct_message, classify_status, Channel, WorkItem};
pub use pipeline::CartPipeline;

/// Processes one admitted item end to end.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle(&self, item: WorkItem) -> Result<()>;
}

/// One journal per channel.
#[derive(Debug, Clone)]
pub struct Journals {
    pub mentions: JournalHandle,
    pub direct_messages: JournalHandle,
}

impl Journals {
    pub fn for_channel(&self, channel: Channel) -> &JournalHandle {
        match channel {
            Channel::Mention => &self.mentions,
            Channel::DirectMessage => &self.direct_messages,
        }
    }
}

/// Admission control in front of the item handler. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    capacity: u32,
    journals: Journals,
    handler: Arc<dyn ItemHandler>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        concurrency: usize,
        journals: Journals,
        handler: Arc<dyn ItemHandler>,
        cancel: CancellationToken,
    ) -> Self {
        let capacity = concurrency.clamp(1, u32::MAX as usize) as u32;
        Self {
            permits: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            journals,
            handler,
            cancel,
        }
    }

    /// Wait for a permit and start processing `item` in the background.
    ///
    /// Returns `false` if the item was dropped because the process is
    /// shutting down.
    pub async fn dispatch(&self, item: WorkItem) -> bool {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            warn!(
                target: "cart_runner.dispatch",
                channel = %item.channel,
                item_id = item.primary_id,
                "Shutting down, item dropped"
            );
            return false;
        };

        let journal = self.journals.for_channel(item.channel).clone();
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let channel = item.channel;
            let id = item.primary_id;
            journal.mark_in_progress(id).await;
            debug!(target: "cart_runner.dispatch", %channel, item_id = id, "Item admitted");

            // Run on a nested task so a panicking handler still completes the item.
            match tokio::spawn(async move { handler.handle(item).await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(target: "cart_runner.dispatch", %channel, item_id = id, error = %e, "Item failed")
                }
                Err(e) => {
                    error!(target: "cart_runner.dispatch", %channel, item_id = id, error = %e, "Item handler panicked")
                }
            }

            journal.mark_completed(id).await;
            debug!(target: "cart_runner.dispatch", %channel, item_id = id, "Item completed");
            drop(permit);
        });
        true
    }

    /// Wait until no item is in flight.
    pub async fn wait_idle(&self) {
        if let Ok(all) = self.permits.acquire_many(self.capacity).await {
            drop(all);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.capacity as usize - self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use crate::journal::{self, JournalState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingHandler {
        running: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    #[async_trait]
    impl ItemHandler for CountingHandler {
        async fn handle(&self, item: WorkItem) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
            if item.primary_id % 2 == 0 {
                Err(RunnerError::Render(crate::error::RenderError::ExitedWithoutSentinel))
            } else {
                Ok(())
            }
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl ItemHandler for PanickingHandler {
        async fn handle(&self, _item: WorkItem) -> Result<()> {
            panic!("handler bug");
        }
    }

    fn journals(temp: &TempDir) -> (Journals, Vec<tokio::task::JoinHandle<JournalState>>) {
        let (mentions, m_task) =
            journal::spawn(temp.path().join("m.json"), JournalState::default(), 8);
        let (direct_messages, d_task) =
            journal::spawn(temp.path().join("d.json"), JournalState::default(), 8);
        (
            Journals {
                mentions,
                direct_messages,
            },
            vec![m_task, d_task],
        )
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_all_items_complete() {
        let temp = TempDir::new().unwrap();
        let (journals, tasks) = journals(&temp);
        let handler = Arc::new(CountingHandler::default());
        let dispatcher = Dispatcher::new(3, journals, handler.clone(), CancellationToken::new());

        for id in 1..=10 {
            assert!(dispatcher.dispatch(WorkItem::mention(id, id)).await);
            assert!(dispatcher.in_flight() <= 3);
        }
        dispatcher.wait_idle().await;
        drop(dispatcher);

        assert_eq!(handler.done.load(Ordering::SeqCst), 10);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);

        let mut finals = Vec::new();
        for task in tasks {
            finals.push(task.await.unwrap());
        }
        assert_eq!(finals[0].last_completed_id, 10);
        assert!(finals[0].in_progress_ids.is_empty());
        assert_eq!(finals[1], JournalState::default());
    }

    #[tokio::test]
    async fn test_panicking_handler_still_completes() {
        let temp = TempDir::new().unwrap();
        let (journals, mut tasks) = journals(&temp);
        let dispatcher =
            Dispatcher::new(1, journals, Arc::new(PanickingHandler), CancellationToken::new());

        assert!(
            dispatcher
                .dispatch(WorkItem::recovered(Channel::DirectMessage, 55))
                .await
        );
        dispatcher.wait_idle().await;
        drop(dispatcher);

        let dms = tasks.pop().unwrap().await.unwrap();
        assert_eq!(dms.last_completed_id, 55);
        assert!(dms.in_progress_ids.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_drops_item() {
        let temp = TempDir::new().unwrap();
        let (journals, _tasks) = journals(&temp);
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            1,
            journals,
            Arc::new(CountingHandler::default()),
            cancel.clone(),
        );

        cancel.cancel();
        assert!(!dispatcher.dispatch(WorkItem::mention(1, 1)).await);
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
