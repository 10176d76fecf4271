// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Startup recovery
//!
//! Runs once before live ingestion. Items left in progress by the previous
//! run are replayed first, then everything newer than each journal's
//! watermark is fetched from the platform and dispatched in id order.
//! Mention history is paged backward from the newest item to the watermark.
//! An item whose completion never reached the journal may be delivered twice.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use crate::api::types::{DirectMessageEvent, Status, User};
use crate::api::{ApiGate, Necessity, SocialApi, USER_LOOKUP_BATCH};
use crate::dispatch::item::{classify_direct_message, classify_status, Channel, WorkItem};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::journal::JournalState;

/// Mentions requested per timeline page.
pub const MENTION_PAGE_SIZE: u32 = 20;
/// Direct messages requested per history page.
pub const DIRECT_MESSAGE_PAGE_SIZE: u32 = 50;

/// How many items each recovery step dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub replayed: usize,
    pub missed_mentions: usize,
    pub missed_direct_messages: usize,
}

/// Recovery pass over both channels.
pub struct Recovery<'a> {
    api: &'a dyn SocialApi,
    gate: ApiGate,
    dispatcher: &'a Dispatcher,
    me: &'a User,
}

impl<'a> Recovery<'a> {
    pub fn new(
        api: &'a dyn SocialApi,
        gate: ApiGate,
        dispatcher: &'a Dispatcher,
        me: &'a User,
    ) -> Self {
        Self {
            api,
            gate,
            dispatcher,
            me,
        }
    }

    /// Replay unfinished work, then backfill both channels.
    ///
    /// History lookups are required calls; their failure is fatal.
    pub async fn run(
        &self,
        mentions: &JournalState,
        direct_messages: &JournalState,
    ) -> Result<RecoveryReport> {
        let mut report = RecoveryReport {
            replayed: self.replay(Channel::Mention, mentions).await
                + self.replay(Channel::DirectMessage, direct_messages).await,
            ..Default::default()
        };
        report.missed_mentions = self.backfill_mentions(mentions).await?;
        report.missed_direct_messages = self.backfill_direct_messages(direct_messages).await?;

        info!(
            target: "cart_runner.recovery",
            replayed = report.replayed,
            missed_mentions = report.missed_mentions,
            missed_direct_messages = report.missed_direct_messages,
            "Recovery finished"
        );
        Ok(report)
    }

    /// Re-dispatch every id the journal still marks in progress.
    pub async fn replay(&self, channel: Channel, state: &JournalState) -> usize {
        let mut dispatched = 0;
        for &id in &state.in_progress_ids {
            debug!(target: "cart_runner.recovery", %channel, item_id = id, "Replaying unfinished item");
            if self.dispatcher.dispatch(WorkItem::recovered(channel, id)).await {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Dispatch mentions newer than the watermark.
    ///
    /// The timeline returns the newest page first, so pages are walked
    /// backward with `max_id` down to the watermark and dispatched oldest
    /// first once the gap is fully known.
    pub async fn backfill_mentions(&self, state: &JournalState) -> Result<usize> {
        if !state.has_watermark() {
            return Ok(0);
        }

        let api = self.api;
        let since_id = state.last_completed_id;
        let mut max_id: Option<u64> = None;
        let mut missed: BTreeMap<u64, Status> = BTreeMap::new();
        loop {
            let upper = max_id;
            let page = self
                .gate
                .execute("Could not retrieve missed mentions", Necessity::Required, move || {
                    api.mentions_timeline(Some(since_id), upper, MENTION_PAGE_SIZE)
                })
                .await?;
            let Some(oldest) = page.iter().map(|status| status.id).min() else {
                break;
            };
            debug!(target: "cart_runner.recovery", count = page.len(), oldest, "Fetched mention page");
            missed.extend(
                page.into_iter()
                    .filter(|status| status.id > since_id)
                    .map(|status| (status.id, status)),
            );
            if oldest <= since_id.saturating_add(1) {
                break;
            }
            max_id = Some(oldest - 1);
        }

        let mut dispatched = 0;
        for status in missed.values() {
            if state.is_in_progress(status.id) {
                continue;
            }
            let Some(item) = classify_status(status, self.me) else {
                continue;
            };
            if self.dispatcher.dispatch(item).await {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Dispatch direct messages newer than the watermark.
    ///
    /// History is returned newest first, so paging stops at the first event
    /// at or below the watermark.
    pub async fn backfill_direct_messages(&self, state: &JournalState) -> Result<usize> {
        if !state.has_watermark() {
            return Ok(0);
        }

        let api = self.api;
        let mut cursor: Option<String> = None;
        let mut dispatched = 0;
        loop {
            let page_cursor = cursor.as_deref();
            let page = self
                .gate
                .execute(
                    "Could not retrieve missed direct messages",
                    Necessity::Required,
                    move || api.list_direct_messages(page_cursor, DIRECT_MESSAGE_PAGE_SIZE),
                )
                .await?;

            let mut reached_watermark = false;
            let mut events: Vec<&DirectMessageEvent> = Vec::new();
            for event in &page.events {
                if event.id <= state.last_completed_id {
                    reached_watermark = true;
                    break;
                }
                if state.is_in_progress(event.id) {
                    continue;
                }
                match event.message_create() {
                    Some(create) if create.sender_id != self.me.id => events.push(event),
                    _ => {}
                }
            }

            let users = self.lookup_senders(&events).await?;
            events.sort_by_key(|event| event.id);
            for event in events {
                let sender = event
                    .message_create()
                    .and_then(|create| users.get(&create.sender_id));
                let Some(item) = classify_direct_message(event, sender, self.me) else {
                    debug!(target: "cart_runner.recovery", item_id = event.id, "Sender not found, skipping");
                    continue;
                };
                if self.dispatcher.dispatch(item).await {
                    dispatched += 1;
                }
            }

            match page.next_cursor {
                Some(next) if !reached_watermark && !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(dispatched)
    }

    async fn lookup_senders(&self, events: &[&DirectMessageEvent]) -> Result<HashMap<u64, User>> {
        let ids: Vec<u64> = events
            .iter()
            .filter_map(|event| event.message_create().map(|create| create.sender_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let api = self.api;
        let mut users = HashMap::new();
        for batch in ids.chunks(USER_LOOKUP_BATCH) {
            let found = self
                .gate
                .execute("Could not look up users", Necessity::Required, move || {
                    api.lookup_users(batch)
                })
                .await?;
            users.extend(found.into_iter().map(|user| (user.id, user)));
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockCall, MockSocialApi};
    use crate::api::types::{DirectMessagePage, Status};
    use crate::config::RetryPolicy;
    use crate::dispatch::{ItemHandler, Journals};
    use crate::error::ApiError;
    use crate::journal;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Recorder {
        items: Mutex<Vec<WorkItem>>,
    }

    #[async_trait]
    impl ItemHandler for Recorder {
        async fn handle(&self, item: WorkItem) -> Result<()> {
            self.items.lock().unwrap().push(item);
            Ok(())
        }
    }

    struct Harness {
        _temp: TempDir,
        dispatcher: Dispatcher,
        recorder: Arc<Recorder>,
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let (mentions, _) = journal::spawn(temp.path().join("m.json"), JournalState::default(), 8);
            let (direct_messages, _) =
                journal::spawn(temp.path().join("d.json"), JournalState::default(), 8);
            let recorder = Arc::new(Recorder::default());
            let dispatcher = Dispatcher::new(
                1,
                Journals {
                    mentions,
                    direct_messages,
                },
                recorder.clone(),
                CancellationToken::new(),
            );
            Self {
                _temp: temp,
                dispatcher,
                recorder,
            }
        }

        async fn items(&self) -> Vec<WorkItem> {
            self.dispatcher.wait_idle().await;
            self.recorder.items.lock().unwrap().clone()
        }
    }

    fn gate() -> ApiGate {
        ApiGate::new(RetryPolicy {
            backoff: Duration::from_millis(1),
            max_retries: Some(1),
        })
    }

    fn state(watermark: u64, in_progress: &[u64]) -> JournalState {
        JournalState {
            last_completed_id: watermark,
            in_progress_ids: in_progress.iter().copied().collect(),
        }
    }

    fn mention(id: u64) -> Status {
        Status {
            id,
            full_text: Some("@TweetCartRunner cls()".to_string()),
            user: User::new(5, "alice"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_replays_in_progress_as_recovered_items() {
        let harness = Harness::new();
        let api = MockSocialApi::new();
        let me = api.me();
        let recovery = Recovery::new(&api, gate(), &harness.dispatcher, &me);

        let dispatched = recovery
            .replay(Channel::DirectMessage, &state(0, &[8, 3]))
            .await;
        assert_eq!(dispatched, 2);
        assert_eq!(
            harness.items().await,
            vec![
                WorkItem::recovered(Channel::DirectMessage, 3),
                WorkItem::recovered(Channel::DirectMessage, 8)
            ]
        );
    }

    #[tokio::test]
    async fn test_no_watermark_means_no_backfill() {
        let harness = Harness::new();
        let api = MockSocialApi::new();
        let me = api.me();
        let recovery = Recovery::new(&api, gate(), &harness.dispatcher, &me);

        let report = recovery
            .run(&JournalState::default(), &JournalState::default())
            .await
            .unwrap();
        assert_eq!(report, RecoveryReport::default());
        assert!(api.calls().is_empty());
    }

    fn timeline_bounds(api: &MockSocialApi) -> Vec<(Option<u64>, Option<u64>)> {
        api.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::MentionsTimeline { since_id, max_id } => Some((since_id, max_id)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_mention_backfill_skips_own_and_in_progress() {
        let harness = Harness::new();
        let mut own = mention(104);
        own.user = User::new(1, "TweetCartRunner");
        let api = MockSocialApi::new().with_mentions(vec![
            mention(99),
            mention(100),
            mention(103),
            mention(101),
            mention(102),
            own,
            mention(105),
        ]);
        let me = api.me();
        let recovery = Recovery::new(&api, gate(), &harness.dispatcher, &me);

        let dispatched = recovery
            .backfill_mentions(&state(100, &[102]))
            .await
            .unwrap();

        assert_eq!(dispatched, 3);
        let ids: Vec<u64> = harness.items().await.iter().map(|i| i.primary_id).collect();
        assert_eq!(ids, vec![101, 103, 105]);
        assert_eq!(timeline_bounds(&api), vec![(Some(100), None)]);
    }

    #[tokio::test]
    async fn test_mention_backfill_pages_back_to_watermark() {
        let harness = Harness::new();
        let api = MockSocialApi::new().with_mentions((90..=125).map(mention).collect());
        let me = api.me();
        let recovery = Recovery::new(&api, gate(), &harness.dispatcher, &me);

        let dispatched = recovery
            .backfill_mentions(&state(100, &[]))
            .await
            .unwrap();

        assert_eq!(dispatched, 25);
        let ids: Vec<u64> = harness.items().await.iter().map(|i| i.primary_id).collect();
        assert_eq!(ids, (101..=125).collect::<Vec<_>>());
        assert_eq!(
            timeline_bounds(&api),
            vec![(Some(100), None), (Some(100), Some(105))]
        );
    }

    #[tokio::test]
    async fn test_mention_backfill_stops_on_empty_page() {
        let harness = Harness::new();
        let api = MockSocialApi::new().with_mentions((111..=130).map(mention).collect());
        let me = api.me();
        let recovery = Recovery::new(&api, gate(), &harness.dispatcher, &me);

        let dispatched = recovery
            .backfill_mentions(&state(100, &[]))
            .await
            .unwrap();

        assert_eq!(dispatched, 20);
        assert_eq!(
            timeline_bounds(&api),
            vec![(Some(100), None), (Some(100), Some(110))]
        );
    }

    #[tokio::test]
    async fn test_direct_message_backfill_stops_at_watermark() {
        let harness = Harness::new();
        let api = MockSocialApi::new()
            .with_user(User::new(5, "alice"))
            .with_dm_page(DirectMessagePage {
                events: vec![
                    DirectMessageEvent::message(210, 5, "cls()"),
                    DirectMessageEvent::message(209, 1, "reply from me"),
                    DirectMessageEvent::message(208, 6, "unknown sender"),
                ],
                next_cursor: Some("page2".to_string()),
            })
            .with_dm_page(DirectMessagePage {
                events: vec![
                    DirectMessageEvent::message(207, 5, "rect(1,1,5,5)"),
                    DirectMessageEvent::message(200, 5, "already done"),
                ],
                next_cursor: Some("page3".to_string()),
            });
        let me = api.me();
        let recovery = Recovery::new(&api, gate(), &harness.dispatcher, &me);

        let dispatched = recovery
            .backfill_direct_messages(&state(200, &[]))
            .await
            .unwrap();

        assert_eq!(dispatched, 2);
        let items = harness.items().await;
        let ids: Vec<u64> = items.iter().map(|i| i.primary_id).collect();
        assert_eq!(ids, vec![210, 207]);
        assert_eq!(items[0].source_text.as_deref(), Some("cls()"));

        let listed: Vec<Option<String>> = api
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::ListDirectMessages { cursor } => Some(cursor),
                _ => None,
            })
            .collect();
        assert_eq!(listed, vec![None, Some("page2".to_string())]);
    }

    #[tokio::test]
    async fn test_user_lookups_are_batched() {
        let harness = Harness::new();
        let events = (0..150u64)
            .map(|n| DirectMessageEvent::message(1_000 + n, 10 + n, "cls()"))
            .collect();
        let api = MockSocialApi::new().with_dm_page(DirectMessagePage {
            events,
            next_cursor: None,
        });
        let me = api.me();
        let recovery = Recovery::new(&api, gate(), &harness.dispatcher, &me);

        recovery
            .backfill_direct_messages(&state(1, &[]))
            .await
            .unwrap();

        let batches: Vec<usize> = api
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::LookupUsers(ids) => Some(ids.len()),
                _ => None,
            })
            .collect();
        assert_eq!(batches, vec![100, 50]);
    }

    #[tokio::test]
    async fn test_history_failure_is_fatal() {
        let harness = Harness::new();
        let api = MockSocialApi::new();
        api.fail_always("mentions_timeline", ApiError::Network("down".to_string()));
        let me = api.me();
        let recovery = Recovery::new(&api, gate(), &harness.dispatcher, &me);

        let err = recovery
            .run(&state(5, &[]), &JournalState::default())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
