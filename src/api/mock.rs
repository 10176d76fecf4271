// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock social API for testing
//!
//! An in-memory implementation of [`SocialApi`] that records every call and
//! can be scripted to return canned pages or inject failures per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::api::types::*;
use crate::api::{ApiResult, SocialApi, StatusStream};
use crate::error::ApiError;

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    VerifyCredentials,
    FilteredStream(String),
    MentionsTimeline {
        since_id: Option<u64>,
        max_id: Option<u64>,
    },
    ShowStatus(u64),
    UpdateStatus(StatusUpdate),
    UploadMedia { category: MediaCategory, bytes: usize },
    MediaStatus(u64),
    SendDirectMessage {
        recipient_id: u64,
        text: String,
        media_id: Option<u64>,
    },
    ListDirectMessages { cursor: Option<String> },
    ShowDirectMessage(u64),
    LookupUsers(Vec<u64>),
    CreateWelcomeMessage(String),
    ListWelcomeMessages,
    DeleteWelcomeMessage(String),
    CreateWelcomeMessageRule(String),
    ListWelcomeMessageRules,
    DeleteWelcomeMessageRule(String),
    RegisterWebhook { env_name: String, url: String },
    ListWebhooks(String),
    DeleteWebhook { env_name: String, webhook_id: String },
    Subscribe(String),
}

#[derive(Default)]
struct MockState {
    me: User,
    statuses: HashMap<u64, Status>,
    mentions: BTreeMap<u64, Status>,
    dm_pages: VecDeque<DirectMessagePage>,
    dm_events: HashMap<u64, DirectMessageEvent>,
    users: HashMap<u64, User>,
    stream_batches: VecDeque<Vec<Status>>,
    media_states: VecDeque<Option<ProcessingInfo>>,
    welcome_messages: Vec<WelcomeMessage>,
    welcome_rules: Vec<WelcomeMessageRule>,
    webhooks: Vec<Webhook>,
    /// Per-operation scripted outcomes; `None` lets the call through.
    outcomes: HashMap<&'static str, VecDeque<Option<ApiError>>>,
    /// Per-operation failures returned once the script runs out.
    always: HashMap<&'static str, ApiError>,
    calls: Vec<MockCall>,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Record `call` and return the scripted failure for `op`, if any.
    fn enter(&mut self, op: &'static str, call: MockCall) -> ApiResult<()> {
        self.calls.push(call);
        if let Some(outcome) = self.outcomes.get_mut(op).and_then(VecDeque::pop_front) {
            return match outcome {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }
        match self.always.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// In-memory [`SocialApi`].
///
/// Operation names used by the failure helpers are the trait method names,
/// e.g. `"update_status"`.
#[derive(Clone)]
pub struct MockSocialApi {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockSocialApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSocialApi {
    /// Create a mock logged in as `@TweetCartRunner` (id 1).
    pub fn new() -> Self {
        let state = MockState {
            me: User::new(1, "TweetCartRunner"),
            next_id: 10_000,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Mock social API lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// The account the mock is logged in as.
    pub fn me(&self) -> User {
        self.lock().me.clone()
    }

    /// Make a status available to `show_status`.
    pub fn with_status(self, status: Status) -> Self {
        self.lock().statuses.insert(status.id, status);
        self
    }

    /// Add statuses to the mention timeline. They can also be shown.
    pub fn with_mentions(self, mentions: Vec<Status>) -> Self {
        {
            let mut state = self.lock();
            for status in mentions {
                state.statuses.insert(status.id, status.clone());
                state.mentions.insert(status.id, status);
            }
        }
        self
    }

    /// Queue a direct message history page.
    pub fn with_dm_page(self, page: DirectMessagePage) -> Self {
        self.lock().dm_pages.push_back(page);
        self
    }

    /// Make a direct message available to `show_direct_message`.
    pub fn with_dm_event(self, event: DirectMessageEvent) -> Self {
        self.lock().dm_events.insert(event.id, event);
        self
    }

    pub fn with_user(self, user: User) -> Self {
        self.lock().users.insert(user.id, user);
        self
    }

    /// Queue statuses delivered by the next `filtered_stream` connection.
    pub fn with_stream_batch(self, batch: Vec<Status>) -> Self {
        self.lock().stream_batches.push_back(batch);
        self
    }

    /// Processing states returned by the upload and the following status polls.
    pub fn with_media_states(self, states: Vec<Option<ProcessingInfo>>) -> Self {
        self.lock().media_states.extend(states);
        self
    }

    pub fn with_webhook(self, webhook: Webhook) -> Self {
        self.lock().webhooks.push(webhook);
        self
    }

    pub fn with_welcome_message(self, message: WelcomeMessage) -> Self {
        self.lock().welcome_messages.push(message);
        self
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: &'static str, err: ApiError) {
        self.lock()
            .outcomes
            .entry(op)
            .or_default()
            .push_back(Some(err));
    }

    /// Let `successes` calls of `op` through, then fail the next one.
    pub fn fail_after(&self, op: &'static str, successes: usize, err: ApiError) {
        let mut state = self.lock();
        let queue = state.outcomes.entry(op).or_default();
        queue.extend(std::iter::repeat(None).take(successes));
        queue.push_back(Some(err));
    }

    /// Fail every call of `op` not covered by a scripted outcome.
    pub fn fail_always(&self, op: &'static str, err: ApiError) {
        self.lock().always.insert(op, err);
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Status updates posted so far.
    pub fn status_updates(&self) -> Vec<StatusUpdate> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::UpdateStatus(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    /// Direct messages sent so far as `(recipient, text, media)`.
    pub fn direct_messages(&self) -> Vec<(u64, String, Option<u64>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::SendDirectMessage {
                    recipient_id,
                    text,
                    media_id,
                } => Some((recipient_id, text, media_id)),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<MediaCategory> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::UploadMedia { category, .. } => Some(category),
                _ => None,
            })
            .collect()
    }

    pub fn media_status_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::MediaStatus(_)))
            .count()
    }

    /// Webhooks currently registered.
    pub fn webhooks(&self) -> Vec<Webhook> {
        self.lock().webhooks.clone()
    }

    pub fn welcome_messages(&self) -> Vec<WelcomeMessage> {
        self.lock().welcome_messages.clone()
    }

    pub fn welcome_rules(&self) -> Vec<WelcomeMessageRule> {
        self.lock().welcome_rules.clone()
    }
}

#[async_trait]
impl SocialApi for MockSocialApi {
    async fn verify_credentials(&self) -> ApiResult<User> {
        let mut state = self.lock();
        state.enter("verify_credentials", MockCall::VerifyCredentials)?;
        Ok(state.me.clone())
    }

    async fn filtered_stream(&self, track: &str) -> ApiResult<StatusStream> {
        let mut state = self.lock();
        state.enter("filtered_stream", MockCall::FilteredStream(track.to_string()))?;
        let batch = state.stream_batches.pop_front().unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(batch.into_iter().map(Ok))))
    }

    async fn mentions_timeline(
        &self,
        since_id: Option<u64>,
        max_id: Option<u64>,
        count: u32,
    ) -> ApiResult<Vec<Status>> {
        let mut state = self.lock();
        state.enter(
            "mentions_timeline",
            MockCall::MentionsTimeline { since_id, max_id },
        )?;
        let lower = since_id.map_or(0, |id| id.saturating_add(1));
        let upper = max_id.unwrap_or(u64::MAX);
        if lower > upper {
            return Ok(Vec::new());
        }
        Ok(state
            .mentions
            .range(lower..=upper)
            .rev()
            .take(count as usize)
            .map(|(_, status)| status.clone())
            .collect())
    }

    async fn show_status(&self, id: u64) -> ApiResult<Status> {
        let mut state = self.lock();
        state.enter("show_status", MockCall::ShowStatus(id))?;
        state
            .statuses
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("status {}", id)))
    }

    async fn update_status(&self, update: &StatusUpdate) -> ApiResult<Status> {
        let mut state = self.lock();
        state.enter("update_status", MockCall::UpdateStatus(update.clone()))?;
        let status = Status {
            id: state.next_id(),
            full_text: Some(update.text.clone()),
            user: state.me.clone(),
            in_reply_to_status_id: update.in_reply_to_status_id,
            ..Default::default()
        };
        state.statuses.insert(status.id, status.clone());
        Ok(status)
    }

    async fn upload_media(
        &self,
        data: &[u8],
        _media_type: &str,
        category: MediaCategory,
    ) -> ApiResult<MediaUpload> {
        let mut state = self.lock();
        state.enter(
            "upload_media",
            MockCall::UploadMedia {
                category,
                bytes: data.len(),
            },
        )?;
        Ok(MediaUpload {
            media_id: state.next_id(),
            processing_info: state.media_states.pop_front().flatten(),
        })
    }

    async fn media_status(&self, media_id: u64) -> ApiResult<MediaUpload> {
        let mut state = self.lock();
        state.enter("media_status", MockCall::MediaStatus(media_id))?;
        Ok(MediaUpload {
            media_id,
            processing_info: state.media_states.pop_front().flatten(),
        })
    }

    async fn send_direct_message(
        &self,
        recipient_id: u64,
        text: &str,
        media_id: Option<u64>,
    ) -> ApiResult<DirectMessageEvent> {
        let mut state = self.lock();
        state.enter(
            "send_direct_message",
            MockCall::SendDirectMessage {
                recipient_id,
                text: text.to_string(),
                media_id,
            },
        )?;
        let sender = state.me.id;
        let mut event = DirectMessageEvent::message(state.next_id(), sender, text);
        if let Some(create) = event.message_create.as_mut() {
            create.target.recipient_id = recipient_id;
        }
        Ok(event)
    }

    async fn list_direct_messages(
        &self,
        cursor: Option<&str>,
        _count: u32,
    ) -> ApiResult<DirectMessagePage> {
        let mut state = self.lock();
        state.enter(
            "list_direct_messages",
            MockCall::ListDirectMessages {
                cursor: cursor.map(str::to_string),
            },
        )?;
        Ok(state.dm_pages.pop_front().unwrap_or_default())
    }

    async fn show_direct_message(&self, id: u64) -> ApiResult<DirectMessageEvent> {
        let mut state = self.lock();
        state.enter("show_direct_message", MockCall::ShowDirectMessage(id))?;
        state
            .dm_events
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("direct message {}", id)))
    }

    async fn lookup_users(&self, ids: &[u64]) -> ApiResult<Vec<User>> {
        let mut state = self.lock();
        state.enter("lookup_users", MockCall::LookupUsers(ids.to_vec()))?;
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn create_welcome_message(&self, text: &str) -> ApiResult<WelcomeMessage> {
        let mut state = self.lock();
        state.enter(
            "create_welcome_message",
            MockCall::CreateWelcomeMessage(text.to_string()),
        )?;
        let message = WelcomeMessage {
            id: state.next_id().to_string(),
        };
        state.welcome_messages.push(message.clone());
        Ok(message)
    }

    async fn list_welcome_messages(&self) -> ApiResult<Vec<WelcomeMessage>> {
        let mut state = self.lock();
        state.enter("list_welcome_messages", MockCall::ListWelcomeMessages)?;
        Ok(state.welcome_messages.clone())
    }

    async fn delete_welcome_message(&self, id: &str) -> ApiResult<()> {
        let mut state = self.lock();
        state.enter(
            "delete_welcome_message",
            MockCall::DeleteWelcomeMessage(id.to_string()),
        )?;
        state.welcome_messages.retain(|m| m.id != id);
        Ok(())
    }

    async fn create_welcome_message_rule(
        &self,
        welcome_message_id: &str,
    ) -> ApiResult<WelcomeMessageRule> {
        let mut state = self.lock();
        state.enter(
            "create_welcome_message_rule",
            MockCall::CreateWelcomeMessageRule(welcome_message_id.to_string()),
        )?;
        let rule = WelcomeMessageRule {
            id: state.next_id().to_string(),
            welcome_message_id: welcome_message_id.to_string(),
        };
        state.welcome_rules.push(rule.clone());
        Ok(rule)
    }

    async fn list_welcome_message_rules(&self) -> ApiResult<Vec<WelcomeMessageRule>> {
        let mut state = self.lock();
        state.enter("list_welcome_message_rules", MockCall::ListWelcomeMessageRules)?;
        Ok(state.welcome_rules.clone())
    }

    async fn delete_welcome_message_rule(&self, id: &str) -> ApiResult<()> {
        let mut state = self.lock();
        state.enter(
            "delete_welcome_message_rule",
            MockCall::DeleteWelcomeMessageRule(id.to_string()),
        )?;
        state.welcome_rules.retain(|r| r.id != id);
        Ok(())
    }

    async fn register_webhook(&self, env_name: &str, url: &str) -> ApiResult<Webhook> {
        let mut state = self.lock();
        state.enter(
            "register_webhook",
            MockCall::RegisterWebhook {
                env_name: env_name.to_string(),
                url: url.to_string(),
            },
        )?;
        let webhook = Webhook {
            id: state.next_id().to_string(),
            url: url.to_string(),
            valid: true,
        };
        state.webhooks.push(webhook.clone());
        Ok(webhook)
    }

    async fn list_webhooks(&self, env_name: &str) -> ApiResult<Vec<Webhook>> {
        let mut state = self.lock();
        state.enter("list_webhooks", MockCall::ListWebhooks(env_name.to_string()))?;
        Ok(state.webhooks.clone())
    }

    async fn delete_webhook(&self, env_name: &str, webhook_id: &str) -> ApiResult<()> {
        let mut state = self.lock();
        state.enter(
            "delete_webhook",
            MockCall::DeleteWebhook {
                env_name: env_name.to_string(),
                webhook_id: webhook_id.to_string(),
            },
        )?;
        state.webhooks.retain(|w| w.id != webhook_id);
        Ok(())
    }

    async fn subscribe(&self, env_name: &str) -> ApiResult<()> {
        self.lock()
            .enter("subscribe", MockCall::Subscribe(env_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls() {
        let api = MockSocialApi::new();
        api.verify_credentials().await.unwrap();
        api.update_status(&StatusUpdate::new("hi")).await.unwrap();
        assert_eq!(api.calls().len(), 2);
        assert_eq!(api.status_updates()[0].text, "hi");
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let api = MockSocialApi::new();
        api.fail_after("update_status", 1, ApiError::RateLimited { status: 429 });

        assert!(api.update_status(&StatusUpdate::new("a")).await.is_ok());
        assert_eq!(
            api.update_status(&StatusUpdate::new("b")).await.unwrap_err(),
            ApiError::RateLimited { status: 429 }
        );
        assert!(api.update_status(&StatusUpdate::new("c")).await.is_ok());
    }

    #[tokio::test]
    async fn test_mention_timeline_honours_bounds() {
        let api = MockSocialApi::new().with_mentions(
            (1..=6)
                .map(|id| Status {
                    id,
                    ..Default::default()
                })
                .collect(),
        );
        let ids = |page: Vec<Status>| page.iter().map(|s| s.id).collect::<Vec<_>>();

        assert_eq!(ids(api.mentions_timeline(Some(1), None, 3).await.unwrap()), vec![6, 5, 4]);
        assert_eq!(ids(api.mentions_timeline(Some(1), Some(3), 3).await.unwrap()), vec![3, 2]);
        assert!(api.mentions_timeline(Some(4), Some(4), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_posted_status_can_be_shown() {
        let api = MockSocialApi::new();
        let posted = api
            .update_status(&StatusUpdate::new("x").in_reply_to(5))
            .await
            .unwrap();
        let shown = api.show_status(posted.id).await.unwrap();
        assert_eq!(shown.in_reply_to_status_id, Some(5));
        assert!(matches!(
            api.show_status(1).await.unwrap_err(),
            ApiError::NotFound(_)
        ));
    }
}
