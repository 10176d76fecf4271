// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Social platform API
//!
//! [`SocialApi`] is the seam the rest of the crate talks to. Calls return
//! [`ApiError`] so that [`gate::ApiGate`] can decide on retries; nothing
//! outside the gate should call these methods directly.

pub mod gate;
pub mod media;
pub mod mock;
pub mod oauth;
pub mod twitter;
pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ApiError;

pub use gate::{ApiGate, Necessity};
pub use mock::MockSocialApi;
pub use twitter::TwitterClient;
pub use types::*;

/// Result of a single API call.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Live statuses from the filtered stream.
pub type StatusStream = Pin<Box<dyn Stream<Item = ApiResult<Status>> + Send>>;

/// Maximum ids accepted by a single user lookup.
pub const USER_LOOKUP_BATCH: usize = 100;

/// Operations the service needs from the platform.
#[async_trait]
pub trait SocialApi: Send + Sync {
    /// The authenticated account.
    async fn verify_credentials(&self) -> ApiResult<User>;

    /// Subscribe to statuses matching `track`.
    async fn filtered_stream(&self, track: &str) -> ApiResult<StatusStream>;

    /// At most `count` mentions with `since_id < id <= max_id`, newest first.
    async fn mentions_timeline(
        &self,
        since_id: Option<u64>,
        max_id: Option<u64>,
        count: u32,
    ) -> ApiResult<Vec<Status>>;

    async fn show_status(&self, id: u64) -> ApiResult<Status>;

    async fn update_status(&self, update: &StatusUpdate) -> ApiResult<Status>;

    /// Upload media in chunks and finalize it.
    async fn upload_media(
        &self,
        data: &[u8],
        media_type: &str,
        category: MediaCategory,
    ) -> ApiResult<MediaUpload>;

    /// Poll asynchronous processing of an uploaded media.
    async fn media_status(&self, media_id: u64) -> ApiResult<MediaUpload>;

    async fn send_direct_message(
        &self,
        recipient_id: u64,
        text: &str,
        media_id: Option<u64>,
    ) -> ApiResult<DirectMessageEvent>;

    /// One page of direct message events, newest first.
    async fn list_direct_messages(
        &self,
        cursor: Option<&str>,
        count: u32,
    ) -> ApiResult<DirectMessagePage>;

    async fn show_direct_message(&self, id: u64) -> ApiResult<DirectMessageEvent>;

    /// Look up at most [`USER_LOOKUP_BATCH`] users.
    async fn lookup_users(&self, ids: &[u64]) -> ApiResult<Vec<User>>;

    async fn create_welcome_message(&self, text: &str) -> ApiResult<WelcomeMessage>;

    async fn list_welcome_messages(&self) -> ApiResult<Vec<WelcomeMessage>>;

    async fn delete_welcome_message(&self, id: &str) -> ApiResult<()>;

    async fn create_welcome_message_rule(
        &self,
        welcome_message_id: &str,
    ) -> ApiResult<WelcomeMessageRule>;

    async fn list_welcome_message_rules(&self) -> ApiResult<Vec<WelcomeMessageRule>>;

    async fn delete_welcome_message_rule(&self, id: &str) -> ApiResult<()>;

    async fn register_webhook(&self, env_name: &str, url: &str) -> ApiResult<Webhook>;

    async fn list_webhooks(&self, env_name: &str) -> ApiResult<Vec<Webhook>>;

    async fn delete_webhook(&self, env_name: &str, webhook_id: &str) -> ApiResult<()>;

    /// Subscribe the authenticated account to activity events.
    async fn subscribe(&self, env_name: &str) -> ApiResult<()>;
}
