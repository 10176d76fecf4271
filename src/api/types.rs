// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Wire types for the social platform API.

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Deserializer};

/// Accept ids encoded either as JSON numbers or as decimal strings.
///
/// Direct message payloads use strings, timelines use numbers.
fn id_from_any<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// An account on the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "id_from_any")]
    pub id: u64,
    #[serde(default)]
    pub screen_name: String,
    #[serde(default)]
    pub name: String,
}

impl User {
    pub fn new(id: u64, screen_name: impl Into<String>) -> Self {
        Self {
            id,
            screen_name: screen_name.into(),
            name: String::new(),
        }
    }
}

/// A user mention inside a post body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserMention {
    #[serde(default)]
    pub screen_name: String,
    /// Half-open code point range of the mention in the body.
    pub indices: [usize; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub user_mentions: Vec<UserMention>,
}

impl Entities {
    pub fn mention_ranges(&self) -> Vec<Range<usize>> {
        self.user_mentions
            .iter()
            .map(|m| m.indices[0]..m.indices[1])
            .collect()
    }
}

/// Full text of a streamed status that exceeded the legacy length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExtendedTweet {
    pub full_text: String,
    #[serde(default)]
    pub entities: Entities,
}

/// A post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Status {
    pub id: u64,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub in_reply_to_status_id: Option<u64>,
    #[serde(default)]
    pub in_reply_to_user_id: Option<u64>,
    #[serde(default)]
    pub retweeted_status: Option<Box<Status>>,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub extended_tweet: Option<ExtendedTweet>,
}

impl Status {
    /// The untruncated body, whichever field carries it.
    pub fn body(&self) -> &str {
        if let Some(extended) = &self.extended_tweet {
            return &extended.full_text;
        }
        self.full_text
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or_default()
    }

    /// Mention ranges matching [`Status::body`].
    pub fn mention_ranges(&self) -> Vec<Range<usize>> {
        match &self.extended_tweet {
            Some(extended) => extended.entities.mention_ranges(),
            None => self.entities.mention_ranges(),
        }
    }

    pub fn is_retweet(&self) -> bool {
        self.retweeted_status.is_some()
    }

    /// Whether this status continues a thread by the same author.
    pub fn is_self_reply(&self) -> bool {
        self.in_reply_to_status_id.is_some() && self.in_reply_to_user_id == Some(self.user.id)
    }
}

/// Parameters for posting a status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub text: String,
    pub in_reply_to_status_id: Option<u64>,
    pub media_ids: Vec<u64>,
    pub auto_populate_reply_metadata: bool,
}

impl StatusUpdate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn in_reply_to(mut self, status_id: u64) -> Self {
        self.in_reply_to_status_id = Some(status_id);
        self.auto_populate_reply_metadata = true;
        self
    }

    pub fn with_media(mut self, media_id: u64) -> Self {
        self.media_ids.push(media_id);
        self
    }

    /// Form parameters for the update endpoint.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("status", self.text.clone())];
        if let Some(id) = self.in_reply_to_status_id {
            params.push(("in_reply_to_status_id", id.to_string()));
        }
        if self.auto_populate_reply_metadata {
            params.push(("auto_populate_reply_metadata", "true".to_string()));
        }
        if !self.media_ids.is_empty() {
            let ids: Vec<String> = self.media_ids.iter().map(u64::to_string).collect();
            params.push(("media_ids", ids.join(",")));
        }
        params
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageData {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub entities: Entities,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageTarget {
    #[serde(deserialize_with = "id_from_any")]
    pub recipient_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageCreate {
    #[serde(default)]
    pub target: MessageTarget,
    #[serde(deserialize_with = "id_from_any")]
    pub sender_id: u64,
    #[serde(default)]
    pub message_data: MessageData,
}

/// A direct message event as delivered by the list, show and webhook endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DirectMessageEvent {
    #[serde(deserialize_with = "id_from_any")]
    pub id: u64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message_create: Option<MessageCreate>,
}

impl DirectMessageEvent {
    pub const MESSAGE_CREATE: &'static str = "message_create";

    /// A message sent by `sender_id` with body `text`.
    pub fn message(id: u64, sender_id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            kind: Self::MESSAGE_CREATE.to_string(),
            message_create: Some(MessageCreate {
                target: MessageTarget::default(),
                sender_id,
                message_data: MessageData {
                    text: text.into(),
                    entities: Entities::default(),
                },
            }),
        }
    }

    /// The message payload, for `message_create` events only.
    pub fn message_create(&self) -> Option<&MessageCreate> {
        if self.kind != Self::MESSAGE_CREATE {
            return None;
        }
        self.message_create.as_ref()
    }
}

/// One page of the direct message history, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DirectMessagePage {
    #[serde(default)]
    pub events: Vec<DirectMessageEvent>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Account activity payload posted to the webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ActivityEvents {
    #[serde(default)]
    pub for_user_id: Option<String>,
    #[serde(default)]
    pub direct_message_events: Vec<DirectMessageEvent>,
    /// Users referenced by the events, keyed by decimal id.
    #[serde(default)]
    pub users: HashMap<String, User>,
}

/// Media category passed at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCategory {
    /// Attached to a public post.
    TweetGif,
    /// Attached to a direct message.
    DmGif,
}

impl MediaCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaCategory::TweetGif => "tweet_gif",
            MediaCategory::DmGif => "dm_gif",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProcessingError {
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessingInfo {
    pub state: ProcessingState,
    #[serde(default)]
    pub check_after_secs: Option<u64>,
    #[serde(default)]
    pub progress_percent: Option<u8>,
    #[serde(default)]
    pub error: Option<ProcessingError>,
}

/// Result of a media upload or status poll.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaUpload {
    pub media_id: u64,
    /// Absent when the media needs no asynchronous processing.
    #[serde(default)]
    pub processing_info: Option<ProcessingInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Webhook {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub valid: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WelcomeMessage {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WelcomeMessageRule {
    pub id: String,
    #[serde(default)]
    pub welcome_message_id: String,
}
