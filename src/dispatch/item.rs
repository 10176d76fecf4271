// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Work items and inbound classification.

use std::fmt;
use std::ops::Range;

use crate::api::types::{DirectMessageEvent, Status, User};

/// Where an item came from. Each channel has its own journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Mention,
    DirectMessage,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Mention => "mention",
            Channel::DirectMessage => "direct_message",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub channel: Channel,
    /// Inbound mention or direct message id; tracked by the journal.
    pub primary_id: u64,
    /// Status holding the cart and receiving the reply. Equal to
    /// `primary_id` for direct messages.
    pub parent_id: u64,
    /// Cart text when already known. Mentions always fetch the parent status;
    /// direct messages recovered from the journal have no text yet.
    pub source_text: Option<String>,
    /// Mention ranges in `source_text` to strip.
    pub mention_ranges: Vec<Range<usize>>,
    /// Sender, when known.
    pub origin: Option<User>,
}

impl WorkItem {
    pub fn mention(primary_id: u64, parent_id: u64) -> Self {
        Self {
            channel: Channel::Mention,
            primary_id,
            parent_id,
            source_text: None,
            mention_ranges: Vec::new(),
            origin: None,
        }
    }

    pub fn direct_message(
        id: u64,
        text: impl Into<String>,
        mention_ranges: Vec<Range<usize>>,
        origin: User,
    ) -> Self {
        Self {
            channel: Channel::DirectMessage,
            primary_id: id,
            parent_id: id,
            source_text: Some(text.into()),
            mention_ranges,
            origin: Some(origin),
        }
    }

    /// An item replayed from the journal: only the id survived the restart.
    pub fn recovered(channel: Channel, id: u64) -> Self {
        Self {
            channel,
            primary_id: id,
            parent_id: id,
            source_text: None,
            mention_ranges: Vec::new(),
            origin: None,
        }
    }
}

/// Turn a mention into a work item, or `None` if it should be ignored.
///
/// Retweets and the bot's own posts are ignored. A mention replying to the
/// author's own status takes its cart from that status.
pub fn classify_status(status: &Status, me: &User) -> Option<WorkItem> {
    if status.is_retweet() || status.user.id == me.id {
        return None;
    }
    let parent_id = match status.in_reply_to_status_id {
        Some(parent) if status.is_self_reply() => parent,
        _ => status.id,
    };
    Some(WorkItem::mention(status.id, parent_id))
}

/// Turn a direct message event into a work item, or `None` if it should be ignored.
///
/// `sender` is the resolved sender account; events from unknown senders and
/// from the bot itself are ignored, as is anything but `message_create`.
pub fn classify_direct_message(
    event: &DirectMessageEvent,
    sender: Option<&User>,
    me: &User,
) -> Option<WorkItem> {
    let create = event.message_create()?;
    if create.sender_id == me.id {
        return None;
    }
    let sender = sender?;
    Some(WorkItem::direct_message(
        event.id,
        create.message_data.text.clone(),
        create.message_data.entities.mention_ranges(),
        sender.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> User {
        User::new(1, "TweetCartRunner")
    }

    fn status(id: u64, user: u64) -> Status {
        Status {
            id,
            full_text: Some("@TweetCartRunner cls()".to_string()),
            user: User::new(user, "alice"),
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_mention() {
        let item = classify_status(&status(10, 5), &me()).unwrap();
        assert_eq!(item.primary_id, 10);
        assert_eq!(item.parent_id, 10);
        assert_eq!(item.channel, Channel::Mention);
    }

    #[test]
    fn test_self_reply_uses_parent() {
        let mut mention = status(11, 5);
        mention.in_reply_to_status_id = Some(9);
        mention.in_reply_to_user_id = Some(5);
        let item = classify_status(&mention, &me()).unwrap();
        assert_eq!(item.primary_id, 11);
        assert_eq!(item.parent_id, 9);
    }

    #[test]
    fn test_reply_to_someone_else_uses_mention() {
        let mut mention = status(12, 5);
        mention.in_reply_to_status_id = Some(9);
        mention.in_reply_to_user_id = Some(6);
        assert_eq!(classify_status(&mention, &me()).unwrap().parent_id, 12);
    }

    #[test]
    fn test_ignored_statuses() {
        assert!(classify_status(&status(13, 1), &me()).is_none());

        let mut retweet = status(14, 5);
        retweet.retweeted_status = Some(Box::new(status(2, 6)));
        assert!(classify_status(&retweet, &me()).is_none());
    }

    #[test]
    fn test_direct_message_classification() {
        let sender = User::new(5, "alice");
        let event = DirectMessageEvent::message(100, 5, "circ(1,1,1)");
        let item = classify_direct_message(&event, Some(&sender), &me()).unwrap();
        assert_eq!(item.primary_id, 100);
        assert_eq!(item.source_text.as_deref(), Some("circ(1,1,1)"));
        assert_eq!(item.origin, Some(sender.clone()));

        let own = DirectMessageEvent::message(101, 1, "hi");
        assert!(classify_direct_message(&own, Some(&me()), &me()).is_none());
        assert!(classify_direct_message(&event, None, &me()).is_none());

        let mut read_receipt = DirectMessageEvent::message(102, 5, "");
        read_receipt.kind = "read_receipt".to_string();
        assert!(classify_direct_message(&read_receipt, Some(&sender), &me()).is_none());
    }
}
