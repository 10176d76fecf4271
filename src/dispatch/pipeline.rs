// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Render-and-reply pipeline for mentions and direct messages.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::api::media::upload_gif;
use crate::api::types::{MediaCategory, Status, StatusUpdate, User};
use crate::api::{ApiGate, Necessity, SocialApi};
use crate::dispatch::item::{classify_direct_message, Channel, WorkItem};
use crate::dispatch::ItemHandler;
use crate::error::Result;
use crate::render::{RenderRequest, Renderer};
use crate::text::{looks_like_code, sanitize, segment};

/// Prefix selecting private mode for a direct message.
pub const NO_TWEET_FLAG: &str = "--notweet";

const FAILURE_REASONS: &str = "Possible reasons:\n\n\
- There is a syntax error in your tweetcart.\n\
- There is an infinite loop and flip() is not being called.\n\
- flip() is overridden.";

const ACK_PRIVATE: &str =
    "Your code is being run and will not be tweeted.  I will DM you once it's finished!";
const ACK_PUBLIC: &str =
    "Your code is being run and will be tweeted when finished.  I will DM you once it's finished!";
const INTERNAL_ERROR: &str = "An internal error has occurred.  Please try back later.";
const POST_ERROR: &str = "There was an error posting your program.  Please try back later.";
const PRIVATE_RESULT: &str = "I have successfully ran your program!  Here is the result: ";

/// Failure reply for a mention.
pub fn mention_failure_text(screen_name: &str) -> String {
    format!(
        "@{}\nI was unable to generate the GIF of your tweetcart. {}",
        screen_name, FAILURE_REASONS
    )
}

/// Failure reply for a direct message.
pub fn direct_message_failure_text() -> String {
    format!(
        "I was unable to generate the GIF of your program. {}",
        FAILURE_REASONS
    )
}

/// Public link to a status posted by `screen_name`.
pub fn status_link(screen_name: &str, status_id: u64) -> String {
    format!("https://twitter.com/{}/status/{}", screen_name, status_id)
}

/// Renders carts and replies on the channel they came from.
pub struct CartPipeline {
    api: Arc<dyn SocialApi>,
    gate: ApiGate,
    renderer: Arc<dyn Renderer>,
    me: User,
}

impl CartPipeline {
    pub fn new(
        api: Arc<dyn SocialApi>,
        gate: ApiGate,
        renderer: Arc<dyn Renderer>,
        me: User,
    ) -> Self {
        Self {
            api,
            gate,
            renderer,
            me,
        }
    }

    async fn fetch_status(&self, id: u64) -> Result<Status> {
        let api = self.api.as_ref();
        self.gate
            .execute(
                &format!("Error retrieving status {}", id),
                Necessity::Optional,
                move || api.show_status(id),
            )
            .await
    }

    async fn post(&self, context: &str, update: StatusUpdate) -> Result<Status> {
        let api = self.api.as_ref();
        let update = &update;
        self.gate
            .execute(context, Necessity::Optional, move || api.update_status(update))
            .await
    }

    /// Best-effort direct message. Failures are logged by the gate.
    async fn send_dm(&self, recipient_id: u64, text: &str, media_id: Option<u64>) {
        let api = self.api.as_ref();
        let _ = self
            .gate
            .execute("Error sending direct message", Necessity::Optional, move || {
                api.send_direct_message(recipient_id, text, media_id)
            })
            .await;
    }

    async fn handle_mention(&self, item: &WorkItem) -> Result<()> {
        let mut cart = self.fetch_status(item.parent_id).await?;
        if item.parent_id == item.primary_id && cart.is_self_reply() {
            if let Some(root) = cart.in_reply_to_status_id {
                debug!(target: "cart_runner.pipeline", item_id = item.primary_id, root, "Following self-reply to cart");
                cart = self.fetch_status(root).await?;
            }
        }

        let source = sanitize(cart.body(), &cart.mention_ranges());
        // Several mentions can point at one cart; scratch files are per item.
        let request = RenderRequest::new(source.clone(), item.primary_id.to_string());

        let gif = match self.renderer.render(&request).await {
            Ok(gif) => gif,
            Err(e) => {
                if !looks_like_code(&source) {
                    debug!(target: "cart_runner.pipeline", item_id = item.primary_id, "Not a cart, staying quiet");
                    return Ok(());
                }
                warn!(target: "cart_runner.pipeline", item_id = item.primary_id, error = %e, "Render failed");
                let reply = StatusUpdate::new(mention_failure_text(&cart.user.screen_name))
                    .in_reply_to(cart.id);
                self.post(&format!("Error replying to status {}", cart.id), reply)
                    .await?;
                return Err(e.into());
            }
        };

        let media_id = upload_gif(self.api.as_ref(), &self.gate, &gif, MediaCategory::TweetGif).await?;
        let reply = StatusUpdate::new(format!("@{}", cart.user.screen_name))
            .in_reply_to(cart.id)
            .with_media(media_id);
        let posted = self
            .post(&format!("Error replying to status {}", cart.id), reply)
            .await?;

        info!(
            target: "cart_runner.pipeline",
            item_id = item.primary_id,
            cart_id = cart.id,
            reply_id = posted.id,
            "Replied with rendered cart"
        );
        Ok(())
    }

    /// Fill in text and sender for a direct message replayed from the journal.
    async fn resolve_direct_message(&self, item: WorkItem) -> Option<WorkItem> {
        if item.source_text.is_some() && item.origin.is_some() {
            return Some(item);
        }

        let api = self.api.as_ref();
        let id = item.primary_id;
        let event = self
            .gate
            .execute("Error retrieving direct message", Necessity::Optional, move || {
                api.show_direct_message(id)
            })
            .await
            .ok()?;
        let sender_id = event.message_create()?.sender_id;
        let ids = [sender_id];
        let ids = &ids[..];
        let users = self
            .gate
            .execute("Error looking up sender", Necessity::Optional, move || {
                api.lookup_users(ids)
            })
            .await
            .ok()?;
        let sender = users.into_iter().find(|u| u.id == sender_id);
        classify_direct_message(&event, sender.as_ref(), &self.me)
    }

    async fn handle_direct_message(&self, item: WorkItem) -> Result<()> {
        let id = item.primary_id;
        let Some(item) = self.resolve_direct_message(item).await else {
            info!(target: "cart_runner.pipeline", item_id = id, "Direct message could not be resolved, skipping");
            return Ok(());
        };
        let (Some(text), Some(sender)) = (item.source_text.as_deref(), item.origin.as_ref()) else {
            return Ok(());
        };

        let source = sanitize(text, &item.mention_ranges);
        let private = source.starts_with(NO_TWEET_FLAG);

        let ack = {
            let api = self.api.clone();
            let gate = self.gate;
            let recipient = sender.id;
            let text = if private { ACK_PRIVATE } else { ACK_PUBLIC };
            tokio::spawn(async move {
                let api = api.as_ref();
                let _ = gate
                    .execute("Error sending acknowledgement", Necessity::Optional, move || {
                        api.send_direct_message(recipient, text, None)
                    })
                    .await;
            })
        };

        let result = self.run_direct_message(id, &source, sender, private).await;
        if let Err(e) = ack.await {
            warn!(target: "cart_runner.pipeline", item_id = id, error = %e, "Acknowledgement task failed");
        }
        result
    }

    async fn run_direct_message(
        &self,
        id: u64,
        source: &str,
        sender: &User,
        private: bool,
    ) -> Result<()> {
        let gif = match self
            .renderer
            .render(&RenderRequest::new(source, id.to_string()))
            .await
        {
            Ok(gif) => gif,
            Err(e) => {
                warn!(target: "cart_runner.pipeline", item_id = id, error = %e, "Render failed");
                self.send_dm(sender.id, &direct_message_failure_text(), None)
                    .await;
                return Err(e.into());
            }
        };

        let category = if private {
            MediaCategory::DmGif
        } else {
            MediaCategory::TweetGif
        };
        let media_id = match upload_gif(self.api.as_ref(), &self.gate, &gif, category).await {
            Ok(media_id) => media_id,
            Err(e) => {
                self.send_dm(sender.id, INTERNAL_ERROR, None).await;
                return Err(e);
            }
        };

        if private {
            self.send_dm(sender.id, PRIVATE_RESULT, Some(media_id)).await;
            info!(target: "cart_runner.pipeline", item_id = id, "Sent rendered cart privately");
            return Ok(());
        }

        let update = StatusUpdate::new(format!("By @{}", sender.screen_name)).with_media(media_id);
        let posted = match self.post("Error posting cart from direct message", update).await {
            Ok(posted) => posted,
            Err(e) => {
                self.send_dm(sender.id, POST_ERROR, None).await;
                return Err(e);
            }
        };
        let link = status_link(&self.me.screen_name, posted.id);

        let mut previous = posted.id;
        for chunk in segment(source, &self.me.screen_name) {
            let update = StatusUpdate::new(chunk).in_reply_to(previous);
            match self.post("Error posting cart source", update).await {
                Ok(status) => previous = status.id,
                Err(e) => {
                    let text = format!(
                        "I have successfully ran your program! But there was an error posting your source code. I posted your program here. {}",
                        link
                    );
                    self.send_dm(sender.id, &text, None).await;
                    return Err(e);
                }
            }
        }

        let text = format!(
            "I have successfully ran your program!  I posted it here along with the source code. {}",
            link
        );
        self.send_dm(sender.id, &text, None).await;
        info!(target: "cart_runner.pipeline", item_id = id, status_id = posted.id, "Posted cart from direct message");
        Ok(())
    }
}

#[async_trait]
impl ItemHandler for CartPipeline {
    async fn handle(&self, item: WorkItem) -> Result<()> {
        match item.channel {
            Channel::Mention => self.handle_mention(&item).await,
            Channel::DirectMessage => self.handle_direct_message(item).await,
        }
    }
}
