// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Welcome message and webhook registration.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::api::{ApiGate, Necessity, SocialApi};
use crate::error::{Result, RunnerError};

/// Shown to anyone opening a conversation with the bot.
pub const WELCOME_MESSAGE: &str = "Welcome! 240 characters not enough?  You've come to the right place!
Simply DM me your PICO-8 code and I'll run it and will post the tweet of the following:
    - An 8-second GIF of it running.
    - Tagging you as the author.
    - Reply to this tweet with the source code.

Want to see how your GIF will look without me tweeting it? Have your code start with the comment: --notweet and I'll DM you the GIF!";

/// Reachability probe for the public webhook endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ListenerProbe {
    pub attempts: u32,
    pub delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ListenerProbe {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
        }
    }
}

impl ListenerProbe {
    /// Wait until `addr` accepts TCP connections.
    pub async fn wait(&self, addr: &str) -> Result<()> {
        for attempt in 1..=self.attempts {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => {
                    debug!(target: "cart_runner.webhook", addr, attempt, "Webhook endpoint is reachable");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    debug!(target: "cart_runner.webhook", addr, attempt, error = %e, "Webhook endpoint not reachable yet")
                }
                Err(_) => {
                    debug!(target: "cart_runner.webhook", addr, attempt, "Webhook endpoint probe timed out")
                }
            }
            if attempt < self.attempts {
                sleep(self.delay).await;
            }
        }
        Err(RunnerError::Config(format!(
            "Webhook endpoint {} failed to come up",
            addr
        )))
    }
}

/// Registration calls for one account activity environment.
pub struct Registration<'a> {
    api: &'a dyn SocialApi,
    gate: ApiGate,
    env_name: &'a str,
}

impl<'a> Registration<'a> {
    pub fn new(api: &'a dyn SocialApi, gate: ApiGate, env_name: &'a str) -> Self {
        Self {
            api,
            gate,
            env_name,
        }
    }

    /// Replace whatever welcome messages and rules exist with ours.
    pub async fn install_welcome_message(&self) -> Result<()> {
        let api = self.api;

        let messages = self
            .gate
            .execute("Error listing welcome messages", Necessity::Required, move || {
                api.list_welcome_messages()
            })
            .await?;
        for message in &messages {
            let id = message.id.as_str();
            self.gate
                .execute("Error deleting welcome message", Necessity::Required, move || {
                    api.delete_welcome_message(id)
                })
                .await?;
        }

        let rules = self
            .gate
            .execute("Error listing welcome message rules", Necessity::Required, move || {
                api.list_welcome_message_rules()
            })
            .await?;
        for rule in &rules {
            let id = rule.id.as_str();
            self.gate
                .execute("Error deleting welcome message rule", Necessity::Required, move || {
                    api.delete_welcome_message_rule(id)
                })
                .await?;
        }

        let message = self
            .gate
            .execute("Error posting welcome message", Necessity::Required, move || {
                api.create_welcome_message(WELCOME_MESSAGE)
            })
            .await?;
        let message_id = message.id.as_str();
        self.gate
            .execute("Error posting welcome message rule", Necessity::Required, move || {
                api.create_welcome_message_rule(message_id)
            })
            .await?;

        info!(
            target: "cart_runner.webhook",
            removed_messages = messages.len(),
            removed_rules = rules.len(),
            welcome_message_id = %message.id,
            "Welcome message registered"
        );
        Ok(())
    }

    /// Point the environment at `url` and subscribe to the account's events.
    pub async fn register_webhook(&self, url: &str) -> Result<()> {
        self.delete_webhooks(Necessity::Required).await?;

        let api = self.api;
        let env_name = self.env_name;
        let webhook = self
            .gate
            .execute("Error registering webhook", Necessity::Required, move || {
                api.register_webhook(env_name, url)
            })
            .await?;
        self.gate
            .execute("Error subscribing to messages", Necessity::Required, move || {
                api.subscribe(env_name)
            })
            .await?;

        info!(target: "cart_runner.webhook", webhook_id = %webhook.id, url, "Webhook registered and subscribed");
        Ok(())
    }

    /// Remove every webhook registered for the environment.
    pub async fn delete_webhooks(&self, necessity: Necessity) -> Result<usize> {
        let api = self.api;
        let env_name = self.env_name;
        let webhooks = self
            .gate
            .execute("Error listing webhooks", necessity, move || {
                api.list_webhooks(env_name)
            })
            .await?;
        for webhook in &webhooks {
            let id = webhook.id.as_str();
            self.gate
                .execute("Error deleting webhook", necessity, move || {
                    api.delete_webhook(env_name, id)
                })
                .await?;
            debug!(target: "cart_runner.webhook", webhook_id = id, "Webhook deleted");
        }
        Ok(webhooks.len())
    }

    /// Best-effort cleanup at shutdown.
    pub async fn deregister(&self) {
        match self.delete_webhooks(Necessity::Optional).await {
            Ok(count) => info!(target: "cart_runner.webhook", count, "Webhooks deregistered"),
            Err(e) => warn!(target: "cart_runner.webhook", error = %e, "Could not deregister webhooks"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockCall, MockSocialApi};
    use crate::api::types::{Webhook, WelcomeMessage};
    use crate::config::RetryPolicy;
    use crate::error::ApiError;
    use tokio::net::TcpListener;

    fn gate() -> ApiGate {
        ApiGate::new(RetryPolicy {
            backoff: Duration::from_millis(1),
            max_retries: Some(1),
        })
    }

    fn webhook(id: &str) -> Webhook {
        Webhook {
            id: id.to_string(),
            url: "https://old.example.com/webhook".to_string(),
            valid: true,
        }
    }

    #[tokio::test]
    async fn test_welcome_message_is_replaced() {
        let api = MockSocialApi::new().with_welcome_message(WelcomeMessage {
            id: "old".to_string(),
        });
        Registration::new(&api, gate(), "prod")
            .install_welcome_message()
            .await
            .unwrap();

        let messages = api.welcome_messages();
        assert_eq!(messages.len(), 1);
        assert_ne!(messages[0].id, "old");
        let rules = api.welcome_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].welcome_message_id, messages[0].id);
        assert!(api
            .calls()
            .contains(&MockCall::CreateWelcomeMessage(WELCOME_MESSAGE.to_string())));
    }

    #[tokio::test]
    async fn test_register_replaces_webhooks_and_subscribes() {
        let api = MockSocialApi::new()
            .with_webhook(webhook("1"))
            .with_webhook(webhook("2"));
        Registration::new(&api, gate(), "prod")
            .register_webhook("https://carts.example.com/webhook")
            .await
            .unwrap();

        let webhooks = api.webhooks();
        assert_eq!(webhooks.len(), 1);
        assert_eq!(webhooks[0].url, "https://carts.example.com/webhook");
        assert_eq!(api.calls().last(), Some(&MockCall::Subscribe("prod".to_string())));
    }

    #[tokio::test]
    async fn test_registration_failure_is_fatal() {
        let api = MockSocialApi::new();
        api.fail_next(
            "register_webhook",
            ApiError::Status {
                status: 400,
                code: Some(214),
                message: "Webhook URL does not meet the requirements.".to_string(),
            },
        );
        let err = Registration::new(&api, gate(), "prod")
            .register_webhook("https://carts.example.com/webhook")
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_deregister_is_best_effort() {
        let api = MockSocialApi::new().with_webhook(webhook("1"));
        api.fail_next("delete_webhook", ApiError::Network("reset".to_string()));
        Registration::new(&api, gate(), "prod").deregister().await;
        assert_eq!(api.webhooks().len(), 1);

        Registration::new(&api, gate(), "prod").deregister().await;
        assert!(api.webhooks().is_empty());
    }

    #[tokio::test]
    async fn test_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        ListenerProbe::default().wait(&addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_gives_up() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let probe = ListenerProbe {
            attempts: 2,
            delay: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(200),
        };
        let err = probe.wait(&addr).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
