// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Service orchestration
//!
//! Startup order: journals, log on, recovery, welcome message, webhook
//! listener, webhook registration, then the live mention stream. A shutdown
//! signal deregisters the webhooks, stops the listener, lets in-flight items
//! finish and flushes both journals.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::types::User;
use crate::api::{ApiGate, Necessity, SocialApi, TwitterClient};
use crate::config::RunnerConfig;
use crate::dispatch::recovery::Recovery;
use crate::dispatch::{classify_status, CartPipeline, Dispatcher, Journals, WorkItem};
use crate::error::{Result, RunnerError};
use crate::journal::{self, JournalState};
use crate::render::{EmulatorRenderer, Renderer};
use crate::webhook::registration::{ListenerProbe, Registration};
use crate::webhook::{self, WebhookState};

/// Buffered webhook items waiting for a dispatch permit.
const WEBHOOK_QUEUE: usize = 256;

/// The running bot.
pub struct Service {
    config: RunnerConfig,
    api: Arc<dyn SocialApi>,
    renderer: Arc<dyn Renderer>,
    probe: ListenerProbe,
    probe_addr: String,
}

impl Service {
    /// Wire up the production client and emulator.
    pub fn new(config: RunnerConfig) -> Self {
        let api: Arc<dyn SocialApi> = Arc::new(TwitterClient::new(config.secrets.clone()));
        let renderer: Arc<dyn Renderer> = Arc::new(EmulatorRenderer::new(config.render.clone()));
        Self::with_parts(config, api, renderer)
    }

    pub fn with_parts(
        config: RunnerConfig,
        api: Arc<dyn SocialApi>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let probe_addr = format!("{}:443", config.webhook_domain);
        Self {
            config,
            api,
            renderer,
            probe: ListenerProbe::default(),
            probe_addr,
        }
    }

    /// Probe `addr` instead of the public HTTPS endpoint.
    pub fn with_probe(mut self, probe: ListenerProbe, addr: impl Into<String>) -> Self {
        self.probe = probe;
        self.probe_addr = addr.into();
        self
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves or a fatal error occurs.
    pub async fn run_until<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        let config = &self.config;
        let api = self.api.as_ref();
        let gate = ApiGate::new(config.retry);

        tokio::fs::create_dir_all(&config.journal_dir).await?;
        let mentions_path = config.mentions_journal_path();
        let dms_path = config.direct_messages_journal_path();
        let mentions_state = JournalState::load(&mentions_path)?;
        let dms_state = JournalState::load(&dms_path)?;
        info!(
            target: "cart_runner.service",
            mentions_watermark = mentions_state.last_completed_id,
            mentions_in_progress = mentions_state.in_progress_ids.len(),
            dms_watermark = dms_state.last_completed_id,
            dms_in_progress = dms_state.in_progress_ids.len(),
            "Journals loaded"
        );

        let me = gate
            .execute("Could not log on", Necessity::Required, move || {
                api.verify_credentials()
            })
            .await?;
        info!(target: "cart_runner.service", screen_name = %me.screen_name, "Logged on");

        let journal_capacity = config.concurrency.saturating_mul(2).max(16);
        let (mentions, mentions_task) =
            journal::spawn(mentions_path, mentions_state.clone(), journal_capacity);
        let (direct_messages, dms_task) =
            journal::spawn(dms_path, dms_state.clone(), journal_capacity);

        let cancel = CancellationToken::new();
        let pipeline = Arc::new(CartPipeline::new(
            self.api.clone(),
            gate,
            self.renderer.clone(),
            me.clone(),
        ));
        let dispatcher = Dispatcher::new(
            config.concurrency,
            Journals {
                mentions,
                direct_messages,
            },
            pipeline,
            cancel.clone(),
        );

        let registration = Registration::new(api, gate, &config.env_name);
        let outcome = tokio::select! {
            biased;
            _ = shutdown => {
                info!(target: "cart_runner.service", "Shutdown requested");
                Ok(())
            }
            result = self.serve(gate, &me, &dispatcher, &registration, &mentions_state, &dms_state, &cancel) => result,
        };

        if let Err(e) = &outcome {
            error!(target: "cart_runner.service", error = %e, "Stopping after error");
        }
        registration.deregister().await;
        cancel.cancel();

        info!(
            target: "cart_runner.service",
            in_flight = dispatcher.in_flight(),
            "Waiting for in-flight items"
        );
        dispatcher.wait_idle().await;
        drop(dispatcher);

        for task in [mentions_task, dms_task] {
            match task.await {
                Ok(state) => debug!(
                    target: "cart_runner.service",
                    last_completed_id = state.last_completed_id,
                    in_progress = state.in_progress_ids.len(),
                    "Journal closed"
                ),
                Err(e) => warn!(target: "cart_runner.service", error = %e, "Journal task failed"),
            }
        }
        info!(target: "cart_runner.service", "Shut down");
        outcome
    }

    /// Everything after log on. Only returns early on a fatal error.
    #[allow(clippy::too_many_arguments)]
    async fn serve(
        &self,
        gate: ApiGate,
        me: &User,
        dispatcher: &Dispatcher,
        registration: &Registration<'_>,
        mentions_state: &JournalState,
        dms_state: &JournalState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let config = &self.config;
        let api = self.api.as_ref();

        Recovery::new(api, gate, dispatcher, me)
            .run(mentions_state, dms_state)
            .await?;

        registration.install_welcome_message().await?;

        let (items_tx, mut items_rx) = mpsc::channel::<WorkItem>(WEBHOOK_QUEUE);
        let app = webhook::router(WebhookState::new(
            &config.secrets.consumer_secret,
            me.clone(),
            items_tx,
        ));
        let listener = TcpListener::bind(&config.bind_addr).await.map_err(|e| {
            RunnerError::Config(format!("Could not bind {}: {}", config.bind_addr, e))
        })?;
        info!(target: "cart_runner.service", addr = %config.bind_addr, "Webhook listener started");
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await });
            if let Err(e) = server.await {
                error!(target: "cart_runner.service", error = %e, "Webhook listener failed");
            }
        });

        self.probe.wait(&self.probe_addr).await?;
        registration.register_webhook(&config.webhook_url()).await?;

        let forward = dispatcher.clone();
        tokio::spawn(async move {
            while let Some(item) = items_rx.recv().await {
                forward.dispatch(item).await;
            }
            debug!(target: "cart_runner.service", "Webhook forwarding stopped");
        });

        run_mention_stream(api, gate, dispatcher, me, config.reconnect_delay, cancel).await
    }
}

/// Follow live mentions until `cancel` fires.
///
/// A dropped stream is reconnected after `reconnect_delay`, re-verifying the
/// credentials first. Failing to log on again is fatal.
pub async fn run_mention_stream(
    api: &dyn SocialApi,
    gate: ApiGate,
    dispatcher: &Dispatcher,
    me: &User,
    reconnect_delay: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let track = format!("@{}", me.screen_name);

    while !cancel.is_cancelled() {
        let track = track.as_str();
        match gate
            .execute("Could not connect to stream", Necessity::Optional, move || {
                api.filtered_stream(track)
            })
            .await
        {
            Ok(mut stream) => {
                info!(target: "cart_runner.stream", track, "Listening for mentions");
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(status)) => {
                            if let Some(item) = classify_status(&status, me) {
                                debug!(target: "cart_runner.stream", item_id = item.primary_id, "Mention received");
                                dispatcher.dispatch(item).await;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(target: "cart_runner.stream", error = %e, "Stream error");
                            break;
                        }
                        None => break,
                    }
                }
            }
            Err(e) => warn!(target: "cart_runner.stream", error = %e, "Could not open stream"),
        }

        warn!(
            target: "cart_runner.stream",
            delay_secs = reconnect_delay.as_secs_f64(),
            "Lost connection to stream, reconnecting"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
        gate.execute("Could not log on", Necessity::Required, move || {
            api.verify_credentials()
        })
        .await?;
    }
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(target: "cart_runner.service", error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(target: "cart_runner.service", error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
