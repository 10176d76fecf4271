// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Account activity webhook
//!
//! Answers the platform's CRC challenge and turns incoming direct message
//! events into work items. Items are forwarded on a channel so the HTTP
//! response never waits for a dispatch permit.

pub mod registration;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::api::types::{ActivityEvents, User};
use crate::config::WEBHOOK_PATH;
use crate::dispatch::item::{classify_direct_message, WorkItem};

type HmacSha256 = Hmac<Sha256>;

/// Shared state of the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    consumer_secret: Arc<str>,
    me: User,
    items: mpsc::Sender<WorkItem>,
}

impl WebhookState {
    pub fn new(consumer_secret: &str, me: User, items: mpsc::Sender<WorkItem>) -> Self {
        Self {
            consumer_secret: Arc::from(consumer_secret),
            me,
            items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CrcQuery {
    crc_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrcResponse {
    pub response_token: String,
}

/// Answer to a CRC challenge: `sha256=` followed by the base64 HMAC-SHA256
/// of `token` keyed with the consumer secret.
pub fn crc_response_token(consumer_secret: &str, token: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(consumer_secret.as_bytes()).ok()?;
    mac.update(token.as_bytes());
    Some(format!("sha256={}", STANDARD.encode(mac.finalize().into_bytes())))
}

/// Classify every direct message in an activity payload.
pub fn direct_message_items(events: &ActivityEvents, me: &User) -> Vec<WorkItem> {
    let users: HashMap<u64, &User> = events.users.values().map(|u| (u.id, u)).collect();
    events
        .direct_message_events
        .iter()
        .filter_map(|event| {
            let Some(create) = event.message_create() else {
                debug!(target: "cart_runner.webhook", kind = %event.kind, "Skipping non-message event");
                return None;
            };
            let sender = users.get(&create.sender_id).copied();
            if sender.is_none() {
                debug!(target: "cart_runner.webhook", item_id = event.id, sender_id = create.sender_id, "Sender missing from payload");
            }
            classify_direct_message(event, sender, me)
        })
        .collect()
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, get(receive).post(receive))
        .with_state(state)
}

async fn receive(
    State(state): State<WebhookState>,
    Query(query): Query<CrcQuery>,
    body: Bytes,
) -> Response {
    if let Some(token) = query.crc_token {
        if token.is_empty() {
            warn!(target: "cart_runner.webhook", "Empty crc_token");
            return StatusCode::BAD_REQUEST.into_response();
        }
        return match crc_response_token(&state.consumer_secret, &token) {
            Some(response_token) => Json(CrcResponse { response_token }).into_response(),
            None => {
                error!(target: "cart_runner.webhook", "Could not hash crc_token");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }

    let events: ActivityEvents = match serde_json::from_slice(&body) {
        Ok(events) => events,
        Err(e) => {
            debug!(target: "cart_runner.webhook", error = %e, "Ignoring unparsable payload");
            return StatusCode::OK.into_response();
        }
    };

    for item in direct_message_items(&events, &state.me) {
        debug!(target: "cart_runner.webhook", item_id = item.primary_id, "Direct message received");
        if state.items.send(item).await.is_err() {
            warn!(target: "cart_runner.webhook", "Dispatch loop has stopped, dropping direct message");
            break;
        }
    }
    StatusCode::OK.into_response()
}
