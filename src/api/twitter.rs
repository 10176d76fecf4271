// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Twitter v1.1 API client
//!
//! Implements [`SocialApi`] over reqwest with OAuth 1.0a user-context
//! signing. Non-success responses are classified into [`ApiError`] here and
//! nowhere else.

use async_trait::async_trait;
use reqwest::{multipart, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::api::oauth::OAuthSigner;
use crate::api::types::*;
use crate::api::{ApiResult, SocialApi, StatusStream, USER_LOOKUP_BATCH};
use crate::config::Secrets;
use crate::error::ApiError;

const API_BASE_URL: &str = "https://api.twitter.com/1.1";
const UPLOAD_BASE_URL: &str = "https://upload.twitter.com/1.1";
const STREAM_BASE_URL: &str = "https://stream.twitter.com/1.1";

/// Size of each APPEND segment of a chunked upload.
const UPLOAD_SEGMENT_BYTES: usize = 1024 * 1024;

/// Request body variants the client sends.
enum Body<'a> {
    Empty,
    Form(&'a [(&'a str, String)]),
    Json(serde_json::Value),
    Multipart(multipart::Form),
}

/// Twitter API client
pub struct TwitterClient {
    client: Client,
    signer: OAuthSigner,
    api_base: String,
    upload_base: String,
    stream_base: String,
}

impl TwitterClient {
    /// Create a client against the production endpoints
    pub fn new(secrets: Secrets) -> Self {
        Self::with_base_urls(secrets, API_BASE_URL, UPLOAD_BASE_URL, STREAM_BASE_URL)
    }

    /// Create with custom base URLs
    pub fn with_base_urls(
        secrets: Secrets,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
        stream_base: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            signer: OAuthSigner::new(secrets),
            api_base: api_base.into(),
            upload_base: upload_base.into(),
            stream_base: stream_base.into(),
        }
    }

    /// Send a signed request and classify non-success statuses.
    async fn send(
        &self,
        method: Method,
        url: String,
        query: &[(&str, String)],
        body: Body<'_>,
    ) -> ApiResult<Response> {
        let mut signed: Vec<(&str, String)> = query.to_vec();
        if let Body::Form(form) = &body {
            signed.extend_from_slice(form);
        }
        let authorization = self
            .signer
            .authorization_header(method.as_str(), &url, &signed)?;

        debug!(target: "cart_runner.api", method = %method, url = %url, "API request");

        let mut request = self
            .client
            .request(method, &url)
            .header(reqwest::header::AUTHORIZATION, authorization);
        if !query.is_empty() {
            request = request.query(query);
        }
        request = match body {
            Body::Empty => request,
            Body::Form(form) => request.form(form),
            Body::Json(value) => request.json(&value),
            Body::Multipart(form) => request.multipart(form),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_response(status, &body));
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        query: &[(&str, String)],
        body: Body<'_>,
    ) -> ApiResult<T> {
        let response = self.send(method, url, query, body).await?;
        Ok(response.json().await?)
    }

    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn upload_url(&self) -> String {
        format!("{}/media/upload.json", self.upload_base)
    }

    fn activity(&self, env_name: &str, path: &str) -> String {
        format!("{}/account_activity/all/{}/{}", self.api_base, env_name, path)
    }
}

#[derive(Deserialize)]
struct InitResponse {
    media_id: u64,
}

#[derive(Deserialize)]
struct EventEnvelope {
    event: DirectMessageEvent,
}

#[derive(Deserialize)]
struct WelcomeMessageEnvelope {
    welcome_message: WelcomeMessage,
}

#[derive(Deserialize)]
struct WelcomeMessageList {
    #[serde(default)]
    welcome_messages: Vec<WelcomeMessage>,
}

#[derive(Deserialize)]
struct WelcomeRuleEnvelope {
    welcome_message_rule: WelcomeMessageRule,
}

#[derive(Deserialize)]
struct WelcomeRuleList {
    #[serde(default)]
    welcome_message_rules: Vec<WelcomeMessageRule>,
}

/// Parse one line of the filtered stream.
///
/// Blank keep-alive lines and non-status messages (deletes, limit notices)
/// yield `None`.
fn parse_stream_line(line: &str) -> Option<Status> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            debug!(target: "cart_runner.api", error = %e, "Skipping malformed stream line");
            return None;
        }
    };
    if value.get("id").is_none() || value.get("user").is_none() {
        return None;
    }
    serde_json::from_value(value).ok()
}

#[async_trait]
impl SocialApi for TwitterClient {
    async fn verify_credentials(&self) -> ApiResult<User> {
        self.json(
            Method::GET,
            self.api("account/verify_credentials.json"),
            &[],
            Body::Empty,
        )
        .await
    }

    async fn filtered_stream(&self, track: &str) -> ApiResult<StatusStream> {
        let form = [("track", track.to_string())];
        let response = self
            .send(
                Method::POST,
                format!("{}/statuses/filter.json", self.stream_base),
                &[],
                Body::Form(&form),
            )
            .await?;

        let bytes = response.bytes_stream();
        let statuses = async_stream::try_stream! {
            let mut buffer = String::new();

            for await chunk in bytes {
                let chunk = chunk.map_err(ApiError::from)?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line: String = buffer.drain(..=line_end).collect();
                    if let Some(status) = parse_stream_line(&line) {
                        yield status;
                    }
                }
            }

            if let Some(status) = parse_stream_line(&buffer) {
                yield status;
            }
        };

        Ok(Box::pin(statuses))
    }

    async fn mentions_timeline(
        &self,
        since_id: Option<u64>,
        max_id: Option<u64>,
        count: u32,
    ) -> ApiResult<Vec<Status>> {
        let mut query = vec![
            ("count", count.to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        if let Some(since_id) = since_id {
            query.push(("since_id", since_id.to_string()));
        }
        if let Some(max_id) = max_id {
            query.push(("max_id", max_id.to_string()));
        }
        self.json(
            Method::GET,
            self.api("statuses/mentions_timeline.json"),
            &query,
            Body::Empty,
        )
        .await
    }

    async fn show_status(&self, id: u64) -> ApiResult<Status> {
        let query = [
            ("id", id.to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        self.json(Method::GET, self.api("statuses/show.json"), &query, Body::Empty)
            .await
    }

    async fn update_status(&self, update: &StatusUpdate) -> ApiResult<Status> {
        let form = update.to_params();
        self.json(
            Method::POST,
            self.api("statuses/update.json"),
            &[],
            Body::Form(&form),
        )
        .await
    }

    async fn upload_media(
        &self,
        data: &[u8],
        media_type: &str,
        category: MediaCategory,
    ) -> ApiResult<MediaUpload> {
        let init = [
            ("command", "INIT".to_string()),
            ("total_bytes", data.len().to_string()),
            ("media_type", media_type.to_string()),
            ("media_category", category.as_str().to_string()),
        ];
        let InitResponse { media_id } = self
            .json(Method::POST, self.upload_url(), &[], Body::Form(&init))
            .await?;

        for (index, segment) in data.chunks(UPLOAD_SEGMENT_BYTES).enumerate() {
            let form = multipart::Form::new()
                .text("command", "APPEND")
                .text("media_id", media_id.to_string())
                .text("segment_index", index.to_string())
                .part("media", multipart::Part::bytes(segment.to_vec()));
            self.send(Method::POST, self.upload_url(), &[], Body::Multipart(form))
                .await?;
        }

        let finalize = [
            ("command", "FINALIZE".to_string()),
            ("media_id", media_id.to_string()),
        ];
        self.json(Method::POST, self.upload_url(), &[], Body::Form(&finalize))
            .await
    }

    async fn media_status(&self, media_id: u64) -> ApiResult<MediaUpload> {
        let query = [
            ("command", "STATUS".to_string()),
            ("media_id", media_id.to_string()),
        ];
        self.json(Method::GET, self.upload_url(), &query, Body::Empty)
            .await
    }

    async fn send_direct_message(
        &self,
        recipient_id: u64,
        text: &str,
        media_id: Option<u64>,
    ) -> ApiResult<DirectMessageEvent> {
        let mut message_data = serde_json::json!({ "text": text });
        if let Some(media_id) = media_id {
            message_data["attachment"] = serde_json::json!({
                "type": "media",
                "media": { "id": media_id.to_string() }
            });
        }
        let body = serde_json::json!({
            "event": {
                "type": DirectMessageEvent::MESSAGE_CREATE,
                "message_create": {
                    "target": { "recipient_id": recipient_id.to_string() },
                    "message_data": message_data
                }
            }
        });

        let envelope: EventEnvelope = self
            .json(
                Method::POST,
                self.api("direct_messages/events/new.json"),
                &[],
                Body::Json(body),
            )
            .await?;
        Ok(envelope.event)
    }

    async fn list_direct_messages(
        &self,
        cursor: Option<&str>,
        count: u32,
    ) -> ApiResult<DirectMessagePage> {
        let mut query = vec![("count", count.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        self.json(
            Method::GET,
            self.api("direct_messages/events/list.json"),
            &query,
            Body::Empty,
        )
        .await
    }

    async fn show_direct_message(&self, id: u64) -> ApiResult<DirectMessageEvent> {
        let query = [("id", id.to_string())];
        let envelope: EventEnvelope = self
            .json(
                Method::GET,
                self.api("direct_messages/events/show.json"),
                &query,
                Body::Empty,
            )
            .await?;
        Ok(envelope.event)
    }

    async fn lookup_users(&self, ids: &[u64]) -> ApiResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > USER_LOOKUP_BATCH {
            return Err(ApiError::InvalidResponse(format!(
                "user lookup accepts at most {} ids, got {}",
                USER_LOOKUP_BATCH,
                ids.len()
            )));
        }
        let joined: Vec<String> = ids.iter().map(u64::to_string).collect();
        let query = [("user_id", joined.join(","))];
        self.json(Method::GET, self.api("users/lookup.json"), &query, Body::Empty)
            .await
    }

    async fn create_welcome_message(&self, text: &str) -> ApiResult<WelcomeMessage> {
        let body = serde_json::json!({
            "welcome_message": { "message_data": { "text": text } }
        });
        let envelope: WelcomeMessageEnvelope = self
            .json(
                Method::POST,
                self.api("direct_messages/welcome_messages/new.json"),
                &[],
                Body::Json(body),
            )
            .await?;
        Ok(envelope.welcome_message)
    }

    async fn list_welcome_messages(&self) -> ApiResult<Vec<WelcomeMessage>> {
        let list: WelcomeMessageList = self
            .json(
                Method::GET,
                self.api("direct_messages/welcome_messages/list.json"),
                &[],
                Body::Empty,
            )
            .await?;
        Ok(list.welcome_messages)
    }

    async fn delete_welcome_message(&self, id: &str) -> ApiResult<()> {
        let query = [("id", id.to_string())];
        self.send(
            Method::DELETE,
            self.api("direct_messages/welcome_messages/destroy.json"),
            &query,
            Body::Empty,
        )
        .await?;
        Ok(())
    }

    async fn create_welcome_message_rule(
        &self,
        welcome_message_id: &str,
    ) -> ApiResult<WelcomeMessageRule> {
        let body = serde_json::json!({
            "welcome_message_rule": { "welcome_message_id": welcome_message_id }
        });
        let envelope: WelcomeRuleEnvelope = self
            .json(
                Method::POST,
                self.api("direct_messages/welcome_messages/rules/new.json"),
                &[],
                Body::Json(body),
            )
            .await?;
        Ok(envelope.welcome_message_rule)
    }

    async fn list_welcome_message_rules(&self) -> ApiResult<Vec<WelcomeMessageRule>> {
        let list: WelcomeRuleList = self
            .json(
                Method::GET,
                self.api("direct_messages/welcome_messages/rules/list.json"),
                &[],
                Body::Empty,
            )
            .await?;
        Ok(list.welcome_message_rules)
    }

    async fn delete_welcome_message_rule(&self, id: &str) -> ApiResult<()> {
        let query = [("id", id.to_string())];
        self.send(
            Method::DELETE,
            self.api("direct_messages/welcome_messages/rules/destroy.json"),
            &query,
            Body::Empty,
        )
        .await?;
        Ok(())
    }

    async fn register_webhook(&self, env_name: &str, url: &str) -> ApiResult<Webhook> {
        let query = [("url", url.to_string())];
        self.json(
            Method::POST,
            self.activity(env_name, "webhooks.json"),
            &query,
            Body::Empty,
        )
        .await
    }

    async fn list_webhooks(&self, env_name: &str) -> ApiResult<Vec<Webhook>> {
        self.json(
            Method::GET,
            self.activity(env_name, "webhooks.json"),
            &[],
            Body::Empty,
        )
        .await
    }

    async fn delete_webhook(&self, env_name: &str, webhook_id: &str) -> ApiResult<()> {
        self.send(
            Method::DELETE,
            self.activity(env_name, &format!("webhooks/{}.json", webhook_id)),
            &[],
            Body::Empty,
        )
        .await?;
        Ok(())
    }

    async fn subscribe(&self, env_name: &str) -> ApiResult<()> {
        self.send(
            Method::POST,
            self.activity(env_name, "subscriptions.json"),
            &[],
            Body::Empty,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{body_string_contains, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn secrets() -> Secrets {
        Secrets::parse("ck\ncs\nat\nats").unwrap()
    }

    fn client(server: &MockServer) -> TwitterClient {
        TwitterClient::with_base_urls(secrets(), server.uri(), server.uri(), server.uri())
    }

    #[test]
    fn test_parse_stream_line() {
        assert!(parse_stream_line("\r\n").is_none());
        assert!(parse_stream_line(r#"{"delete":{"status":{"id":1}}}"#).is_none());
        let status =
            parse_stream_line(r#"{"id":3,"text":"@bot x=1","user":{"id":4,"screen_name":"a"}}"#)
                .unwrap();
        assert_eq!(status.id, 3);
    }

    #[tokio::test]
    async fn test_verify_credentials_is_signed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account/verify_credentials.json"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 42, "screen_name": "TweetCartRunner"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let user = client(&server).verify_credentials().await.unwrap();
        assert_eq!(user, User::new(42, "TweetCartRunner"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/statuses/show.json"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client(&server).show_status(1).await.unwrap_err();
        assert_eq!(err, ApiError::RateLimited { status: 429 });
    }

    #[tokio::test]
    async fn test_update_status_sends_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/statuses/update.json"))
            .and(body_string_contains("in_reply_to_status_id=7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 8, "full_text": "@a hi", "user": {"id": 1, "screen_name": "bot"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let status = client(&server)
            .update_status(&StatusUpdate::new("@a hi").in_reply_to(7))
            .await
            .unwrap();
        assert_eq!(status.id, 8);
    }

    #[tokio::test]
    async fn test_mentions_timeline_passes_id_bounds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/statuses/mentions_timeline.json"))
            .and(query_param("since_id", "100"))
            .and(query_param("max_id", "102"))
            .and(query_param("tweet_mode", "extended"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 102, "full_text": "@bot x=1", "user": {"id": 5, "screen_name": "a"}},
                {"id": 101, "full_text": "@bot y=2", "user": {"id": 5, "screen_name": "a"}}
            ])))
            .mount(&server)
            .await;

        let statuses = client(&server)
            .mentions_timeline(Some(100), Some(102), 20)
            .await
            .unwrap();
        assert_eq!(statuses.iter().map(|s| s.id).collect::<Vec<_>>(), vec![102, 101]);
    }

    #[tokio::test]
    async fn test_chunked_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/media/upload.json"))
            .and(body_string_contains("command=INIT"))
            .respond_with(
                ResponseTemplate::new(202).set_body_json(serde_json::json!({"media_id": 77})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/media/upload.json"))
            .and(body_string_contains("APPEND"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/media/upload.json"))
            .and(body_string_contains("command=FINALIZE"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "media_id": 77,
                "processing_info": {"state": "pending", "check_after_secs": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let upload = client(&server)
            .upload_media(b"GIF89a", "image/gif", MediaCategory::TweetGif)
            .await
            .unwrap();
        assert_eq!(upload.media_id, 77);
        assert_eq!(
            upload.processing_info.unwrap().state,
            ProcessingState::Pending
        );
    }

    #[tokio::test]
    async fn test_direct_message_list_and_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/direct_messages/events/list.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "events": [{
                    "type": "message_create",
                    "id": "900",
                    "message_create": {
                        "target": {"recipient_id": "1"},
                        "sender_id": "2",
                        "message_data": {"text": "x=1"}
                    }
                }],
                "next_cursor": "abc"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/direct_messages/events/show.json"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "errors": [{"code": 34, "message": "Sorry, that page does not exist."}]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let page = client.list_direct_messages(None, 50).await.unwrap();
        assert_eq!(page.events[0].id, 900);
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));

        let err = client.show_direct_message(900).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_filtered_stream_yields_statuses() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"id\":1,\"text\":\"@bot a=1\",\"user\":{\"id\":9,\"screen_name\":\"a\"}}\r\n",
            "\r\n",
            "{\"limit\":{\"track\":3}}\r\n",
            "{\"id\":2,\"text\":\"@bot b=2\",\"user\":{\"id\":9,\"screen_name\":\"a\"}}\r\n",
        );
        Mock::given(method("POST"))
            .and(path("/statuses/filter.json"))
            .and(body_string_contains("track=%40bot"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let stream = client(&server).filtered_stream("@bot").await.unwrap();
        let ids: Vec<u64> = stream.map(|s| s.unwrap().id).collect().await;
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_lookup_users_rejects_oversized_batch() {
        let server = MockServer::start().await;
        let ids: Vec<u64> = (0..101).collect();
        let err = client(&server).lookup_users(&ids).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
