// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for cart-runner
//!
//! API failures are classified once, at the HTTP boundary, into [`ApiError`].
//! Everything downstream matches on the variant instead of re-inspecting
//! status codes or message strings.

use std::time::Duration;

use thiserror::Error;

/// Main error type for cart-runner operations
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A recoverable API failure surfaced to the caller
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// An API call the service cannot continue without has failed
    #[error("{context}: {source}")]
    Fatal {
        context: String,
        #[source]
        source: ApiError,
    },

    /// Cart rendering failed
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Work journal errors
    #[error("Journal error: {0}")]
    Journal(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    /// Whether this error should take the whole process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunnerError::Fatal { .. } | RunnerError::Config(_))
    }
}

/// Social API error categories
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Throttled by the platform (HTTP 420 / 429)
    #[error("Rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    /// The requested object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The API returned a non-success status
    #[error("API error ({status}{}): {message}", .code.map(|c| format!(", code {}", c)).unwrap_or_default())]
    Status {
        status: u16,
        code: Option<u32>,
        message: String,
    },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from the API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// A request could not be signed
    #[error("Request signing failed: {0}")]
    Signing(String),

    /// Uploaded media was rejected during asynchronous processing
    #[error("Media processing failed: {0}")]
    MediaProcessing(String),
}

impl ApiError {
    /// Status codes the platform uses for throttling.
    pub const RATE_LIMIT_STATUSES: [u16; 2] = [420, 429];

    /// Classify a non-success HTTP response.
    ///
    /// `body` is the raw response body; the platform reports failures as
    /// `{"errors": [{"code": .., "message": ..}]}`.
    pub fn from_response(status: u16, body: &str) -> Self {
        if Self::RATE_LIMIT_STATUSES.contains(&status) {
            return ApiError::RateLimited { status };
        }

        let first = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.errors.into_iter().next());

        if status == 404 {
            let message = first
                .map(|e| e.message)
                .unwrap_or_else(|| "resource not found".to_string());
            return ApiError::NotFound(message);
        }

        match first {
            Some(detail) => ApiError::Status {
                status,
                code: detail.code,
                message: detail.message,
            },
            None => ApiError::Status {
                status,
                code: None,
                message: truncate_body(body),
            },
        }
    }

    /// Only throttling is worth retrying; everything else is decided by the caller.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Failure reasons for a single emulator run
#[derive(Error, Debug)]
pub enum RenderError {
    /// The completion sentinel never showed up
    #[error("Timed out after {0:?} waiting for the cart to finish")]
    Timeout(Duration),

    /// The emulator could not be started
    #[error("Failed to start emulator {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The emulator exited before printing the sentinel
    #[error("Emulator exited without finishing the recording")]
    ExitedWithoutSentinel,

    /// The recording could not be read back
    #[error("Could not read artifact {path}: {source}")]
    Artifact {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Scratch file IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(serde::Deserialize)]
struct ErrorDetail {
    code: Option<u32>,
    #[serde(default)]
    message: String,
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX).collect();
        format!("{}...", head)
    }
}

/// Result type alias for cart-runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_statuses_are_retriable() {
        assert!(ApiError::from_response(429, "").is_retriable());
        assert!(ApiError::from_response(420, "{}").is_retriable());
    }

    #[test]
    fn test_error_body_is_decoded() {
        let body = r#"{"errors":[{"code":187,"message":"Status is a duplicate."}]}"#;
        let err = ApiError::from_response(403, body);
        assert_eq!(
            err,
            ApiError::Status {
                status: 403,
                code: Some(187),
                message: "Status is a duplicate.".to_string()
            }
        );
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("code 187"));
    }

    #[test]
    fn test_not_found() {
        let body = r#"{"errors":[{"code":144,"message":"No status found with that ID."}]}"#;
        let err = ApiError::from_response(404, body);
        assert!(matches!(err, ApiError::NotFound(ref m) if m.contains("No status")));
    }

    #[test]
    fn test_unstructured_body_is_truncated() {
        let body = "x".repeat(500);
        match ApiError::from_response(500, &body) {
            ApiError::Status { message, code, .. } => {
                assert!(code.is_none());
                assert!(message.ends_with("..."));
                assert!(message.len() < 300);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fatal_error_display() {
        let err = RunnerError::Fatal {
            context: "Could not log on".to_string(),
            source: ApiError::Network("connection refused".to_string()),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Could not log on"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_api_error_is_not_fatal() {
        let err = RunnerError::from(ApiError::NotFound("gone".to_string()));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_render_timeout_display() {
        let err = RenderError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));
    }
}
