// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry-aware gate for API calls
//!
//! Every platform call goes through [`ApiGate::execute`]. Throttling is
//! retried after a fixed delay; any other failure is either fatal for the
//! process or handed back to the caller, depending on [`Necessity`].

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::RetryPolicy;
use crate::error::{ApiError, Result, RunnerError};

/// Whether the service can keep running when a call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Necessity {
    /// Failure becomes [`RunnerError::Fatal`].
    Required,
    /// Failure is logged and returned as [`RunnerError::Api`].
    Optional,
}

/// Applies the retry policy to API calls.
#[derive(Debug, Clone, Copy)]
pub struct ApiGate {
    policy: RetryPolicy,
}

impl ApiGate {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn backoff(&self) -> Duration {
        self.policy.backoff
    }

    /// Run `operation` until it succeeds or fails with a non-retriable error.
    ///
    /// `context` describes the call for logs and fatal error messages.
    pub async fn execute<F, Fut, T>(
        &self,
        context: &str,
        necessity: Necessity,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        let mut retries: u32 = 0;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        info!(target: "cart_runner.gate", context, retries, "Call succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let exhausted = self.policy.max_retries.is_some_and(|max| retries >= max);
            if err.is_retriable() && !exhausted {
                warn!(
                    target: "cart_runner.gate",
                    context,
                    error = %err,
                    backoff_secs = self.policy.backoff.as_secs_f64(),
                    "Rate limited, retrying"
                );
                sleep(self.policy.backoff).await;
                retries += 1;
                continue;
            }

            return Err(match necessity {
                Necessity::Required => {
                    error!(target: "cart_runner.gate", context, error = %err, "Required call failed");
                    RunnerError::Fatal {
                        context: context.to_string(),
                        source: err,
                    }
                }
                Necessity::Optional => {
                    warn!(target: "cart_runner.gate", context, error = %err, "Call failed");
                    RunnerError::Api(err)
                }
            });
        }
    }
}
