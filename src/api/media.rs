// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Media upload with asynchronous processing.

use std::time::Duration;

use tracing::debug;

use crate::api::gate::{ApiGate, Necessity};
use crate::api::types::{MediaCategory, MediaUpload, ProcessingState};
use crate::api::SocialApi;
use crate::error::{ApiError, Result, RunnerError};

/// MIME type of rendered artifacts.
pub const GIF_MEDIA_TYPE: &str = "image/gif";

/// Poll interval when the server does not suggest one.
const DEFAULT_CHECK_AFTER: Duration = Duration::from_secs(1);

/// Upload a GIF and wait until the platform has finished processing it.
///
/// Returns the media id to attach to a post or direct message.
pub async fn upload_gif(
    api: &dyn SocialApi,
    gate: &ApiGate,
    data: &[u8],
    category: MediaCategory,
) -> Result<u64> {
    let mut upload = gate
        .execute("Could not upload media", Necessity::Optional, move || {
            api.upload_media(data, GIF_MEDIA_TYPE, category)
        })
        .await?;

    loop {
        let Some(info) = upload.processing_info.as_ref() else {
            return Ok(upload.media_id);
        };

        match info.state {
            ProcessingState::Succeeded => return Ok(upload.media_id),
            ProcessingState::Pending | ProcessingState::InProgress => {
                let wait = info
                    .check_after_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_CHECK_AFTER);
                debug!(
                    target: "cart_runner.media",
                    media_id = upload.media_id,
                    progress = info.progress_percent,
                    wait_secs = wait.as_secs(),
                    "Media still processing"
                );
                tokio::time::sleep(wait).await;

                let media_id = upload.media_id;
                upload = gate
                    .execute("Could not check media status", Necessity::Optional, move || {
                        api.media_status(media_id)
                    })
                    .await?;
            }
            ProcessingState::Failed => return Err(processing_failure(&upload, "failed")),
            ProcessingState::Unknown => {
                return Err(processing_failure(&upload, "unknown processing state"))
            }
        }
    }
}

fn processing_failure(upload: &MediaUpload, fallback: &str) -> RunnerError {
    let message = upload
        .processing_info
        .as_ref()
        .and_then(|info| info.error.as_ref())
        .map(|e| format!("{} ({})", e.message, e.name))
        .unwrap_or_else(|| fallback.to_string());
    RunnerError::Api(ApiError::MediaProcessing(format!(
        "media {}: {}",
        upload.media_id, message
    )))
}
