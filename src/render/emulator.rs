// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Emulator subprocess renderer
//!
//! Writes the wrapper cart into the work directory, runs the emulator on it
//! and watches stdout for the sentinel. The run is bounded by the configured
//! timeout; the cart file and the recording are removed on every exit path.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::render::cart;
use crate::render::scratch::ScratchFile;
use crate::render::{RenderRequest, RenderResult, Renderer};

/// Upper bound on buffered stdout while searching for the sentinel.
const MAX_OUTPUT_TAIL: usize = 4096;

/// Renders carts by running the emulator.
pub struct EmulatorRenderer {
    config: RenderConfig,
}

impl EmulatorRenderer {
    pub fn new(mut config: RenderConfig) -> Self {
        // Relative paths like ./pico-8-linux/pico8 are relative to the launch
        // directory, not the work dir the child runs in.
        if config.emulator.is_relative() && config.emulator.components().count() > 1 {
            if let Ok(absolute) = std::path::absolute(&config.emulator) {
                config.emulator = absolute;
            }
        }
        Self { config }
    }

    async fn stop(child: &mut Child) {
        if let Err(e) = child.kill().await {
            debug!(target: "cart_runner.render", error = %e, "Emulator already exited");
        }
    }
}

/// Read `reader` until `needle` shows up or the stream ends.
///
/// Only a bounded tail of the output is retained.
async fn wait_for_sentinel<R>(mut reader: R, needle: &[u8]) -> std::io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 256];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        tail.extend_from_slice(&buf[..n]);
        if tail.windows(needle.len()).any(|window| window == needle) {
            return Ok(true);
        }
        if tail.len() > MAX_OUTPUT_TAIL {
            let keep = needle.len().saturating_sub(1);
            tail.drain(..tail.len() - keep);
        }
    }
}

#[async_trait]
impl Renderer for EmulatorRenderer {
    async fn render(&self, request: &RenderRequest) -> RenderResult {
        let id = &request.correlation_id;
        let started = Instant::now();

        let cart_name = cart::cart_file_name(id);
        let cart_file = ScratchFile::new(self.config.work_dir.join(&cart_name));
        let artifact = ScratchFile::new(self.config.artifact_dir.join(cart::artifact_file_name(id)));

        tokio::fs::write(cart_file.path(), cart::wrap(&request.source_text, id)).await?;

        let mut child = Command::new(&self.config.emulator)
            .arg("-run")
            .arg(&cart_name)
            .current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RenderError::Spawn {
                path: self.config.emulator.display().to_string(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            Self::stop(&mut child).await;
            return Err(RenderError::ExitedWithoutSentinel);
        };

        let sentinel = cart::sentinel(id);
        let outcome = timeout(
            self.config.timeout,
            wait_for_sentinel(stdout, sentinel.as_bytes()),
        )
        .await;
        Self::stop(&mut child).await;

        match outcome {
            Err(_) => {
                warn!(
                    target: "cart_runner.render",
                    correlation_id = %id,
                    timeout_secs = self.config.timeout.as_secs_f64(),
                    "Cart timed out"
                );
                return Err(RenderError::Timeout(self.config.timeout));
            }
            Ok(Err(e)) => {
                warn!(target: "cart_runner.render", correlation_id = %id, error = %e, "Error reading emulator output");
                return Err(RenderError::Io(e));
            }
            Ok(Ok(false)) => return Err(RenderError::ExitedWithoutSentinel),
            Ok(Ok(true)) => {}
        }

        let bytes = tokio::fs::read(artifact.path())
            .await
            .map_err(|source| RenderError::Artifact {
                path: artifact.path().display().to_string(),
                source,
            })?;

        info!(
            target: "cart_runner.render",
            correlation_id = %id,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rendered cart"
        );
        Ok(bytes)
    }
}
