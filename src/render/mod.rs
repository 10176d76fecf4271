// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Cart rendering
//!
//! A [`Renderer`] turns cart source into an animated GIF. The production
//! implementation drives the emulator as a subprocess; tests substitute
//! their own.

pub mod cart;
pub mod emulator;
pub mod scratch;

use async_trait::async_trait;

use crate::error::RenderError;

pub use emulator::EmulatorRenderer;

/// Input for a single render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Sanitized cart source.
    pub source_text: String,
    /// Unique per run; names the scratch files and the completion sentinel.
    pub correlation_id: String,
}

impl RenderRequest {
    pub fn new(source_text: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// GIF bytes or the reason there are none.
pub type RenderResult = std::result::Result<Vec<u8>, RenderError>;

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> RenderResult;
}
