// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! cart-runner - a bot that runs PICO-8 carts posted to it.
//!
//! Mentions and direct messages carrying cart source are admitted under a
//! concurrency limit, rendered to a GIF by the emulator and answered on the
//! channel they came from. Progress is journaled so a restart neither loses
//! nor repeats finished work.
//!
//! - `api`: platform client, retry gate and media upload
//! - `dispatch`: work items, admission control, pipeline and startup recovery
//! - `journal`: durable in-progress set and watermark
//! - `render`: emulator subprocess with completion sentinel
//! - `text`: post sanitizing and thread segmentation
//! - `webhook`: account activity listener and registration

pub mod api;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod journal;
pub mod render;
pub mod service;
pub mod text;
pub mod webhook;

pub use error::{Result, RunnerError};
