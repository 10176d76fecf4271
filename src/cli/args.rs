// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! The positional arguments keep the historical invocation working:
//! `cart-runner <keys_file> <concurrency> <webhook_domain> <env_name> [log_file]`.

use clap::Parser;
use std::path::PathBuf;

/// cart-runner - runs PICO-8 carts sent as mentions or direct messages
#[derive(Parser, Debug, Clone)]
#[command(name = "cart-runner")]
#[command(version, about = "Runs PICO-8 carts sent as mentions or DMs and replies with a GIF")]
pub struct Cli {
    /// File containing the four API tokens, one per line
    pub keys_file: PathBuf,

    /// Number of carts processed at the same time
    pub concurrency: usize,

    /// Public hostname the webhook is reachable on
    pub webhook_domain: String,

    /// Account activity environment name
    pub env_name: String,

    /// Append logs to this file instead of stderr
    pub log_file: Option<PathBuf>,

    /// Directory holding the work journals
    #[arg(long, default_value = ".")]
    pub journal_dir: PathBuf,

    /// Emulator executable (defaults to the bundled path for this platform)
    #[arg(long)]
    pub emulator: Option<PathBuf>,

    /// Directory the emulator writes recordings to (defaults to ~/Desktop)
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Directory for generated cart files
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    /// Address the webhook listener binds to
    #[arg(long, default_value = "0.0.0.0:8443")]
    pub bind: String,

    /// Seconds a cart may run before it is killed
    #[arg(long, default_value_t = 30)]
    pub render_timeout_secs: u64,

    /// Seconds to wait after being rate limited
    #[arg(long, default_value_t = 20)]
    pub rate_limit_backoff_secs: u64,

    /// Give up on a rate-limited call after this many retries (retries forever if unset)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Seconds to wait before reconnecting a dropped stream
    #[arg(long, default_value_t = 30)]
    pub reconnect_delay_secs: u64,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
