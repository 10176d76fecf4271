// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! cart-runner - renders tweeted PICO-8 carts and replies with a GIF
//!
//! Entry point for the cart-runner service.

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cart_runner::cli::Cli;
use cart_runner::config::RunnerConfig;
use cart_runner::error::Result;
use cart_runner::service::Service;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "cart-runner stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = RunnerConfig::from_cli(cli)?;
    info!(
        concurrency = config.concurrency,
        webhook = %config.webhook_url(),
        emulator = %config.render.emulator.display(),
        "Starting cart-runner"
    );
    Service::new(config).run().await
}

fn env_filter(verbose: u8) -> EnvFilter {
    // RUST_LOG takes precedence over -v.
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose > 0 { "debug" } else { "info" };
    EnvFilter::new(format!("warn,cart_runner={}", level))
}

fn init_tracing(cli: &Cli) {
    let filter = env_filter(cli.verbose);

    let Some(path) = &cli.log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return;
    };

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            warn!(path = %path.display(), error = %e, "Could not open log file, logging to stderr");
        }
    }
}
