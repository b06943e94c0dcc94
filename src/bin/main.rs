// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transfer_ledger::{Engine, EngineConfig, http};

/// Transfer Ledger - HTTP API for queued account transfers
///
/// Accounts are created through the API; transfers are queued and applied
/// by a pool of worker threads. Stop with Ctrl-C: queued transfers are
/// drained before the process exits.
#[derive(Parser, Debug)]
#[command(name = "transfer-ledger")]
#[command(about = "Serves the transfer ledger over HTTP", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Number of transfer worker threads
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Capacity of the transfer job queue
    #[arg(long, default_value_t = 100)]
    queue_capacity: usize,

    /// Extra submission attempts while the queue is full
    #[arg(long, default_value_t = 3)]
    submit_retries: u32,

    /// Pause between submission attempts, in milliseconds
    #[arg(long, default_value_t = 100)]
    retry_backoff_ms: u64,

    /// Per-transfer deadline, in milliseconds
    #[arg(long, default_value_t = 5000)]
    job_timeout_ms: u64,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            submit_retries: self.submit_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            job_timeout: Duration::from_millis(self.job_timeout_ms),
            ..EngineConfig::default()
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    let engine = match Engine::with_config(args.engine_config()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("Error starting engine: {}", e);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(args.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error binding {}: {}", args.addr, e);
            process::exit(1);
        }
    };

    if let Err(e) = http::serve(listener, Arc::clone(&engine), shutdown_signal()).await {
        eprintln!("Error serving HTTP: {}", e);
        engine.shutdown();
        process::exit(1);
    }

    // Drains queued transfers on a blocking thread so the runtime can wind down.
    let draining = Arc::clone(&engine);
    if let Err(e) = tokio::task::spawn_blocking(move || draining.shutdown()).await {
        eprintln!("Error stopping engine: {}", e);
        process::exit(1);
    }
    info!("transfer ledger stopped");
}
