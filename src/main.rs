//! # rusd-apply
//!
//! Replays a stream of committed requests through the apply layer and prints
//! each response. Input is JSON lines of the form
//! `{"index": 1, "term": 1, "request": {"Put": {"key": [97], "value": [49]}}}`.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;

use rusd_apply::etcdserverpb::{InternalRequest, ResponseMessage};
use rusd_apply::server::{ApplyServer, Entry, ServerConfig};

/// Deterministic apply layer for rusd.
///
/// Reads committed entries, applies them in index order against the store in
/// --data-dir, and writes one JSON response per applied entry to stdout.
#[derive(Parser, Debug)]
#[command(name = "rusd-apply", version, about = "Replay committed requests through the rusd apply layer")]
struct Args {
    /// Human-readable name for this member, used in logs.
    #[arg(long, default_value = "default")]
    name: String,

    /// Path to the data directory holding the store.
    #[arg(long, default_value = "default.rusd")]
    data_dir: String,

    /// File of committed entries, one JSON object per line. Reads stdin when
    /// absent or "-".
    #[arg(long)]
    input: Option<PathBuf>,

    /// Backend page cache size in megabytes.
    #[arg(long, default_value_t = 256)]
    cache_size_mb: u64,

    /// Backend flush interval in milliseconds (0 disables periodic flushing).
    #[arg(long, default_value_t = 1000)]
    flush_interval: u64,

    /// Capacity of the channel between the reader and the apply loop.
    #[arg(long, default_value_t = 1024)]
    apply_channel_capacity: usize,

    /// Discard the data directory on exit.
    #[arg(long, default_value_t = false)]
    temporary: bool,

    /// Log level - 'trace', 'debug', 'info', 'warn', or 'error'.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// One line of replay input.
#[derive(Deserialize, Debug)]
struct ReplayRecord {
    index: u64,
    #[serde(default)]
    term: u64,
    request: InternalRequest,
}

/// One line of replay output.
#[derive(Serialize, Debug)]
struct ReplayOutput {
    index: u64,
    response: ResponseMessage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    initialize_tracing(&args.log_level)?;

    let config = build_server_config(&args);
    let server = Arc::new(ApplyServer::new(config)?);

    let (apply_tx, apply_rx) = mpsc::channel(server.config().apply_channel_capacity.max(1));
    let runner = {
        let server = server.clone();
        tokio::spawn(async move { server.run(apply_rx, shutdown_signal()).await })
    };

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) if path.as_os_str() != "-" => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        _ => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut pending: Vec<(u64, oneshot::Receiver<ResponseMessage>)> = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record: ReplayRecord = serde_json::from_str(&line)
            .with_context(|| format!("parsing input line {}", lineno + 1))?;
        let entry = Entry::new(record.index, record.term, &record.request)?;

        pending.push((record.index, server.wait().register(record.index)));
        if apply_tx.send(entry).await.is_err() {
            warn!("Apply loop stopped before all input was read");
            break;
        }
    }
    drop(apply_tx);

    match runner.await? {
        Ok(()) => info!(applied_index = server.applied_index(), "Replay complete"),
        Err(e) => error!(error = %e, "Replay stopped"),
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (index, mut rx) in pending {
        match rx.try_recv() {
            Ok(response) => {
                serde_json::to_writer(&mut out, &ReplayOutput { index, response })?;
                writeln!(out)?;
            }
            Err(_) => warn!(index, "Entry was not applied"),
        }
    }

    Ok(())
}

/// Initialize the tracing/logging system with the specified log level.
fn initialize_tracing(log_level: &str) -> anyhow::Result<()> {
    let env_filter = match log_level {
        "trace" | "debug" | "info" | "warn" | "error" => EnvFilter::new(log_level),
        _ => {
            eprintln!("Invalid log level: {}. Using 'info'", log_level);
            EnvFilter::new("info")
        }
    };

    // stdout carries responses, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

fn build_server_config(args: &Args) -> ServerConfig {
    ServerConfig {
        name: args.name.clone(),
        data_dir: PathBuf::from(&args.data_dir),
        cache_size_mb: args.cache_size_mb,
        flush_interval_ms: args.flush_interval,
        apply_channel_capacity: args.apply_channel_capacity,
        temporary: args.temporary,
    }
}

/// Completes on Ctrl-C. If the handler cannot be installed, never completes.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt signal"),
        Err(e) => {
            error!(error = %e, "Failed to install interrupt handler");
            std::future::pending::<()>().await;
        }
    }
}
