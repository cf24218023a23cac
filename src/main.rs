//! SSE streaming server.
//!
//! Serves heartbeat, simulated LLM token, progress and echo streams over
//! Server-Sent Events.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! sse-streaming-rs config/server.toml
//!
//! # With environment variables
//! PORT=3000 SSE_KEEPALIVE_INTERVAL=5 sse-streaming-rs
//! ```

use std::io;
use std::path::PathBuf;

use clap::Parser;
use nix::libc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sse_streaming_rs::{
    config::Config,
    metrics::{init_metrics, start_metrics_server},
    registry::SessionRegistry,
    server::{serve, AppState},
    DaemonError,
};

/// Server-Sent Events streaming server.
#[derive(Parser, Debug)]
#[command(name = "sse-streaming-rs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Override listen address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Every open stream pins a socket
    increase_fd_limit();

    let mut config = Config::load(args.config.as_ref())?;

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;

    tracing::info!(
        listen_addr = %config.server.listen_addr,
        max_sessions = config.server.max_sessions,
        keepalive_secs = config.server.keepalive_interval_secs,
        "Starting SSE streaming server"
    );

    init_metrics();

    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.parse()?;
        start_metrics_server(addr).await?;
    }

    let registry = SessionRegistry::new();

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .map_err(|e| {
            DaemonError::Bind(format!(
                "Failed to bind {}: {}",
                config.server.listen_addr, e
            ))
        })?;

    tracing::info!(addr = %listener.local_addr()?, "Server listening");

    let signals = Signals::register()?;
    tokio::spawn(handle_signals(signals, registry.clone()));

    let shutdown_timeout = config.server.shutdown_timeout();
    let mut server = tokio::spawn(serve(listener, AppState::new(config, registry.clone())));

    // Sessions observe the same broadcast and close themselves
    let mut shutdown_rx = registry.subscribe();
    let early_exit = tokio::select! {
        _ = shutdown_rx.wait_for(|shutdown| *shutdown) => None,
        result = &mut server => Some(result),
    };
    if let Some(result) = &early_exit {
        log_server_exit(result);
        registry.shutdown();
    }

    tracing::info!(
        active = registry.active_sessions(),
        timeout_secs = shutdown_timeout.as_secs(),
        "Waiting for sessions to drain"
    );

    match tokio::time::timeout(shutdown_timeout, registry.wait_for_drain()).await {
        Ok(()) => {
            tracing::info!("All sessions drained");
        }
        Err(_) => {
            tracing::warn!(
                active = registry.active_sessions(),
                "Shutdown timeout reached, forcing exit"
            );
        }
    }

    if early_exit.is_none() {
        match tokio::time::timeout(shutdown_timeout, server).await {
            Ok(result) => log_server_exit(&result),
            Err(_) => tracing::warn!("Server did not stop in time"),
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// Initialize logging with tracing.
fn init_logging(config: &sse_streaming_rs::config::LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Raise the soft file descriptor limit towards the hard limit.
fn increase_fd_limit() {
    use std::mem::MaybeUninit;

    const DESIRED_LIMIT: u64 = 65_536;

    unsafe {
        let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
        if libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) == 0 {
            let mut rlim = rlim.assume_init();
            let target = DESIRED_LIMIT.min(rlim.rlim_max as u64);
            if (rlim.rlim_cur as u64) < target {
                rlim.rlim_cur = target as libc::rlim_t;
                if libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) == 0 {
                    eprintln!("Increased fd limit to {}", target);
                } else {
                    eprintln!("Warning: could not increase fd limit");
                }
            }
        }
    }
}

fn log_server_exit(result: &Result<io::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => tracing::info!("Server exited"),
        Ok(Err(e)) => tracing::error!(error = %e, "Server error"),
        Err(e) => tracing::error!(error = %e, "Server task failed"),
    }
}

struct Signals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl Signals {
    /// Register before serving, so a failure stops startup.
    fn register() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }
}

/// Handle Unix signals.
async fn handle_signals(mut signals: Signals, registry: SessionRegistry) {
    loop {
        tokio::select! {
            _ = signals.interrupt.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
                registry.shutdown();
                break;
            }
            _ = signals.terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
                registry.shutdown();
                break;
            }
            _ = signals.hangup.recv() => {
                tracing::info!(
                    active_sessions = registry.active_sessions(),
                    "Received SIGHUP, status report"
                );
            }
        }
    }
}
