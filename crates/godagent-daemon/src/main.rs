//! `godagent` daemon -- persistent agent-memory engine with a JSON-RPC IPC
//! surface.
//!
//! Keeps the vector index, hypergraph store, and context composer hot in
//! memory and exposes them over a Unix domain socket. The CLI surface is
//! thin glue around three subcommands: `start`, `stop`, `status`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use godagent_core::{Config, Engine};

use godagent_daemon::metrics::PerformanceMetrics;
use godagent_daemon::registry::ServiceRegistry;
use godagent_daemon::server::Server;
use godagent_daemon::services;

/// godagent daemon -- persistent background engine
#[derive(Parser, Debug)]
#[command(name = "godagent-daemon", version, about = "Persistent agent-memory daemon with a JSON-RPC IPC interface")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error). Overrides config/env.
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon in the foreground.
    Start,
    /// Stop a running daemon by its PID file.
    Stop,
    /// Report whether a daemon is running.
    Status,
}

/// Writes the PID file on creation, removes it on drop -- covers both the
/// graceful-shutdown and panic-unwind exit paths.
struct PidGuard {
    path: std::path::PathBuf,
}

impl PidGuard {
    fn write(path: std::path::PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("creating PID file directory")?;
        }
        std::fs::write(&path, std::process::id().to_string()).context("writing PID file")?;
        Ok(Self { path })
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load().context("loading configuration")?;

    let log_level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_level).with_writer(std::io::stderr).init();

    let result = match args.command {
        Command::Start => run_start(config),
        Command::Stop => run_stop(&config),
        Command::Status => run_status(&config),
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "operational error");
    }
    result
}

fn run_start(config: Config) -> Result<()> {
    let _pid_guard = PidGuard::write(config.pid_path.clone())?;
    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(async_start(config))
}

async fn async_start(config: Config) -> Result<()> {
    tracing::info!(storage = %config.storage_dir.display(), socket = %config.socket_path.display(), "initializing daemon engine");

    let engine = Engine::new(config.clone()).context("initializing storage engine")?;

    let registry = ServiceRegistry::new();
    services::register_all(&registry).context("registering services")?;

    let server = Server::new(config, engine, registry, PerformanceMetrics::new(1000));

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        shutdown_server.request_shutdown();
    });

    server.run().await.context("server loop failed")?;
    tracing::info!("daemon shut down");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn run_stop(config: &Config) -> Result<()> {
    let pid_contents = std::fs::read_to_string(&config.pid_path)
        .with_context(|| format!("reading PID file {}", config.pid_path.display()))?;
    let pid: i32 = pid_contents.trim().parse().context("parsing PID file contents")?;

    #[cfg(unix)]
    {
        let status = std::process::Command::new("kill").arg("-TERM").arg(pid.to_string()).status().context("invoking kill")?;
        if !status.success() {
            bail!("failed to signal process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("stop is only supported on unix");
    }

    tracing::info!(pid, "sent shutdown signal");
    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    if !config.pid_path.exists() {
        println!("stopped");
        return Ok(());
    }
    let pid = std::fs::read_to_string(&config.pid_path)?;
    let pid = pid.trim();
    if config.socket_path.exists() {
        println!("running (pid {pid})");
    } else {
        println!("stale pid file (pid {pid}, no socket)");
    }
    Ok(())
}
