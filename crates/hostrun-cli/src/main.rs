//! hostrun: serve stdio MCP servers over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use hostrun_api::AppState;
use hostrun_config::{CliOverrides, LogFormat, RunnerConfig};
use hostrun_mcp::{CleanupScheduler, Platform, SessionManager};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hostrun", version, about = "Session host for stdio MCP servers")]
struct Cli {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "hostrun_mcp=debug" (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Some("debug".to_string())
    } else {
        cli.log_level
    };
    let config = RunnerConfig::load(CliOverrides {
        host: cli.host,
        port: cli.port,
        config_path: cli.config,
        log_level,
    })
    .context("Invalid configuration")?;

    init_logging(&config);
    for warning in &config.warnings {
        tracing::warn!("{warning}; using defaults");
    }

    if let Some(path) = &config.config_file {
        tracing::info!(path = %path.display(), "Loaded config file");
    }

    let addr = tokio::net::lookup_host(config.bind_addr())
        .await
        .with_context(|| format!("Failed to resolve {}", config.bind_addr()))?
        .next()
        .with_context(|| format!("No address for {}", config.bind_addr()))?;

    let manager = Arc::new(SessionManager::new(config.session.clone()));

    let cleanup = config.session.auto_cleanup.then(|| {
        let scheduler =
            CleanupScheduler::new(Arc::clone(&manager), config.session.cleanup_interval);
        let token = scheduler.cancellation_token();
        (token, scheduler.spawn())
    });

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = Platform::current().name(),
        auth = config.security.api_key.is_some(),
        rate_limit = config.security.rate_limit_enabled,
        cache = config.session.cache_enabled,
        auto_cleanup = config.session.auto_cleanup,
        "hostrun starting"
    );

    let state = Arc::new(AppState::new(Arc::clone(&manager), config));
    let served = hostrun_api::serve(state, addr, shutdown_signal()).await;

    if let Some((token, handle)) = cleanup {
        token.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Cleanup task ended abnormally");
        }
    }

    let stopped = manager.shutdown_all().await;
    tracing::info!(sessions = stopped, "hostrun stopped");

    served.context("API server failed")
}

fn init_logging(config: &RunnerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received, draining sessions");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from(["hostrun", "--host", "0.0.0.0", "-p", "9000", "--verbose"]);
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(9000));
        assert!(cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn rejects_invalid_port() {
        assert!(Cli::try_parse_from(["hostrun", "--port", "not-a-port"]).is_err());
    }
}
