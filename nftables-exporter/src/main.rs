//! Prometheus exporter for nftables counters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use nftables_exporter::config::{LogFormat, config_file};
use nftables_exporter::{
    CounterCollector, ExporterConfig, HttpServer, NftCommandSource, ScrapeGate, ScrapeSettings,
};

/// Prometheus exporter for nftables counters.
#[derive(Parser, Debug)]
#[command(name = "nftables-exporter")]
#[command(about = "Export nftables counters as open metrics format")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format, default: ./nftables-exporter.json5).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config and environment).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (config, config_path, settings) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            // No usable config, so log the cause with the default text output.
            let level = args.log_level.as_deref().unwrap_or("info");
            init_logging(level, LogFormat::Text)?;
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    init_logging(
        args.log_level.as_deref().unwrap_or(&config.logging.level),
        config.logging.format,
    )?;

    info!("Starting nftables exporter");
    if let Some(path) = &config_path {
        info!(path = %path.display(), "Using config file");
    }

    // Fail fast when there is nothing to export
    let source = NftCommandSource::new(&config.nft_binary);
    let collector = match CounterCollector::new(source) {
        Ok(collector) => Arc::new(collector),
        Err(e) => {
            error!(error = %e, "Cannot start exporter");
            return Err(e.into());
        }
    };

    let gate = Arc::new(ScrapeGate::new(collector, &settings));
    let http_server = HttpServer::new(gate, settings.listen.clone());

    info!(
        addr = %settings.listen,
        max_in_flight = ?settings.max_in_flight,
        timeout = ?settings.timeout,
        open_metrics = settings.open_metrics,
        "Listening"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start HTTP server
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx));

    // Wait for shutdown signal or server failure
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = &mut http_task => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!(error = %e, "HTTP server error");
                    Err(e)
                }
                Err(e) => Err(e.into()),
            };
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for the server to drain
    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    info!("Exporter stopped");
    Ok(())
}

/// Load the configuration file, apply the environment and the command line,
/// then resolve the scrape settings.
fn load_config(args: &Args) -> anyhow::Result<(ExporterConfig, Option<PathBuf>, ScrapeSettings)> {
    let config_path = config_file(args.config.as_deref());
    let mut config = ExporterConfig::load(config_path.as_deref())?;

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    let settings = config.resolve()?;

    Ok((config, config_path, settings))
}

/// Install the global tracing subscriber.
fn init_logging(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("nftables_exporter={}", level).parse()?)
        .add_directive(format!("tower_http={}", level).parse()?);

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_with(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_cli_listen_override() {
        let file = config_with(r#"{ ListenAddr: ":9000", Timeout: "2s" }"#);
        let path = file.path().to_str().unwrap();
        let args = Args::parse_from(["nftables-exporter", "--config", path, "--listen", "127.0.0.1:9100"]);

        let (config, config_path, settings) = load_config(&args).unwrap();

        assert_eq!(config_path.as_deref(), Some(file.path()));
        assert_eq!(config.listen_addr, "127.0.0.1:9100");
        assert_eq!(settings.listen, "127.0.0.1:9100");
        assert_eq!(settings.timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_load_config_reports_invalid_file() {
        let file = config_with(r#"{ Timeout: "soon" }"#);
        let path = file.path().to_str().unwrap();
        let args = Args::parse_from(["nftables-exporter", "--config", path]);

        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().contains("Invalid timeout"));
    }

    #[test]
    fn test_load_config_rejects_invalid_cli_listen() {
        let file = config_with("{}");
        let path = file.path().to_str().unwrap();
        let args = Args::parse_from(["nftables-exporter", "--config", path, "--listen", "9923"]);

        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().contains("Invalid listen address"));
    }
}
