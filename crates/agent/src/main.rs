use clap::Parser;
use std::error::Error;
use std::path::Path;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use envflux_agent::agent_modules::config::load_config;
use envflux_agent::agent_modules::credentials::{CredentialStore, FileCredentialBackend};
use envflux_agent::agent_modules::delivery::{Backlog, InfluxWriter, RetryingSink};
use envflux_agent::agent_modules::envoy::EnvoyClient;
use envflux_agent::agent_modules::poller::Poller;
use envflux_agent::agent_modules::shutdown::spawn_signal_listener;
use envflux_agent::version::VERSION;

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about = "Envoy data collector", long_about = None)]
struct Args {
    /// Path to the configuration TOML file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run without sending data to InfluxDB, log records instead
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(log_dir: &Path, debug: bool) -> WorkerGuard {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "envflux.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let default_directive = if debug {
        "debug,hyper=info,hyper_util=info,reqwest=info,rustls=info"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Critical error loading configuration: {e}");
            return Err(e.into());
        }
    };

    let _log_guard = init_logging(&config.log_dir, args.debug);
    info!(version = VERSION, config_path = %args.config, "Starting agent...");

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let signal_task = spawn_signal_listener(shutdown_tx);

    info!(host = %config.envoy.host, "Connecting to Envoy.");
    let envoy = match EnvoyClient::setup(&config.envoy).await {
        Ok(envoy) => envoy,
        Err(e) => {
            error!(error = %e, "Failed to connect to Envoy during setup.");
            return Err(e.into());
        }
    };

    let backend = match &config.envoy.token_cache_path {
        Some(path) => FileCredentialBackend::new(path),
        None => FileCredentialBackend::default(),
    };
    info!(path = ?backend.path(), "Using token cache.");
    let mut credentials = CredentialStore::new(
        envoy,
        Box::new(backend),
        config.envoy.token_refresh_buffer_seconds,
    );
    credentials
        .authenticate(&config.envoy.username, &config.envoy.password)
        .await?;

    let sink = if args.dry_run {
        info!("Running in dry-run mode. Skipping InfluxDB connection.");
        None
    } else {
        let writer = InfluxWriter::new(&config.influxdb)?;
        info!(url = %writer.write_url(), bucket = %config.influxdb.bucket, "InfluxDB writer ready.");
        Some(RetryingSink::new(
            writer,
            config.retry_policy(),
            Backlog::new(config.backlog_capacity),
        ))
    };

    let mut poller = Poller::new(credentials, sink, config.poll_interval());
    poller.run(shutdown_rx).await;

    if let Some(sink) = poller.sink() {
        let remaining = sink.backlog_len();
        if remaining > 0 {
            warn!(remaining, "Dropping undelivered records held in memory.");
        }
    }
    signal_task.abort();
    info!("Shutdown complete.");
    Ok(())
}
