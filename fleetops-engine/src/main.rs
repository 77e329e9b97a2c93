use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use clap::Parser;
use fleetops_engine::{
    Config, DeviceRegistry, DocumentStore, EngineOptions, ExecutorConfig, FleetEngine,
    JsonFileStore, LogNotifier, MemoryStore, MockExecutor, Notifier, NotifierConfig,
    RemoteExecutor, SshExecutor, StorageConfig, WebhookNotifier,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fleetops-engine")]
#[command(about = "Fleet update scheduling and execution engine")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "fleetops.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=info,fleetops_engine=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    info!(
        http_addr = %config.server.http_addr,
        clients = config.clients.len(),
        "Starting fleetops-engine"
    );

    let store: Arc<dyn DocumentStore> = match &config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            Arc::new(MemoryStore::default())
        }
        StorageConfig::Json { dir } => {
            info!(dir = ?dir, "Using JSON document storage");
            Arc::new(JsonFileStore::new(dir))
        }
    };

    let executor: Arc<dyn RemoteExecutor> = match &config.executor {
        ExecutorConfig::Ssh {
            program,
            timeout_secs,
            password_helper,
        } => {
            info!(program = %program, timeout_secs, "Using ssh executor");
            Arc::new(SshExecutor::new(
                program.as_str(),
                password_helper.as_str(),
                Duration::from_secs(*timeout_secs),
            ))
        }
        ExecutorConfig::Mock { unreachable } => {
            info!(unreachable = unreachable.len(), "Using mock executor");
            Arc::new(MockExecutor::new(unreachable.iter().cloned()))
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.notifier {
        NotifierConfig::Log => Arc::new(LogNotifier),
        NotifierConfig::Webhook { url, from } => {
            info!(url = %url, "Using webhook notifier");
            Arc::new(WebhookNotifier::new(url.as_str(), from.as_str()))
        }
    };

    let registry = DeviceRegistry::from_config(&config.clients);
    let engine = FleetEngine::open(
        registry,
        executor,
        store,
        notifier,
        EngineOptions::from(&config),
    )
    .await;

    run(engine, config).await
}

async fn run(engine: FleetEngine, config: Config) -> color_eyre::Result<()> {
    let cancel = CancellationToken::new();

    let dispatcher_handle = engine.spawn_dispatcher(cancel.clone())?;
    let monitor_handle = engine.spawn_monitor(
        Duration::from_secs(config.monitor.interval_secs.max(1)),
        cancel.clone(),
    );

    // HTTP server
    let http_addr = config.server.http_addr;
    let axum_app = Router::new().route("/health", get(health_handler));
    let axum_listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(axum_listener, axum_app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    cancel.cancel();

    // Wait for background tasks to complete
    let _ = dispatcher_handle.await;
    let _ = monitor_handle.await;

    info!("fleetops-engine shut down complete");
    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}
