// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Logbus — log routing bus
//
//  Shuttle mode:  broker lanes → parsers → routing plane → drains
//  Session mode:  one-shot ids → private consumers → streamed tails
//  Storage:       Redis or Postgres (exactly one)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use logbus_admin::{session_router, shuttle_router, AppState};
use logbus_core::BusConfig;
use logbus_drains::DrainRegistry;
use logbus_observability::MetricsCollector;
use logbus_shuttle::{LogConsumer, LogProducer, Shuttle};
use logbus_store::{PostgresStorage, RedisStorage, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "logbus", version, about = "Logbus — log routing bus")]
struct Cli {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Logbus starting");

    // ── Config ──
    let config = BusConfig::load()?;
    if config.brokers().is_empty() {
        anyhow::bail!("KAFKA_HOSTS must name at least one broker");
    }
    if config.is_test_mode() {
        info!("Using consumer group logbus-testing for testing purposes");
    }

    // ── Storage backend (exactly one) ──
    let storage = connect_storage(&config).await?;

    if config.is_session_mode() {
        run_session_server(config, storage).await
    } else {
        run_shuttle_server(config, storage).await
    }
}

async fn connect_storage(config: &BusConfig) -> anyhow::Result<Arc<dyn Storage>> {
    let redis = config.redis_url.as_deref().filter(|u| !u.is_empty());
    let postgres = config.postgres_url.as_deref().filter(|u| !u.is_empty());
    match (redis, postgres) {
        (Some(url), None) => Ok(Arc::new(RedisStorage::connect(url).await?)),
        (None, Some(url)) => Ok(Arc::new(PostgresStorage::connect(url).await?)),
        _ => anyhow::bail!("exactly one of REDIS_URL or POSTGRES_URL must be set"),
    }
}

async fn run_shuttle_server(config: BusConfig, storage: Arc<dyn Storage>) -> anyhow::Result<()> {
    let brokers = config.brokers();
    let group = config.consumer_group();

    let metrics = Arc::new(MetricsCollector::new()?);
    let registry = DrainRegistry::new(Arc::clone(&metrics), config.max_syslog_connections());
    let registry_tasks = registry.start();

    let producer = Arc::new(LogProducer::connect(&brokers, group)?);
    let (consumer, lanes) = LogConsumer::connect(&brokers, group)?;

    let shuttle = Shuttle::new(
        Arc::clone(&storage),
        Arc::clone(&registry),
        Arc::clone(&metrics),
        config.is_test_mode(),
    );
    shuttle.refresh_routes().await;
    let shuttle_tasks = shuttle.start(lanes);

    if config.run_istio_als() {
        // The mesh access-log ingestor runs as a separate producer process
        // publishing onto istio-access-logs; nothing to start here.
        warn!("RUN_ISTIO_ALS is set; expecting an external access-log producer");
    }

    // ── Admin HTTP surface ──
    let state = AppState {
        storage: Arc::clone(&storage),
        producer: Some(Arc::clone(&producer)),
        metrics: Arc::clone(&metrics),
        auth_key: config.auth_key.clone(),
        session_url: config.session_url.clone(),
        brokers: brokers.clone(),
    };
    let port = config.port;
    tokio::spawn(async move {
        if let Err(e) = logbus_admin::server::serve(shuttle_router(state), port).await {
            tracing::error!(error = %e, "Admin API failed");
        }
    });

    info!(
        brokers = %brokers.join(","),
        group = %group,
        port = config.port,
        "Logbus shuttle is ready"
    );

    // ── Refresh/metrics ticker until SIGINT/SIGTERM ──
    let mut tick = tokio::time::interval(REFRESH_INTERVAL);
    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = tick.tick() => {
                registry.report_metrics().await;
                shuttle.report_metrics();
                shuttle.refresh_routes().await;
                if let Err(e) = consumer.refresh() {
                    warn!(error = %e, "Topic refresh failed");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = sigterm.recv() => break,
        }
    }

    info!("Shutting down, timer stopped");
    consumer.close();
    for task in shuttle_tasks {
        task.abort();
    }
    info!("Closed consumer");
    for task in registry_tasks {
        task.abort();
    }
    registry.close_all().await;
    info!("Closed drains");
    Ok(())
}

async fn run_session_server(config: BusConfig, storage: Arc<dyn Storage>) -> anyhow::Result<()> {
    info!(port = config.port, "Starting logsession");
    let metrics = Arc::new(MetricsCollector::new()?);
    let state = AppState {
        storage,
        producer: None,
        metrics,
        auth_key: config.auth_key.clone(),
        session_url: config.session_url.clone(),
        brokers: config.brokers(),
    };
    logbus_admin::server::serve(session_router(state), config.port).await
}
