//! fpf-planner - autoplan and enrichment service
//!
//! Serves the HTTP boundary (`/run`, `/result`, `/config`, `/health`), runs
//! tasks on the in-process broker and schedules the periodic ones.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fpf_common::config::TomlConfig;
use fpf_planner::autoplan::AutoplanPipeline;
use fpf_planner::config::{resolve_plans_dir, ServiceConfig};
use fpf_planner::flowlang::{SettingsCache, SettingsResolver};
use fpf_planner::geo::{centroids::seed_region_centroids, GeoResolver, Geocoder, YandexGeocoder};
use fpf_planner::observability::EventSink;
use fpf_planner::routing::{OsrmClient, RoutingEnricher};
use fpf_planner::tasks::{self, Beat, LocalBroker, TaskRegistry, WorkerContext};
use fpf_planner::AppState;

const DEFAULT_PORT: u16 = 8710;
const WORKER_CONCURRENCY: usize = 4;

/// Command-line arguments for fpf-planner
#[derive(Parser, Debug)]
#[command(name = "fpf-planner")]
#[command(about = "FoxProFlow autoplan and routing enrichment service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "FPF_PLANNER_PORT")]
    port: Option<u16>,

    /// Bootstrap TOML configuration file
    #[arg(short, long, env = "FPF_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder (database, plans)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Database file, relative paths resolve against the data folder
    #[arg(long, env = "FPF_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fpf_planner=info,fpf_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting fpf-planner v{}", env!("CARGO_PKG_VERSION"));

    let toml = TomlConfig::load_or_default(args.config.as_deref()).context("Failed to load bootstrap config")?;
    let data_dir = fpf_common::config::resolve_data_dir(args.data_dir.as_deref(), "FPF_DATA_DIR", &toml);
    let db_path = match args.database.as_ref().or(toml.database_path.as_ref()) {
        Some(path) => fpf_common::config::within_data_dir(&data_dir, path),
        None => data_dir.join("foxproflow.db"),
    };
    info!("Data folder: {}", data_dir.display());
    info!("Database: {}", db_path.display());

    let pool = fpf_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    let seeded = seed_region_centroids(&pool).await.context("Failed to seed region centroids")?;
    info!(seeded, "Region centroids ready");

    // Separate small pool so sink writes never share a business transaction
    let sink_pool = fpf_common::db::open_pool(&db_path, 2)
        .await
        .context("Failed to open event sink pool")?;
    let sink = Arc::new(EventSink::new(sink_pool));

    let service = ServiceConfig::resolve(&toml);
    let plans_dir = resolve_plans_dir(&data_dir, &toml);
    info!("Plans folder: {}", plans_dir.display());
    let settings = Arc::new(SettingsCache::new(SettingsResolver::new(plans_dir)));
    let active = settings.get(settings.active_plan()).await;
    info!(plan = %active.plan, dry_run = active.safety.dry_run, "Active plan resolved");

    let geo = match &service.geocoder.api_key {
        Some(_) => {
            let client = YandexGeocoder::new(&service.geocoder).context("Failed to build geocoder client")?;
            let geocoder: Arc<dyn Geocoder> = Arc::new(client);
            Some(Arc::new(GeoResolver::new(pool.clone(), geocoder, service.geocoder.clone())))
        }
        None => None,
    };

    let osrm = OsrmClient::new(&service.routing).context("Failed to build routing client")?;
    let routing = Arc::new(RoutingEnricher::new(pool.clone(), Arc::new(osrm), service.routing.clone()));
    let autoplan = Arc::new(AutoplanPipeline::new(pool.clone(), Arc::clone(&settings), Some(Arc::clone(&sink))));

    let worker = Arc::new(WorkerContext {
        pool: pool.clone(),
        settings: Arc::clone(&settings),
        autoplan,
        routing,
        geo,
        geocoder: service.geocoder.clone(),
        sink: Some(sink),
    });

    let mut registry = TaskRegistry::new();
    tasks::register_all(&mut registry);
    let broker = LocalBroker::new(pool.clone(), Arc::new(registry), worker, WORKER_CONCURRENCY);

    let cancel = CancellationToken::new();
    if service.beat.enabled {
        let schedules = tasks::schedules(active.chain.chain_every_min, &active.plan, &service.beat);
        Beat::new(broker.clone(), schedules).spawn(cancel.clone());
    } else {
        warn!("Beat disabled, periodic tasks will not run");
    }

    let state = AppState::new(pool, settings, broker);
    let app = fpf_planner::build_router(state);

    let port = args.port.or(toml.port).unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then stop the beat
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
    cancel.cancel();
}
