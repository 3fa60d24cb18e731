use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::Mutex;

use count_sentinel::api::{self, ApiState};
use count_sentinel::cache::SummaryCache;
use count_sentinel::cli::Cli;
use count_sentinel::config::Config;
use count_sentinel::db;
use count_sentinel::logging::init_logging;
use count_sentinel::metrics::AppMetrics;
use count_sentinel::reconcile::VerificationService;
use count_sentinel::repository::SqliteRepository;
use count_sentinel::scheduler::VerificationScheduler;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let mut config = Config::from_env().unwrap_or_else(|err| {
        tracing::error!("{}", err);
        std::process::exit(1);
    });
    config.apply_cli(&cli);

    tracing::info!(
        database_url = %config.database_url,
        bind_addr = %config.bind_addr,
        "Starting count-sentinel"
    );

    let pool = db::create_pool(&config.database_url)
        .await
        .unwrap_or_else(|err| {
            tracing::error!("Failed to open database: {}", err);
            std::process::exit(1);
        });

    let repository = Arc::new(SqliteRepository::new(pool));
    let service = Arc::new(VerificationService::new(
        repository,
        config.reconcile.clone(),
    ));
    let metrics = Arc::new(AppMetrics::new().unwrap_or_else(|err| {
        tracing::error!("Failed to register metrics: {}", err);
        std::process::exit(1);
    }));

    let mut scheduler = VerificationScheduler::new(service.clone(), metrics.clone());
    scheduler.start();

    let state = ApiState {
        service,
        metrics,
        summary_cache: Arc::new(Mutex::new(SummaryCache::new(Duration::from_secs(
            config.summary_cache_ttl_seconds,
        )))),
    };
    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|err| {
            tracing::error!("Failed to bind {}: {}", config.bind_addr, err);
            std::process::exit(1);
        });
    tracing::info!("Listening on {}", config.bind_addr);

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", err);
    }

    scheduler.stop(SHUTDOWN_GRACE).await;
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
