//! Campaign lifecycle service: entry point.
//!
//! Runs three cron-driven background jobs (activation, completion,
//! expiration) that move campaigns through their status lifecycle in
//! SQLite, and exposes a small Axum API for manual triggers and admin
//! actions.

mod admin;
mod api;
mod batch;
mod campaign;
mod config;
mod db;
mod eligibility;
mod errors;
mod executor;
mod jobs;
mod repository;
mod scheduler;
mod status;

#[cfg(test)]
mod test_scenarios;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use admin::CampaignAdmin;
use batch::BatchRunner;
use campaign::{Clock, SystemClock};
use config::Config;
use db::SqliteCampaignRepository;
use eligibility::EligibilityFinder;
use executor::TransitionExecutor;
use jobs::{JobKind, JobOrchestrator, JobReporter, TracingReporter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url).await?;
    let repo = Arc::new(SqliteCampaignRepository::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let reporter: Arc<dyn JobReporter> = Arc::new(TracingReporter);

    let executor = Arc::new(TransitionExecutor::new(repo.clone(), clock.clone()));
    let finder = JobKind::ALL.into_iter().fold(
        EligibilityFinder::new(
            repo.clone(),
            config.timezone,
            config.max_items_per_run,
            config.query_page_size,
        ),
        |finder, kind| finder.with_job_timezone(kind, config.timezone_for(kind)),
    );
    let orchestrator = Arc::new(
        JobOrchestrator::new(
            finder,
            executor.clone(),
            BatchRunner::new(config.batch_config()),
            clock.clone(),
            reporter,
        )
        .with_timeout(config.job_timeout())
        .with_failure_report_limit(config.failure_report_limit),
    );
    let admin = Arc::new(CampaignAdmin::new(
        repo.clone(),
        executor,
        clock,
        config.timezone,
    ));

    let shutdown = CancellationToken::new();

    // ─── Background scheduler ─────────────────────────────
    let scheduler_tasks = if config.scheduler_enabled {
        let schedules = JobKind::ALL
            .into_iter()
            .map(|kind| {
                let schedule = config.schedule(kind)?;
                Ok((kind, schedule, config.timezone_for(kind)))
            })
            .collect::<errors::Result<Vec<_>>>()?;
        scheduler::spawn_all(orchestrator.clone(), schedules, shutdown.clone())
    } else {
        warn!("Scheduler disabled; jobs run only on manual trigger");
        Vec::new()
    };

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        repo,
        orchestrator,
        admin,
    });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {e}");
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    futures::future::join_all(scheduler_tasks).await;
    info!("Lifecycle service stopped");

    Ok(())
}
