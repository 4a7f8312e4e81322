use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cronflow::api::{self, ApiState, RunnerOpsState};
use cronflow::config::Config;
use cronflow::crypto::{set_encryptor, Encryptor};
use cronflow::db;
use cronflow::executor::Factory;
use cronflow::runner::{Runner, RunnerMetrics};
use cronflow::service::JobService;
use cronflow::store::JobStore;

#[derive(Parser)]
#[command(name = "scheduler", about = "Distributed job scheduler", version)]
struct Cli {
    /// Path to a dotenv-style config file loaded before the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST management API.
    Manager,
    /// Run the job-lease dispatch loop.
    Runner,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.config {
        Some(path) => {
            dotenvy::from_path(path)
                .map_err(|e| anyhow::anyhow!("failed to load config {}: {e}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let cfg = Config::from_env()?;
    init_tracing(&cfg.logging_level);

    set_encryptor(Encryptor::new(&cfg.storage_encryption_key));

    let pool = db::make_pool(&cfg.db).await?;
    db::run_migrations(&pool).await?;

    let service = JobService::new(JobStore::new(pool.clone()));

    match cli.command {
        Command::Manager => run_manager(cfg, service, pool).await,
        Command::Runner => run_runner(cfg, service).await,
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_target(false)
        .try_init();
}

async fn run_manager(
    cfg: Config,
    service: JobService,
    pool: sqlx::PgPool,
) -> anyhow::Result<()> {
    let app = api::router(ApiState { service, pool });

    let listener = tokio::net::TcpListener::bind(&cfg.http_address).await?;
    info!(address = %cfg.http_address, "manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("manager shutdown complete");
    Ok(())
}

async fn run_runner(cfg: Config, service: JobService) -> anyhow::Result<()> {
    let metrics = Arc::new(RunnerMetrics::new());
    let instance_id = cfg.runner.instance_id.clone();

    info!(
        instance_id = %instance_id,
        interval = ?cfg.runner.interval,
        max_concurrent_jobs = cfg.runner.max_concurrent_jobs,
        max_job_lock_time = ?cfg.runner.max_job_lock_time,
        "runner starting"
    );

    let runner = Runner::new(
        cfg.runner,
        Arc::new(service),
        Arc::new(Factory::new()),
        metrics.clone(),
    );
    runner.start();

    // Liveness + metrics listener beside the loop.
    let ops = api::runner_router(RunnerOpsState {
        metrics,
        instance_id,
    });
    let listener = tokio::net::TcpListener::bind(&cfg.http_address).await?;
    info!(address = %cfg.http_address, "runner ops listening");

    let ops_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, ops).await {
            warn!(error = %e, "runner ops listener exited");
        }
    });

    shutdown_signal().await;
    info!("shutting down the runner");

    runner.stop(None).await;
    ops_handle.abort();

    info!("runner shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
