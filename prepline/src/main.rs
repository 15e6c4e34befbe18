use std::sync::Arc;

use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use prepline::config::AppConfig;
use prepline::database::{
    self,
    repositories::{JobRepository, SqlxJobRepository, SqlxStepRepository, StepRepository},
};
use prepline::logging;
use prepline::pipeline::{CommandTaskFactory, TaskFactory};
use prepline::scheduler::{ChainScheduler, SchedulerConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads .env as well
    let config = AppConfig::load()?;

    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    if std::env::var_os("RUST_LOG").is_none() {
        if let Err(e) = logging_config.set_filter(&config.log_filter) {
            warn!(error = %e, "Ignoring configured log filter");
        }
    }
    info!(filter = %logging_config.get_filter(), log_dir = %config.log_dir.display(), "Logging initialized");

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
    let steps: Arc<dyn StepRepository> = Arc::new(SqlxStepRepository::new(pool.clone()));
    let factory: Arc<dyn TaskFactory> =
        Arc::new(CommandTaskFactory::from_config(&config, steps.clone()));

    let scheduler = Arc::new(ChainScheduler::new(
        SchedulerConfig::from(&config),
        jobs,
        steps,
        factory,
    ));

    scheduler.recover_on_startup().await;

    let cancel = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel.clone());
    let handle = scheduler.clone().start(cancel.clone());

    info!(
        database = %config.database_url,
        file_root = %config.file_root.display(),
        "prepline started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for the running chain to finish");
    cancel.cancel();

    if let Err(e) = handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    pool.close().await;

    info!("prepline stopped");
    Ok(())
}
