use activity_sync::*;
use anyhow::Result;
use log::*;
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn init_logging(data_dir: &std::path::Path) {
    let log_level = std::env::var("SYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level = log_level.parse().unwrap_or(LevelFilter::Info);

    let term_logger = TermLogger::new(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );

    let log_file = data_dir.join(format!("{}.log", SERVICE_NAME));
    let _ = std::fs::create_dir_all(data_dir);
    match std::fs::File::create(&log_file) {
        Ok(file) => {
            let _ = CombinedLogger::init(vec![
                term_logger,
                WriteLogger::new(LevelFilter::Info, Config::default(), file),
            ]);
        }
        Err(_) => {
            let _ = CombinedLogger::init(vec![term_logger]);
        }
    }
}

async fn service_main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sync_config.json".to_string());
    let config = SyncConfig::load(&PathBuf::from(&config_path))
        .map_err(|e| anyhow::anyhow!("load config {}: {}", config_path, e))?;

    init_logging(&config.data_dir);
    info!("{} starting, config {}", SERVICE_NAME, config_path);

    let token = std::env::var("SYNC_API_TOKEN")
        .map_err(|_| anyhow::anyhow!("SYNC_API_TOKEN is not set"))?;

    let snapshot = SnapshotData::load_or_default(&config.cache_path())?;
    let marks = snapshot.high_water_marks();

    let mut resolver = IdentityResolver::new(
        config.identity_overrides.clone(),
        config.deleted_actor_sentinel.clone(),
    );
    resolver.seed(&snapshot.actors);
    let identity = Arc::new(Mutex::new(resolver));

    let cache = Arc::new(CacheStore::new(
        config.cache_path(),
        snapshot,
        identity.clone(),
    ));
    let cursors = Arc::new(Mutex::new(CursorStore::from_marks(marks)));

    let remote = Arc::new(HttpRemote::new(config.api_base_url.clone(), token));
    let policy = RetryPolicy {
        max_attempts: config.retry.max_attempts,
        retry_delay: Duration::from_secs(config.retry.retry_delay_secs),
    };
    let fetcher = Arc::new(Fetcher::new(remote.clone(), policy, config.page_size));

    let mirror: Option<Arc<dyn RecordMirror>> = config
        .mirror_endpoint
        .as_ref()
        .map(|endpoint| Arc::new(HttpMirror::new(endpoint.clone())) as Arc<dyn RecordMirror>);

    let discovered = remote
        .list_partitions()
        .await
        .map_err(|e| anyhow::anyhow!("list partitions: {}", e))?;
    let partitions = config.select_partitions(discovered);
    if partitions.is_empty() {
        warn!("no partitions selected, nothing to do");
        return Ok(());
    }

    let orchestrator = SyncOrchestrator::new(
        fetcher,
        cache,
        cursors,
        identity,
        mirror,
        config.max_concurrency,
    );

    let report = orchestrator.run(partitions).await?;
    for outcome in &report.outcomes {
        match &outcome.error {
            Some(err) => warn!("partition {}: {} ({})", outcome.partition_id, outcome.status, err),
            None => info!(
                "partition {}: {} ({} fetched)",
                outcome.partition_id, outcome.status, outcome.fetched
            ),
        }
    }
    info!("sync complete: {}", report);

    if report.failed() > 0 {
        warn!(
            "{} partitions failed and will be retried from their last cursor on the next run",
            report.failed()
        );
    }
    Ok(())
}

fn main() {
    let rt = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
    if let Err(e) = rt.block_on(service_main()) {
        eprintln!("{} failed: {}", SERVICE_NAME, e);
        std::process::exit(1);
    }
}
