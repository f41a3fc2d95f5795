use crate::cache::CacheStore;
use crate::cursor::CursorStore;
use crate::def::*;
use crate::fetcher::Fetcher;
use crate::identity::IdentityResolver;
use crate::mirror::RecordMirror;
use crate::normalize::normalize;
use log::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// Drives one sync run: per partition, read cursor, fetch, normalize, merge,
/// advance. Partitions run as independent tasks under a bounded number of
/// permits; a failing partition never blocks the others. Merge I/O failures
/// are the one exception: cache integrity is no longer assured, so the run
/// aborts.
pub struct SyncOrchestrator {
    fetcher: Arc<Fetcher>,
    cache: Arc<CacheStore>,
    cursors: Arc<Mutex<CursorStore>>,
    identity: Arc<Mutex<IdentityResolver>>,
    mirror: Option<Arc<dyn RecordMirror>>,
    max_concurrency: usize,
}

impl SyncOrchestrator {
    pub fn new(
        fetcher: Arc<Fetcher>,
        cache: Arc<CacheStore>,
        cursors: Arc<Mutex<CursorStore>>,
        identity: Arc<Mutex<IdentityResolver>>,
        mirror: Option<Arc<dyn RecordMirror>>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            cache,
            cursors,
            identity,
            mirror,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn run(&self, partitions: Vec<u64>) -> SyncResult<SyncReport> {
        let started = Instant::now();
        info!(
            "sync run started: {} partitions, concurrency {}",
            partitions.len(),
            self.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();

        for partition_id in partitions {
            let semaphore = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let cache = self.cache.clone();
            let cursors = self.cursors.clone();
            let identity = self.identity.clone();
            let mirror = self.mirror.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return (
                            partition_id,
                            Err(SyncError::Config(format!("worker pool closed: {}", e))),
                        )
                    }
                };
                let outcome =
                    sync_partition(fetcher, cache, cursors, identity, mirror, partition_id).await;
                (partition_id, outcome)
            });
        }

        let mut outcomes = Vec::new();
        let mut fatal: Option<SyncError> = None;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((partition_id, Ok(outcome))) => {
                    info!(
                        "partition {} done: {} ({} fetched, {} inserted, {} updated)",
                        partition_id,
                        outcome.status,
                        outcome.fetched,
                        outcome.inserted,
                        outcome.updated
                    );
                    outcomes.push(outcome);
                }
                Ok((partition_id, Err(e))) => match e {
                    SyncError::MergeIo(_) if fatal.is_none() => {
                        error!(
                            "partition {}: merge failed, aborting run: {}",
                            partition_id, e
                        );
                        fatal = Some(e);
                        join_set.abort_all();
                    }
                    e => {
                        error!("partition {} failed: {}", partition_id, e);
                        outcomes.push(PartitionOutcome::failed(partition_id, e.to_string()));
                    }
                },
                Err(join_err) => {
                    if !join_err.is_cancelled() {
                        error!("partition task join failed: {}", join_err);
                    }
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let report = SyncReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        info!("sync run finished: {}", report);
        Ok(report)
    }
}

async fn sync_partition(
    fetcher: Arc<Fetcher>,
    cache: Arc<CacheStore>,
    cursors: Arc<Mutex<CursorStore>>,
    identity: Arc<Mutex<IdentityResolver>>,
    mirror: Option<Arc<dyn RecordMirror>>,
    partition_id: u64,
) -> SyncResult<PartitionOutcome> {
    debug!("partition {}: FETCHING", partition_id);
    let after = { cursors.lock().await.get(partition_id) };
    let raws = fetcher.fetch_since(partition_id, after).await?;

    debug!("partition {}: NORMALIZING {} raw records", partition_id, raws.len());
    let mut records = Vec::with_capacity(raws.len());
    {
        let mut identity = identity.lock().await;
        for raw in &raws {
            if raw.actor.bot {
                continue;
            }
            identity.observe(raw.actor.id, &raw.actor.display_name);
            records.push(normalize(raw));
        }
    }

    let fetched = records.len() as u32;
    if records.is_empty() {
        // nothing new; cursor and snapshot stay exactly as they were
        return Ok(PartitionOutcome {
            partition_id,
            status: PartitionStatus::Empty,
            fetched: 0,
            inserted: 0,
            updated: 0,
            error: None,
        });
    }

    debug!("partition {}: MERGING {} records", partition_id, fetched);
    let result = cache.merge(partition_id, records.clone()).await?;

    if let Some(mirror) = mirror {
        if let Err(e) = mirror.push_records(partition_id, &records).await {
            warn!(
                "partition {}: mirror push failed (ignored): {}",
                partition_id, e
            );
        }
    }

    // The cursor only moves once the batch is durably on disk.
    if let Some(high_water_mark) = result.high_water_mark {
        cursors.lock().await.advance(partition_id, high_water_mark)?;
    }

    Ok(PartitionOutcome {
        partition_id,
        status: PartitionStatus::Advanced,
        fetched,
        inserted: result.inserted,
        updated: result.updated,
        error: None,
    })
}
