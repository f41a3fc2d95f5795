use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const SERVICE_NAME: &str = "activity_sync";
pub const CACHE_FILENAME: &str = "activity_cache.json";
pub const SNAPSHOT_VERSION: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
//mirror pushes are chunked to stay under the document store's batch limit
pub const MIRROR_BATCH_SIZE: usize = 400;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),
    #[error("Permanent fetch error: {0}")]
    PermanentFetch(String),
    #[error(
        "Cursor regression on partition {partition_id}: stored {stored}, proposed {proposed}"
    )]
    Regression {
        partition_id: u64,
        stored: i64,
        proposed: i64,
    },
    #[error("Merge IO error: {0}")]
    MergeIo(String),
    #[error("Mirror error: {0}")]
    Mirror(String),
    #[error("Config error: {0}")]
    Config(String),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// One normalized activity item. Immutable once built: normalizing the same
/// raw record again must produce an equal value, so `PartialEq` is part of
/// the contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub partition_id: u64,
    pub actor_id: u64,
    /// Unix timestamp in milliseconds, the ordering source.
    pub occurred_at: i64,
    #[serde(default)]
    pub edited_at: Option<i64>,
    pub content_len: u32,
    #[serde(default)]
    pub attachments: u32,
    #[serde(default)]
    pub embeds: u32,
    #[serde(default)]
    pub reaction_count: u32,
    #[serde(default)]
    pub mention_ids: Vec<u64>,
    #[serde(default)]
    pub reply_to_id: Option<u64>,
    #[serde(default)]
    pub reply_to_actor_id: Option<u64>,
    #[serde(default)]
    pub thread_id: Option<u64>,
    #[serde(default)]
    pub pinned: bool,
}

/// A persisted actor-id to display-name observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActorName {
    pub actor_id: u64,
    pub display_name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeResult {
    pub inserted: u32,
    pub updated: u32,
    /// Max `occurred_at` among the merged batch, `None` for an empty batch
    /// (the caller must then leave the partition cursor untouched).
    pub high_water_mark: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PartitionStatus {
    Advanced,
    Empty,
    Failed,
}

impl std::fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PartitionStatus::Advanced => write!(f, "Advanced"),
            PartitionStatus::Empty => write!(f, "Empty"),
            PartitionStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PartitionOutcome {
    pub partition_id: u64,
    pub status: PartitionStatus,
    pub fetched: u32,
    pub inserted: u32,
    pub updated: u32,
    pub error: Option<String>,
}

impl PartitionOutcome {
    pub fn failed(partition_id: u64, reason: String) -> Self {
        Self {
            partition_id,
            status: PartitionStatus::Failed,
            fetched: 0,
            inserted: 0,
            updated: 0,
            error: Some(reason),
        }
    }
}

#[derive(Debug)]
pub struct SyncReport {
    pub outcomes: Vec<PartitionOutcome>,
    pub elapsed: Duration,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status != PartitionStatus::Failed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == PartitionStatus::Failed)
            .count()
    }

    pub fn total_inserted(&self) -> u64 {
        self.outcomes.iter().map(|o| o.inserted as u64).sum()
    }

    pub fn total_updated(&self) -> u64 {
        self.outcomes.iter().map(|o| o.updated as u64).sum()
    }

    pub fn outcome(&self, partition_id: u64) -> Option<&PartitionOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.partition_id == partition_id)
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} partitions ok, {} failed, {} inserted, {} updated in {:.1}s",
            self.succeeded(),
            self.failed(),
            self.total_inserted(),
            self.total_updated(),
            self.elapsed.as_secs_f64()
        )
    }
}
