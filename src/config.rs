use crate::def::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// Service settings, deserialized from a JSON file. The API token is
/// deliberately not part of the file; it comes from the environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    pub api_base_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    /// When non-empty, only these partitions are synced.
    #[serde(default)]
    pub include_partitions: Vec<u64>,
    #[serde(default)]
    pub exclude_partitions: Vec<u64>,
    /// Operator-supplied renames/merges; these always beat observed names.
    #[serde(default)]
    pub identity_overrides: HashMap<u64, String>,
    #[serde(default = "default_sentinel")]
    pub deleted_actor_sentinel: String,
    /// Optional document-store endpoint for best-effort mirroring.
    #[serde(default)]
    pub mirror_endpoint: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    30
}

fn default_sentinel() -> String {
    "Deleted User".to_string()
}

impl SyncConfig {
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            error!("failed to read config {:?}: {}", path, e);
            SyncError::Config(format!("read {:?}: {}", path, e))
        })?;
        let config: SyncConfig = serde_json::from_str(&content).map_err(|e| {
            error!("failed to parse config {:?}: {}", path, e);
            SyncError::Config(format!("parse {:?}: {}", path, e))
        })?;
        if config.api_base_url.is_empty() {
            return Err(SyncError::Config("api_base_url is empty".to_string()));
        }
        Ok(config)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILENAME)
    }

    /// Applies the include/exclude lists to a discovered partition set.
    pub fn select_partitions(&self, discovered: Vec<u64>) -> Vec<u64> {
        let mut selected: Vec<u64> = if self.include_partitions.is_empty() {
            discovered
        } else {
            discovered
                .into_iter()
                .filter(|p| self.include_partitions.contains(p))
                .collect()
        };
        selected.retain(|p| !self.exclude_partitions.contains(p));
        selected
    }
}
