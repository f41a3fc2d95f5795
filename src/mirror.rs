use crate::def::*;
use crate::def::Record;
use async_trait::async_trait;
use log::*;
use reqwest::Client;

/// Best-effort side channel that pushes merged records to an external
/// document store. Callers must treat failures as advisory: the local cache
/// merge is the source of truth and never waits on or fails with the mirror.
#[async_trait]
pub trait RecordMirror: Send + Sync {
    async fn push_records(&self, partition_id: u64, records: &[Record]) -> SyncResult<()>;
}

pub struct HttpMirror {
    client: Client,
    endpoint: String,
}

impl HttpMirror {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RecordMirror for HttpMirror {
    async fn push_records(&self, partition_id: u64, records: &[Record]) -> SyncResult<()> {
        let url = format!("{}/partitions/{}/records", self.endpoint, partition_id);
        for batch in records.chunks(MIRROR_BATCH_SIZE) {
            let resp = self
                .client
                .post(&url)
                .json(batch)
                .send()
                .await
                .map_err(|e| SyncError::Mirror(format!("push to {}: {}", url, e)))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(SyncError::Mirror(format!(
                    "push to {}: status {}",
                    url, status
                )));
            }
            debug!(
                "mirrored {} records for partition {} to {}",
                batch.len(),
                partition_id,
                url
            );
        }
        Ok(())
    }
}
