use crate::def::*;
use crate::remote::{RawRecord, RemoteApi};
use log::*;
use std::sync::Arc;
use std::time::Duration;

/// Retry behavior for one page request. Transient failures are retried up to
/// `max_attempts` with a fixed delay; permanent failures short-circuit.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(30),
        }
    }
}

/// Pulls every record strictly newer than a partition's cursor, paging
/// internally. Pages already collected are never re-fetched: a retry only
/// repeats the page that failed. No cache or cursor side effects.
pub struct Fetcher {
    remote: Arc<dyn RemoteApi>,
    policy: RetryPolicy,
    page_size: u32,
}

impl Fetcher {
    pub fn new(remote: Arc<dyn RemoteApi>, policy: RetryPolicy, page_size: u32) -> Self {
        Self {
            remote,
            policy,
            page_size: page_size.max(1),
        }
    }

    pub async fn fetch_since(
        &self,
        partition_id: u64,
        after: Option<i64>,
    ) -> SyncResult<Vec<RawRecord>> {
        let mut collected: Vec<RawRecord> = Vec::new();
        let mut cursor = after;

        loop {
            let page = self.fetch_page_with_retry(partition_id, cursor).await?;
            let page_len = page.len();
            let mut kept = 0usize;

            for raw in page {
                // Guard the ascending contract; a disordered or stale entry
                // would silently corrupt the high-water mark downstream.
                if let Some(c) = cursor {
                    if raw.occurred_at <= c {
                        warn!(
                            "partition {}: dropping out-of-order record {} (occurred_at {} <= cursor {})",
                            partition_id, raw.id, raw.occurred_at, c
                        );
                        continue;
                    }
                }
                cursor = Some(raw.occurred_at);
                collected.push(raw);
                kept += 1;
            }

            if (page_len as u32) < self.page_size {
                break;
            }
            if kept == 0 {
                // A full page with nothing newer than the cursor means the
                // remote ignored `after`; stop instead of spinning on it.
                warn!(
                    "partition {}: full page contained no new records, stopping",
                    partition_id
                );
                break;
            }
        }

        debug!(
            "partition {}: fetched {} records since {:?}",
            partition_id,
            collected.len(),
            after
        );
        Ok(collected)
    }

    async fn fetch_page_with_retry(
        &self,
        partition_id: u64,
        after: Option<i64>,
    ) -> SyncResult<Vec<RawRecord>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .remote
                .fetch_page(partition_id, after, self.page_size)
                .await
            {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() => {
                    if attempt >= self.policy.max_attempts {
                        error!(
                            "partition {}: giving up after {} attempts: {}",
                            partition_id, attempt, e
                        );
                        return Err(SyncError::TransientFetch(format!(
                            "partition {}: {} (after {} attempts)",
                            partition_id, e, attempt
                        )));
                    }
                    warn!(
                        "partition {}: attempt {}/{} failed: {}, retrying in {:?}",
                        partition_id, attempt, self.policy.max_attempts, e, self.policy.retry_delay
                    );
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(e) => {
                    warn!("partition {}: permanent failure: {}", partition_id, e);
                    return Err(SyncError::PermanentFetch(format!(
                        "partition {}: {}",
                        partition_id, e
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{FetchError, RawActor};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn raw(id: u64, occurred_at: i64) -> RawRecord {
        RawRecord {
            id,
            partition_id: 1,
            actor: RawActor {
                id: 100,
                display_name: "alice".to_string(),
                bot: false,
            },
            occurred_at,
            edited_at: None,
            content: String::new(),
            attachments: vec![],
            embeds: vec![],
            reactions: vec![],
            mentions: vec![],
            reference: None,
            thread_id: None,
            pinned: false,
        }
    }

    /// Replays a scripted sequence of page results, counting calls.
    struct ScriptedRemote {
        pages: Mutex<VecDeque<Result<Vec<RawRecord>, FetchError>>>,
        calls: AtomicU32,
    }

    impl ScriptedRemote {
        fn new(pages: Vec<Result<Vec<RawRecord>, FetchError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteApi for ScriptedRemote {
        async fn list_partitions(&self) -> Result<Vec<u64>, FetchError> {
            Ok(vec![1])
        }

        async fn fetch_page(
            &self,
            _partition_id: u64,
            _after: Option<i64>,
            _limit: u32,
        ) -> Result<Vec<RawRecord>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            retry_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_paging_assembles_full_history() {
        let remote = Arc::new(ScriptedRemote::new(vec![
            Ok(vec![raw(1, 10), raw(2, 20)]),
            Ok(vec![raw(3, 30), raw(4, 40)]),
            Ok(vec![raw(5, 50)]),
        ]));
        let fetcher = Fetcher::new(remote.clone(), fast_policy(3), 2);

        let records = fetcher.fetch_since(1, None).await.unwrap();
        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        // two full pages plus the short terminal page
        assert_eq!(remote.call_count(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let remote = Arc::new(ScriptedRemote::new(vec![
            Err(FetchError::transient("overloaded")),
            Err(FetchError::transient("overloaded")),
            Ok(vec![raw(1, 10)]),
        ]));
        let fetcher = Fetcher::new(remote.clone(), fast_policy(3), 100);

        let records = fetcher.fetch_since(1, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(remote.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_repeats_only_the_failed_page() {
        // page one succeeds, page two fails once then succeeds; the retry
        // must not re-request the page already collected
        let remote = Arc::new(ScriptedRemote::new(vec![
            Ok(vec![raw(1, 10), raw(2, 20)]),
            Err(FetchError::transient("overloaded")),
            Ok(vec![raw(3, 30)]),
        ]));
        let fetcher = Fetcher::new(remote.clone(), fast_policy(3), 2);

        let records = fetcher.fetch_since(1, None).await.unwrap();
        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        // one call for page one, two for page two: page one is never refetched
        assert_eq!(remote.call_count(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_retries() {
        let remote = Arc::new(ScriptedRemote::new(vec![
            Err(FetchError::transient("overloaded")),
            Err(FetchError::transient("overloaded")),
            Err(FetchError::transient("overloaded")),
        ]));
        let fetcher = Fetcher::new(remote.clone(), fast_policy(3), 100);

        let err = fetcher.fetch_since(1, None).await.unwrap_err();
        assert!(matches!(err, SyncError::TransientFetch(_)));
        assert_eq!(remote.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_never_retried() {
        let remote = Arc::new(ScriptedRemote::new(vec![Err(FetchError::permanent(
            "access denied",
        ))]));
        let fetcher = Fetcher::new(remote.clone(), fast_policy(5), 100);

        let err = fetcher.fetch_since(1, None).await.unwrap_err();
        assert!(matches!(err, SyncError::PermanentFetch(_)));
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_records_at_or_before_cursor_are_dropped() {
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(vec![
            raw(1, 10),
            raw(2, 10),
            raw(3, 30),
        ])]));
        let fetcher = Fetcher::new(remote, fast_policy(3), 100);

        let records = fetcher.fetch_since(1, Some(10)).await.unwrap();
        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3]);
    }
}
