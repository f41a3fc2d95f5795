use crate::def::*;
use log::*;
use std::collections::HashMap;

/// Per-partition high-water marks. Marks are derived from the snapshot at
/// startup (max `occurred_at` per partition), held in memory during the run
/// and advanced only after the corresponding batch has been durably merged.
pub struct CursorStore {
    marks: HashMap<u64, i64>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self {
            marks: HashMap::new(),
        }
    }

    pub fn from_marks(marks: HashMap<u64, i64>) -> Self {
        Self { marks }
    }

    /// `None` means the partition has never been seen: fetch everything.
    pub fn get(&self, partition_id: u64) -> Option<i64> {
        self.marks.get(&partition_id).copied()
    }

    /// Moves a partition's mark forward. A proposed mark earlier than the
    /// stored one is a caller bug and is rejected loudly; an equal mark is
    /// accepted (re-merging an identical batch lands on the same value).
    pub fn advance(&mut self, partition_id: u64, high_water_mark: i64) -> SyncResult<()> {
        if let Some(&stored) = self.marks.get(&partition_id) {
            if high_water_mark < stored {
                error!(
                    "cursor regression on partition {}: stored {}, proposed {}",
                    partition_id, stored, high_water_mark
                );
                return Err(SyncError::Regression {
                    partition_id,
                    stored,
                    proposed: high_water_mark,
                });
            }
        }
        self.marks.insert(partition_id, high_water_mark);
        debug!(
            "partition {} cursor advanced to {}",
            partition_id, high_water_mark
        );
        Ok(())
    }
}

impl Default for CursorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_partition_has_no_mark() {
        let store = CursorStore::new();
        assert_eq!(store.get(1), None);
    }

    #[test]
    fn test_advance_and_get() {
        let mut store = CursorStore::new();
        store.advance(1, 100).unwrap();
        assert_eq!(store.get(1), Some(100));
        store.advance(1, 200).unwrap();
        assert_eq!(store.get(1), Some(200));
    }

    #[test]
    fn test_equal_mark_is_accepted() {
        let mut store = CursorStore::new();
        store.advance(1, 100).unwrap();
        store.advance(1, 100).unwrap();
        assert_eq!(store.get(1), Some(100));
    }

    #[test]
    fn test_regression_is_rejected() {
        let mut store = CursorStore::new();
        store.advance(1, 200).unwrap();
        let err = store.advance(1, 100).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Regression {
                partition_id: 1,
                stored: 200,
                proposed: 100
            }
        ));
        // the stored mark is untouched by the failed advance
        assert_eq!(store.get(1), Some(200));
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut store = CursorStore::new();
        store.advance(1, 500).unwrap();
        store.advance(2, 50).unwrap();
        assert_eq!(store.get(1), Some(500));
        assert_eq!(store.get(2), Some(50));
    }
}
