use super::MessageStore;
use crate::error::{StorageError, StorageResult};
use crate::record::{ProtocolMessageRecord, RecordUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devcomm_core::LifecycleState;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Store keeping every record in a map behind one lock.
///
/// The lock is never held across an await, so a plain `std` mutex is used.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    records: Mutex<HashMap<String, ProtocolMessageRecord>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, ProtocolMessageRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Snapshot of every record, for inspection in tests and diagnostics.
    pub fn snapshot(&self) -> Vec<ProtocolMessageRecord> {
        let mut all: Vec<_> = self.records().values().cloned().collect();
        all.sort_by(|a, b| a.receive_time.cmp(&b.receive_time));
        all
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, record: &ProtocolMessageRecord) -> StorageResult<()> {
        let mut records = self.records();
        if records.contains_key(&record.message_id) {
            return Err(StorageError::Duplicate(record.message_id.clone()));
        }
        records.insert(record.message_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, message_id: &str) -> StorageResult<Option<ProtocolMessageRecord>> {
        Ok(self.records().get(message_id).cloned())
    }

    async fn transition(
        &self,
        message_id: &str,
        expected: LifecycleState,
        update: &RecordUpdate,
    ) -> StorageResult<bool> {
        let mut records = self.records();
        match records.get_mut(message_id) {
            Some(record) if record.lifecycle_state == expected => {
                record.apply(update);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_key(
        &self,
        device_id: &str,
        sequence_number: u32,
    ) -> StorageResult<Vec<ProtocolMessageRecord>> {
        let mut found: Vec<_> = self
            .records()
            .values()
            .filter(|r| r.dedup_key() == Some((device_id, sequence_number)))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.receive_time.cmp(&b.receive_time));
        Ok(found)
    }

    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ProtocolMessageRecord>> {
        let mut due: Vec<_> = self
            .records()
            .values()
            .filter(|r| {
                !r.deleted
                    && r.lifecycle_state == LifecycleState::RetryScheduled
                    && r.next_retry_time.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.next_retry_time.cmp(&b.next_retry_time))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn list_by_state(
        &self,
        state: LifecycleState,
        limit: usize,
    ) -> StorageResult<Vec<ProtocolMessageRecord>> {
        let mut found: Vec<_> = self
            .records()
            .values()
            .filter(|r| !r.deleted && r.lifecycle_state == state)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.receive_time.cmp(&b.receive_time));
        found.truncate(limit);
        Ok(found)
    }

    async fn count_by_state(&self) -> StorageResult<Vec<(LifecycleState, u64)>> {
        let records = self.records();
        Ok(LifecycleState::ALL
            .into_iter()
            .map(|state| {
                let count = records
                    .values()
                    .filter(|r| !r.deleted && r.lifecycle_state == state)
                    .count() as u64;
                (state, count)
            })
            .collect())
    }

    async fn soft_delete(&self, message_id: &str) -> StorageResult<bool> {
        let mut records = self.records();
        match records.get_mut(message_id) {
            Some(record) if record.is_terminal() && !record.deleted => {
                record.deleted = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use devcomm_core::Priority;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap()
    }

    fn record(priority: Priority) -> ProtocolMessageRecord {
        ProtocolMessageRecord::received(&"dev-1".parse().unwrap(), "P", &[1, 2, 3], priority, 3, t0())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryMessageStore::new();
        let r = record(Priority::Medium);
        store.insert(&r).await.unwrap();

        assert_eq!(store.get(&r.message_id).await.unwrap(), Some(r.clone()));
        assert!(matches!(
            store.insert(&r).await,
            Err(StorageError::Duplicate(_))
        ));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let store = InMemoryMessageStore::new();
        let r = record(Priority::Medium);
        store.insert(&r).await.unwrap();

        let to_parsed = RecordUpdate::to(LifecycleState::Parsed);
        assert!(
            store
                .transition(&r.message_id, LifecycleState::Received, &to_parsed)
                .await
                .unwrap()
        );
        // second writer still expects RECEIVED
        assert!(
            !store
                .transition(&r.message_id, LifecycleState::Received, &to_parsed)
                .await
                .unwrap()
        );
        assert!(
            !store
                .transition("missing", LifecycleState::Received, &to_parsed)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_due_retries_order() {
        let store = InMemoryMessageStore::new();
        let mut ids = Vec::new();
        for (priority, offset) in [
            (Priority::Low, 0),
            (Priority::High, 30),
            (Priority::High, 10),
            (Priority::Medium, 5),
            (Priority::High, 500),
        ] {
            let r = record(priority);
            store.insert(&r).await.unwrap();
            store
                .transition(
                    &r.message_id,
                    LifecycleState::Received,
                    &RecordUpdate::to(LifecycleState::RetryScheduled)
                        .next_retry_time(t0() + Duration::seconds(offset)),
                )
                .await
                .unwrap();
            ids.push(r.message_id);
        }

        let due = store.due_retries(t0() + Duration::seconds(60), 10).await.unwrap();
        let order: Vec<_> = due.iter().map(|r| r.message_id.clone()).collect();
        assert_eq!(order, vec![ids[2].clone(), ids[1].clone(), ids[3].clone(), ids[0].clone()]);

        let limited = store.due_retries(t0() + Duration::seconds(60), 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_soft_delete_only_terminal() {
        let store = InMemoryMessageStore::new();
        let r = record(Priority::Medium);
        store.insert(&r).await.unwrap();

        assert!(!store.soft_delete(&r.message_id).await.unwrap());

        store
            .transition(
                &r.message_id,
                LifecycleState::Received,
                &RecordUpdate::to(LifecycleState::Ignored),
            )
            .await
            .unwrap();
        assert!(store.soft_delete(&r.message_id).await.unwrap());
        assert!(!store.soft_delete(&r.message_id).await.unwrap());

        let counts = store.count_by_state().await.unwrap();
        assert!(counts.iter().all(|(_, n)| *n == 0));
        assert_eq!(store.len(), 1);
    }
}
