//! Record stores.
//!
//! Every state change goes through [`MessageStore::transition`], a
//! compare-and-swap on `lifecycle_state`: the update is applied only if the
//! record is still in the expected state. Two workers racing for the same
//! record therefore cannot both move it forward.

mod memory;
mod sqlite;

pub use memory::InMemoryMessageStore;
pub use sqlite::SqliteMessageStore;

use crate::error::StorageResult;
use crate::record::{ProtocolMessageRecord, RecordUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devcomm_core::LifecycleState;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new record.
    async fn insert(&self, record: &ProtocolMessageRecord) -> StorageResult<()>;

    async fn get(&self, message_id: &str) -> StorageResult<Option<ProtocolMessageRecord>>;

    /// Apply `update` if the record is currently in `expected`.
    ///
    /// Returns `false` when the record is in another state or missing.
    async fn transition(
        &self,
        message_id: &str,
        expected: LifecycleState,
        update: &RecordUpdate,
    ) -> StorageResult<bool>;

    /// Records sharing a deduplication key, archived ones included.
    async fn find_by_key(
        &self,
        device_id: &str,
        sequence_number: u32,
    ) -> StorageResult<Vec<ProtocolMessageRecord>>;

    /// `RETRY_SCHEDULED` records due at `now`, highest priority first, then
    /// earliest due.
    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ProtocolMessageRecord>>;

    /// Records in a state, oldest first.
    async fn list_by_state(
        &self,
        state: LifecycleState,
        limit: usize,
    ) -> StorageResult<Vec<ProtocolMessageRecord>>;

    /// Number of non-archived records per state.
    async fn count_by_state(&self) -> StorageResult<Vec<(LifecycleState, u64)>>;

    /// Archive a terminal record. Returns `false` if the record is missing,
    /// not terminal, or already archived.
    async fn soft_delete(&self, message_id: &str) -> StorageResult<bool>;
}
