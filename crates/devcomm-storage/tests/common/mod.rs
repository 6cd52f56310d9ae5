#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use devcomm_core::{LifecycleState, Priority};
use devcomm_storage::{
    Database, InMemoryMessageStore, MessageStore, ProtocolMessageRecord, RecordUpdate,
    SqliteMessageStore,
};
use std::sync::Arc;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap()
}

pub fn record(device: &str, priority: Priority, received_after_secs: i64) -> ProtocolMessageRecord {
    ProtocolMessageRecord::received(
        &device.parse().unwrap(),
        "ACCESS_ENTROPY_V4_8",
        &[0xAA, 0x55, 0x01, 0x02],
        priority,
        3,
        t0() + Duration::seconds(received_after_secs),
    )
}

pub async fn sqlite_store() -> Arc<dyn MessageStore> {
    let db = Database::in_memory().await.unwrap();
    Arc::new(SqliteMessageStore::new(db.pool().clone()))
}

pub fn memory_store() -> Arc<dyn MessageStore> {
    Arc::new(InMemoryMessageStore::new())
}

/// Walk a freshly inserted record to `PARSED` with the given sequence number.
pub async fn parse_as(store: &dyn MessageStore, record: &ProtocolMessageRecord, seq: u32) {
    let update = RecordUpdate {
        sequence_number: Some(seq),
        message_type: Some("ACCESS_RECORD".into()),
        ..RecordUpdate::to(LifecycleState::Parsed)
    };
    assert!(
        store
            .transition(&record.message_id, LifecycleState::Received, &update)
            .await
            .unwrap()
    );
}

/// Schedule a received record for retry at `t0 + offset`.
pub async fn schedule(store: &dyn MessageStore, record: &ProtocolMessageRecord, offset_secs: i64) {
    let failed = RecordUpdate::to(LifecycleState::Failed).error("PROCESS_DOWNSTREAM_TIMEOUT", "slow");
    assert!(
        store
            .transition(&record.message_id, LifecycleState::Received, &failed)
            .await
            .unwrap()
    );
    let scheduled = RecordUpdate::to(LifecycleState::RetryScheduled)
        .retry_count(1)
        .next_retry_time(t0() + Duration::seconds(offset_secs));
    assert!(
        store
            .transition(&record.message_id, LifecycleState::Failed, &scheduled)
            .await
            .unwrap()
    );
}
