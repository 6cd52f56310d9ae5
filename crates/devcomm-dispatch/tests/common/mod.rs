//! Shared fixtures for dispatch integration tests.
//!
//! [`ScriptedClient`] decides per `userId` how the business service
//! behaves, so a single batch can mix fast, slow and failing calls.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use devcomm_core::{LifecycleState, ManualClock};
use devcomm_dispatch::{
    BackoffConfig, DispatchConfig, DispatchCoordinator, IngestRequest, LifecycleManager,
};
use devcomm_protocol::adapters::access;
use devcomm_protocol::{
    AdapterRegistry, BusinessRequest, BusinessServiceClient, FrameBuilder, ServiceError,
    ServiceResponse,
};
use devcomm_storage::{
    InMemoryMessageStore, MessageStore, ProtocolMessageRecord, RecordUpdate, StorageError,
    StorageResult,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const ACCESS_MODEL: &str = "F18";
pub const DEVICE_CODE: &str = "DEV001";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap()
}

pub fn access_record(seq: u32, user_id: u32) -> Bytes {
    FrameBuilder::new(access::ACCESS_RECORD, DEVICE_CODE, seq)
        .u32(user_id)
        .u8(0)
        .u8(1)
        .u8(1)
        .build()
}

pub fn request(device: &str, frame: impl Into<Bytes>) -> IngestRequest {
    IngestRequest::new(device.parse().unwrap(), ACCESS_MODEL, frame)
}

/// Process timeout 3s, fixed 5s backoff, three attempts.
pub fn test_config() -> DispatchConfig {
    DispatchConfig::new()
        .process_timeout(Duration::from_secs(3))
        .backoff(BackoffConfig::Fixed { delay_ms: 5_000 })
        .max_retry_count(3)
}

#[derive(Default)]
pub struct ScriptedClient {
    requests: Mutex<Vec<BusinessRequest>>,
    slow: HashMap<u64, Duration>,
    unavailable: Mutex<HashMap<u64, usize>>,
    rejected: HashSet<u64>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls for `user` take `by` before answering.
    pub fn slow(mut self, user: u64, by: Duration) -> Self {
        self.slow.insert(user, by);
        self
    }

    /// The first `times` calls for `user` report the service unavailable.
    pub fn unavailable(self, user: u64, times: usize) -> Self {
        self.unavailable.lock().unwrap().insert(user, times);
        self
    }

    pub fn reject(mut self, user: u64) -> Self {
        self.rejected.insert(user);
        self
    }

    /// Every call takes `delay`.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_for(&self, user: u64) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.payload["userId"].as_u64() == Some(user))
            .count()
    }

    /// `sequenceNumber` of every call for `device`, in call order.
    pub fn sequences_for(&self, device: &str) -> Vec<u64> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.payload["deviceId"] == device)
            .filter_map(|r| r.payload["sequenceNumber"].as_u64())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusinessServiceClient for ScriptedClient {
    async fn call(&self, request: BusinessRequest) -> Result<ServiceResponse, ServiceError> {
        let user = request.payload["userId"].as_u64().unwrap_or_default();
        let path = request.action_path.clone();
        self.requests.lock().unwrap().push(request);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(by) = self.slow.get(&user) {
            tokio::time::sleep(*by).await;
        }
        let answer = {
            let mut unavailable = self.unavailable.lock().unwrap();
            match unavailable.get_mut(&user) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(ServiceError::Unavailable(path))
                }
                _ if self.rejected.contains(&user) => Ok(ServiceResponse::failed(Value::Null)),
                _ => Ok(ServiceResponse::success(Value::Null)),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

/// In-memory store whose writes into chosen states can be made to fail.
pub struct FlakyStore {
    inner: Arc<InMemoryMessageStore>,
    failing: Mutex<HashMap<LifecycleState, usize>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryMessageStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashMap::new()),
        }
    }

    /// The next `times` transitions into `state` fail without writing.
    pub fn fail_writes_into(&self, state: LifecycleState, times: usize) {
        self.failing.lock().unwrap().insert(state, times);
    }

    fn trip(&self, state: LifecycleState) -> StorageResult<()> {
        let mut failing = self.failing.lock().unwrap();
        match failing.get_mut(&state) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(StorageError::Database(sqlx::Error::PoolTimedOut))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn insert(&self, record: &ProtocolMessageRecord) -> StorageResult<()> {
        self.inner.insert(record).await
    }

    async fn get(&self, message_id: &str) -> StorageResult<Option<ProtocolMessageRecord>> {
        self.inner.get(message_id).await
    }

    async fn transition(
        &self,
        message_id: &str,
        expected: LifecycleState,
        update: &RecordUpdate,
    ) -> StorageResult<bool> {
        self.trip(update.state)?;
        self.inner.transition(message_id, expected, update).await
    }

    async fn find_by_key(
        &self,
        device_id: &str,
        sequence_number: u32,
    ) -> StorageResult<Vec<ProtocolMessageRecord>> {
        self.inner.find_by_key(device_id, sequence_number).await
    }

    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ProtocolMessageRecord>> {
        self.inner.due_retries(now, limit).await
    }

    async fn list_by_state(
        &self,
        state: LifecycleState,
        limit: usize,
    ) -> StorageResult<Vec<ProtocolMessageRecord>> {
        self.inner.list_by_state(state, limit).await
    }

    async fn count_by_state(&self) -> StorageResult<Vec<(LifecycleState, u64)>> {
        self.inner.count_by_state().await
    }

    async fn soft_delete(&self, message_id: &str) -> StorageResult<bool> {
        self.inner.soft_delete(message_id).await
    }
}

pub struct Harness {
    pub coordinator: DispatchCoordinator,
    pub store: Arc<InMemoryMessageStore>,
    pub clock: Arc<ManualClock>,
    pub client: Arc<ScriptedClient>,
}

impl Harness {
    pub fn new(client: ScriptedClient, config: DispatchConfig) -> Self {
        let store = Arc::new(InMemoryMessageStore::new());
        Self::build(client, config, store.clone(), store)
    }

    /// Harness writing through a [`FlakyStore`] over its in-memory store.
    pub fn flaky(client: ScriptedClient, config: DispatchConfig) -> (Self, Arc<FlakyStore>) {
        let store = Arc::new(InMemoryMessageStore::new());
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        (Self::build(client, config, flaky.clone(), store), flaky)
    }

    fn build(
        client: ScriptedClient,
        config: DispatchConfig,
        writes: Arc<dyn MessageStore>,
        store: Arc<InMemoryMessageStore>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let client = Arc::new(client);
        let lifecycle = Arc::new(LifecycleManager::new(
            writes,
            clock.clone(),
            config.backoff.build(),
        ));
        let registry = Arc::new(AdapterRegistry::with_builtin(client.clone()));
        Self {
            coordinator: DispatchCoordinator::new(registry, lifecycle, config),
            store,
            clock,
            client,
        }
    }

    pub fn advance(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }

    pub async fn record(&self, message_id: &str) -> ProtocolMessageRecord {
        self.store.get(message_id).await.unwrap().unwrap()
    }
}
