//! Concurrent ingestion of device frames.
//!
//! Each device gets one sequential lane: an `mpsc` channel drained by a
//! dedicated task, so frames of one device are handled in arrival order
//! while different devices proceed in parallel. A shared semaphore caps
//! how many lanes may be processing at once. Submitters receive the outcome
//! over a `oneshot` channel.
//!
//! A lane that stays idle for `lane_idle_timeout` closes its channel,
//! drains what was already queued and removes itself. A lane opened for the
//! same device in the meantime waits for its predecessor to finish first.

use crate::config::DispatchConfig;
use crate::lifecycle::LifecycleManager;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use devcomm_core::constants::PROTOCOL_UNRESOLVED;
use devcomm_core::{
    DeviceId, Error, LifecycleState, Priority, ProcessError, Result, ValidationError,
};
use devcomm_protocol::{AdapterRegistry, ParsedMessage, ProcessContext, ProtocolAdapter};
use devcomm_storage::ProtocolMessageRecord;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A raw frame as handed over by the transport.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub device_id: DeviceId,
    pub device_model: String,
    pub frame: Bytes,
    pub session_id: Option<String>,
    pub priority: Priority,
    pub signature: Option<String>,
}

impl IngestRequest {
    pub fn new(device_id: DeviceId, device_model: impl Into<String>, frame: impl Into<Bytes>) -> Self {
        Self {
            device_id,
            device_model: device_model.into(),
            frame: frame.into(),
            session_id: None,
            priority: Priority::default(),
            signature: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

fn hex_response<S: Serializer>(
    response: &Option<Bytes>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match response {
        Some(bytes) => serializer.serialize_some(&hex::encode_upper(bytes)),
        None => serializer.serialize_none(),
    }
}

/// Where one attempt left a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub message_id: String,
    pub device_id: String,
    pub protocol_type: String,
    pub message_type: Option<String>,
    pub state: LifecycleState,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub next_retry_time: Option<DateTime<Utc>>,
    /// ACK or NAK frame for the device; absent while a retry is pending or
    /// when the frame was too broken to address a reply
    #[serde(serialize_with = "hex_response")]
    pub response: Option<Bytes>,
}

impl DispatchOutcome {
    fn from_record(record: &ProtocolMessageRecord, response: Option<Bytes>) -> Self {
        Self {
            message_id: record.message_id.clone(),
            device_id: record.device_id.clone(),
            protocol_type: record.protocol_type.clone(),
            message_type: record.message_type.clone(),
            state: record.lifecycle_state,
            error_code: record.error_code.clone(),
            error_message: record.error_message.clone(),
            retry_count: record.retry_count,
            next_retry_time: record.next_retry_time,
            response,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.state == LifecycleState::Processed
    }
}

/// Result of one item of a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchItemOutcome {
    Completed(DispatchOutcome),
    /// Not finished by the batch deadline; still running in its lane
    TimedOut,
    /// Could not be dispatched at all
    Error { code: String, message: String },
}

impl BatchItemOutcome {
    fn error(err: &Error) -> Self {
        BatchItemOutcome::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn outcome(&self) -> Option<&DispatchOutcome> {
        match self {
            BatchItemOutcome::Completed(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Per-item outcomes of a batch, in submission order, with totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub items: Vec<BatchItemOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub ignored: usize,
    pub timed_out: usize,
}

impl BatchReport {
    fn from_items(items: Vec<BatchItemOutcome>) -> Self {
        let mut report = BatchReport {
            items: Vec::new(),
            succeeded: 0,
            failed: 0,
            ignored: 0,
            timed_out: 0,
        };
        for item in &items {
            match item {
                BatchItemOutcome::Completed(outcome) => match outcome.state {
                    LifecycleState::Processed => report.succeeded += 1,
                    LifecycleState::Ignored => report.ignored += 1,
                    _ => report.failed += 1,
                },
                BatchItemOutcome::TimedOut => report.timed_out += 1,
                BatchItemOutcome::Error { .. } => report.failed += 1,
            }
        }
        report.items = items;
        report
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

enum Work {
    Ingest(IngestRequest),
    Retry(ProtocolMessageRecord),
}

struct Job {
    work: Work,
    reply: oneshot::Sender<Result<DispatchOutcome>>,
}

type Reply = oneshot::Receiver<Result<DispatchOutcome>>;

struct Lane {
    id: u64,
    jobs: mpsc::Sender<Job>,
    /// Cancelled once the lane task has returned
    finished: CancellationToken,
}

struct Inner {
    registry: Arc<AdapterRegistry>,
    lifecycle: Arc<LifecycleManager>,
    config: DispatchConfig,
    workers: Semaphore,
    lanes: DashMap<DeviceId, Lane>,
    next_lane: AtomicU64,
    closed: CancellationToken,
}

/// Routes frames to adapters and records every attempt.
///
/// Cheap to clone; clones share lanes and the worker pool.
#[derive(Clone)]
pub struct DispatchCoordinator {
    inner: Arc<Inner>,
}

impl DispatchCoordinator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        lifecycle: Arc<LifecycleManager>,
        config: DispatchConfig,
    ) -> Self {
        let workers = Semaphore::new(config.max_concurrency.max(1));
        Self {
            inner: Arc::new(Inner {
                registry,
                lifecycle,
                config,
                workers,
                lanes: DashMap::new(),
                next_lane: AtomicU64::new(0),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.inner.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.inner.lifecycle
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Devices with an open lane.
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Dispatch one frame and wait for its outcome.
    ///
    /// Frame, validation and downstream failures are not errors here; they
    /// are reported in the outcome and persisted on the record. A storage
    /// failure halfway through an attempt reschedules the record and is
    /// reported the same way. Errors are reserved for storage failures the
    /// record could not be rescued from and for shutdown.
    pub async fn submit(&self, request: IngestRequest) -> Result<DispatchOutcome> {
        let device_id = request.device_id.clone();
        let reply = self.enqueue(&device_id, Work::Ingest(request)).await?;
        reply
            .await
            .map_err(|_| Error::LaneClosed(device_id.to_string()))?
    }

    /// Dispatch many frames and wait for them until the batch deadline.
    ///
    /// Frames are queued in the given order, so frames of the same device
    /// are processed in that order.
    pub async fn submit_batch(&self, requests: Vec<IngestRequest>) -> BatchReport {
        let deadline = Instant::now() + self.inner.config.batch_deadline;
        let total = requests.len();

        let mut pending: Vec<Option<(DeviceId, Reply)>> = Vec::with_capacity(total);
        let mut early: Vec<Option<BatchItemOutcome>> = Vec::with_capacity(total);
        for request in requests {
            let device_id = request.device_id.clone();
            match tokio::time::timeout_at(deadline, self.enqueue(&device_id, Work::Ingest(request)))
                .await
            {
                Ok(Ok(reply)) => {
                    pending.push(Some((device_id, reply)));
                    early.push(None);
                }
                Ok(Err(err)) => {
                    pending.push(None);
                    early.push(Some(BatchItemOutcome::error(&err)));
                }
                Err(_) => {
                    pending.push(None);
                    early.push(Some(BatchItemOutcome::TimedOut));
                }
            }
        }

        let waits = pending.into_iter().zip(early).map(|(pending, early)| async move {
            if let Some(item) = early {
                return item;
            }
            let Some((device_id, reply)) = pending else {
                return BatchItemOutcome::TimedOut;
            };
            match tokio::time::timeout_at(deadline, reply).await {
                Ok(Ok(Ok(outcome))) => BatchItemOutcome::Completed(outcome),
                Ok(Ok(Err(err))) => BatchItemOutcome::error(&err),
                Ok(Err(_)) => BatchItemOutcome::error(&Error::LaneClosed(device_id.to_string())),
                Err(_) => BatchItemOutcome::TimedOut,
            }
        });
        let report = BatchReport::from_items(futures::future::join_all(waits).await);

        info!(
            total,
            succeeded = report.succeeded,
            failed = report.failed,
            ignored = report.ignored,
            timed_out = report.timed_out,
            "batch dispatched"
        );
        report
    }

    /// Claim due retries and run them through their device lanes.
    ///
    /// Returns the outcomes of the attempts made.
    pub async fn sweep_retries(&self) -> Result<Vec<DispatchOutcome>> {
        let lifecycle = &self.inner.lifecycle;
        let claimed = lifecycle
            .claim_due_retries(self.inner.config.retry_sweep_batch)
            .await?;

        let mut pending = Vec::with_capacity(claimed.len());
        for record in claimed {
            let message_id = record.message_id.clone();
            let device_id: DeviceId = match record.device_id.parse() {
                Ok(device_id) => device_id,
                Err(err) => {
                    if let Err(failure) = lifecycle
                        .record_failure(&message_id, LifecycleState::Received, &err, 0)
                        .await
                    {
                        error!(message_id = %message_id, error = %failure, "cannot fail retry");
                    }
                    continue;
                }
            };
            match self.enqueue(&device_id, Work::Retry(record)).await {
                Ok(reply) => pending.push((message_id, device_id, reply)),
                Err(err) => self.release(&message_id, &err).await,
            }
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (message_id, device_id, reply) in pending {
            match reply.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(err)) => error!(message_id = %message_id, error = %err, "retry attempt failed"),
                Err(_) => {
                    self.release(&message_id, &Error::LaneClosed(device_id.to_string()))
                        .await
                }
            }
        }
        Ok(outcomes)
    }

    /// Hand a claimed record that never reached its lane back to the sweeper.
    async fn release(&self, message_id: &str, cause: &Error) {
        warn!(message_id, error = %cause, "claimed retry not dispatched");
        if let Err(err) = self
            .inner
            .lifecycle
            .reschedule_stranded(message_id, cause)
            .await
        {
            error!(message_id, error = %err, "claimed retry left in flight");
        }
    }

    /// Run [`Self::sweep_retries`] every `retry_sweep_interval` until
    /// `shutdown` is cancelled.
    pub fn spawn_retry_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let coordinator = self.clone();
        let period = self
            .inner
            .config
            .retry_sweep_interval
            .max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = period.as_millis() as u64, "retry sweeper started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match coordinator.sweep_retries().await {
                            Ok(outcomes) if !outcomes.is_empty() => {
                                info!(count = outcomes.len(), "retries dispatched");
                            }
                            Ok(_) => {}
                            Err(err) => error!(error = %err, "retry sweep failed"),
                        }
                    }
                }
            }
            info!("retry sweeper stopped");
        })
    }

    /// Stop accepting work and wait for every lane to drain.
    ///
    /// Queued work still completes. Submissions made afterwards fail with
    /// `LANE_CLOSED`.
    pub async fn shutdown(&self) {
        self.inner.closed.cancel();
        let keys: Vec<DeviceId> = self.inner.lanes.iter().map(|lane| lane.key().clone()).collect();
        let mut finished = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, lane)) = self.inner.lanes.remove(&key) {
                finished.push(lane.finished);
            }
        }
        let lanes = finished.len();
        for token in finished {
            token.cancelled().await;
        }
        info!(lanes, "dispatch lanes closed");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    async fn enqueue(&self, device_id: &DeviceId, work: Work) -> Result<Reply> {
        let (reply, rx) = oneshot::channel();
        let mut job = Job { work, reply };
        // a lane may close between lookup and send; the second lookup
        // replaces it
        for _ in 0..2 {
            let lane = self.lane(device_id)?;
            match lane.send(job).await {
                Ok(()) => return Ok(rx),
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }
        Err(Error::LaneClosed(device_id.to_string()))
    }

    fn lane(&self, device_id: &DeviceId) -> Result<mpsc::Sender<Job>> {
        if self.inner.closed.is_cancelled() {
            return Err(Error::LaneClosed(device_id.to_string()));
        }
        let mut lane = self
            .inner
            .lanes
            .entry(device_id.clone())
            .or_insert_with(|| self.spawn_lane(device_id, None));
        if lane.jobs.is_closed() {
            let predecessor = lane.finished.clone();
            *lane = self.spawn_lane(device_id, Some(predecessor));
        }
        Ok(lane.jobs.clone())
    }

    fn spawn_lane(&self, device_id: &DeviceId, after: Option<CancellationToken>) -> Lane {
        let (tx, rx) = mpsc::channel(self.inner.config.lane_capacity.max(1));
        let lane = Lane {
            id: self.inner.next_lane.fetch_add(1, Ordering::Relaxed),
            jobs: tx,
            finished: CancellationToken::new(),
        };
        debug!(device_id = %device_id, lane = lane.id, "opening dispatch lane");
        tokio::spawn(run_lane(
            self.inner.clone(),
            device_id.clone(),
            lane.id,
            rx,
            lane.finished.clone(),
            after,
        ));
        lane
    }
}

async fn run_lane(
    inner: Arc<Inner>,
    device_id: DeviceId,
    lane_id: u64,
    mut jobs: mpsc::Receiver<Job>,
    finished: CancellationToken,
    after: Option<CancellationToken>,
) {
    let _finished = finished.drop_guard();
    if let Some(predecessor) = after {
        predecessor.cancelled().await;
    }

    let idle = inner.config.lane_idle_timeout.max(Duration::from_millis(1));
    loop {
        let job = match tokio::time::timeout(idle, jobs.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                // refuse new sends, then drain anything that slipped in
                jobs.close();
                continue;
            }
        };
        let Ok(_permit) = inner.workers.acquire().await else {
            break;
        };
        let outcome = inner.execute(job.work).await;
        if job.reply.send(outcome).is_err() {
            debug!(device_id = %device_id, "submitter gone, outcome dropped");
        }
    }

    inner.lanes.remove_if(&device_id, |_, lane| lane.id == lane_id);
    debug!(device_id = %device_id, lane = lane_id, "dispatch lane finished");
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

impl Inner {
    async fn execute(&self, work: Work) -> Result<DispatchOutcome> {
        match work {
            Work::Ingest(request) => self.ingest(request).await,
            Work::Retry(record) => self.retry(record).await,
        }
    }

    fn new_record(&self, request: &IngestRequest, protocol_type: &str) -> ProtocolMessageRecord {
        ProtocolMessageRecord::received(
            &request.device_id,
            protocol_type,
            &request.frame,
            request.priority,
            self.config.max_retry_count,
            self.lifecycle.now(),
        )
        .with_session_id(request.session_id.clone())
        .with_signature(request.signature.clone())
    }

    async fn ingest(&self, request: IngestRequest) -> Result<DispatchOutcome> {
        let adapter = match self.registry.resolve_for_model(&request.device_model) {
            Ok(adapter) => adapter,
            Err(err) => return self.unresolved(&request, err).await,
        };
        let record = self.new_record(&request, &adapter.identify().protocol_type);
        self.lifecycle.receive(&record).await?;
        let result = self
            .attempt(adapter.as_ref(), &record.message_id, &request.device_id, &request.frame)
            .await;
        self.settle(&record.message_id, result).await
    }

    /// Keep a record of frames from devices nobody can decode.
    async fn unresolved(&self, request: &IngestRequest, err: Error) -> Result<DispatchOutcome> {
        warn!(
            device_id = %request.device_id,
            model = %request.device_model,
            error = %err,
            "no adapter for device"
        );
        let record = self.new_record(request, PROTOCOL_UNRESOLVED);
        self.lifecycle.receive(&record).await?;
        let result = match self
            .lifecycle
            .record_failure(&record.message_id, LifecycleState::Received, &err, 0)
            .await
        {
            Ok(_) => self.outcome(&record.message_id, None).await,
            Err(err) => Err(err),
        };
        self.settle(&record.message_id, result).await
    }

    async fn retry(&self, record: ProtocolMessageRecord) -> Result<DispatchOutcome> {
        let message_id = record.message_id.clone();
        let result = self.retry_attempt(record).await;
        self.settle(&message_id, result).await
    }

    async fn retry_attempt(&self, record: ProtocolMessageRecord) -> Result<DispatchOutcome> {
        debug!(
            message_id = %record.message_id,
            device_id = %record.device_id,
            retry_count = record.retry_count,
            "retrying message"
        );
        let adapter = match self.registry.get(&record.protocol_type) {
            Ok(adapter) => adapter,
            Err(err) => {
                self.lifecycle
                    .record_failure(&record.message_id, LifecycleState::Received, &err, 0)
                    .await?;
                return self.outcome(&record.message_id, None).await;
            }
        };
        let raw = match record.raw_bytes() {
            Ok(raw) => raw,
            Err(err) => {
                self.lifecycle
                    .record_failure(&record.message_id, LifecycleState::Received, &err.into(), 0)
                    .await?;
                return self.outcome(&record.message_id, None).await;
            }
        };
        let device_id: DeviceId = record.device_id.parse()?;
        self.attempt(adapter.as_ref(), &record.message_id, &device_id, &raw)
            .await
    }

    /// One parse, validate, process pass over a `RECEIVED` record.
    async fn attempt(
        &self,
        adapter: &dyn ProtocolAdapter,
        message_id: &str,
        device_id: &DeviceId,
        raw: &[u8],
    ) -> Result<DispatchOutcome> {
        let started = Instant::now();

        let mut message = match adapter.parse(raw) {
            Ok(message) => message,
            Err(err) => {
                return self
                    .fail(adapter, message_id, None, LifecycleState::Received, err.into(), started)
                    .await;
            }
        };

        if self.lifecycle.mark_parsed(message_id, &message).await? == LifecycleState::Ignored {
            return self
                .outcome(message_id, Some(adapter.build_response(&message, None)))
                .await;
        }

        if !adapter.validate(Some(&mut message)) {
            let reason = adapter
                .check(Some(&message))
                .err()
                .unwrap_or(ValidationError::MessageAbsent);
            return self
                .fail(
                    adapter,
                    message_id,
                    Some(&message),
                    LifecycleState::Parsed,
                    reason.into(),
                    started,
                )
                .await;
        }
        self.lifecycle.mark_validated(message_id).await?;

        let ctx = ProcessContext::new(message_id, device_id.clone(), self.lifecycle.now());
        let timeout = self.config.process_timeout;
        let result = match tokio::time::timeout(timeout, adapter.process(&message, &ctx)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                return self
                    .fail(
                        adapter,
                        message_id,
                        Some(&message),
                        LifecycleState::Validated,
                        err.into(),
                        started,
                    )
                    .await;
            }
            Err(_) => {
                let err = ProcessError::DownstreamTimeout(format!(
                    "no answer within {}ms",
                    timeout.as_millis()
                ));
                return self
                    .fail(
                        adapter,
                        message_id,
                        Some(&message),
                        LifecycleState::Validated,
                        err.into(),
                        started,
                    )
                    .await;
            }
        };

        let duration = elapsed_ms(started);
        self.lifecycle
            .mark_processed(message_id, result, duration)
            .await?;
        debug!(
            message_id,
            device_id = %device_id,
            message_type = message.message_type().unwrap_or_default(),
            duration_ms = duration,
            "message processed"
        );
        self.outcome(message_id, Some(adapter.build_response(&message, None)))
            .await
    }

    async fn fail(
        &self,
        adapter: &dyn ProtocolAdapter,
        message_id: &str,
        message: Option<&ParsedMessage>,
        from: LifecycleState,
        error: Error,
        started: Instant,
    ) -> Result<DispatchOutcome> {
        let state = self
            .lifecycle
            .record_failure(message_id, from, &error, elapsed_ms(started))
            .await?;
        debug!(
            message_id,
            from = %from,
            state = %state,
            code = error.error_code(),
            "attempt failed"
        );

        // NAK only what the device can match to a frame it sent
        let response = match (state, message) {
            (LifecycleState::Failed | LifecycleState::Dead, Some(message)) => {
                Some(adapter.build_response(message, Some(error.nak_code())))
            }
            _ => None,
        };
        self.outcome(message_id, response).await
    }

    /// An attempt that errored may have left its record in flight; hand it
    /// back to the retry sweeper so it does not stay there.
    async fn settle(
        &self,
        message_id: &str,
        result: Result<DispatchOutcome>,
    ) -> Result<DispatchOutcome> {
        let err = match result {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };
        error!(message_id, error = %err, code = err.error_code(), "attempt interrupted");
        self.lifecycle.reschedule_stranded(message_id, &err).await?;
        self.outcome(message_id, None).await
    }

    async fn outcome(&self, message_id: &str, response: Option<Bytes>) -> Result<DispatchOutcome> {
        let record = self
            .lifecycle
            .get(message_id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(message_id.to_string()))?;
        Ok(DispatchOutcome::from_record(&record, response))
    }
}
