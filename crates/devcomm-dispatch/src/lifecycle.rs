//! Persisted message lifecycle.
//!
//! [`LifecycleManager`] is the only writer of [`ProtocolMessageRecord`]s
//! after creation. Each transition is a compare-and-swap write against the
//! store, so a record claimed by one worker cannot be advanced by another.
//! A failure goes straight from the state it was observed in to `FAILED`,
//! `RETRY_SCHEDULED` or `DEAD` in a single write.

use crate::backoff::BackoffPolicy;
use chrono::{DateTime, Utc};
use devcomm_core::{Clock, Error, LifecycleState, ProcessResult, Result};
use devcomm_protocol::ParsedMessage;
use devcomm_storage::{MessageStore, ProtocolMessageRecord, RecordUpdate};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Record counts per lifecycle state, archived records excluded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LifecycleStats {
    pub counts: Vec<(LifecycleState, u64)>,
}

impl LifecycleStats {
    pub fn get(&self, state: LifecycleState) -> u64 {
        self.counts
            .iter()
            .find(|(s, _)| *s == state)
            .map_or(0, |(_, n)| *n)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    /// Records that have not reached a terminal state.
    pub fn in_flight(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(s, _)| s.is_in_flight())
            .map(|(_, n)| n)
            .sum()
    }
}

pub struct LifecycleManager {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    backoff: Arc<dyn BackoffPolicy>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
        backoff: Arc<dyn BackoffPolicy>,
    ) -> Self {
        Self {
            store,
            clock,
            backoff,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub async fn get(&self, message_id: &str) -> Result<Option<ProtocolMessageRecord>> {
        Ok(self.store.get(message_id).await?)
    }

    async fn require(&self, message_id: &str) -> Result<ProtocolMessageRecord> {
        self.get(message_id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(message_id.to_string()))
    }

    /// Checked compare-and-swap from `from` to `update.state`.
    async fn transition(
        &self,
        message_id: &str,
        from: LifecycleState,
        update: RecordUpdate,
    ) -> Result<()> {
        from.ensure_transition(&update.state)?;
        self.swap(message_id, from, &update).await
    }

    /// Compare-and-swap without the one-step legality check.
    async fn swap(
        &self,
        message_id: &str,
        from: LifecycleState,
        update: &RecordUpdate,
    ) -> Result<()> {
        if !self.store.transition(message_id, from, update).await? {
            return Err(Error::ConcurrentModification {
                message_id: message_id.to_string(),
                expected: from.to_string(),
            });
        }
        debug!(message_id, from = %from, to = %update.state, "lifecycle transition");
        Ok(())
    }

    /// Persist a freshly received frame. The record must be `RECEIVED`.
    pub async fn receive(&self, record: &ProtocolMessageRecord) -> Result<()> {
        if record.lifecycle_state != LifecycleState::Received {
            return Err(Error::InvalidStateTransition {
                from: record.lifecycle_state.to_string(),
                to: LifecycleState::Received.to_string(),
            });
        }
        self.store.insert(record).await?;
        debug!(
            message_id = %record.message_id,
            device_id = %record.device_id,
            protocol = %record.protocol_type,
            "message received"
        );
        Ok(())
    }

    /// Store the decoded envelope and business fields.
    ///
    /// Returns `IGNORED` instead of `PARSED` when the `(device, sequence)`
    /// key was already processed by another record.
    pub async fn mark_parsed(
        &self,
        message_id: &str,
        message: &ParsedMessage,
    ) -> Result<LifecycleState> {
        let update = RecordUpdate {
            protocol_type: Some(message.protocol_type.clone()),
            device_code: message.device_code.clone(),
            message_type: message.message_type.clone(),
            command_code: Some(format!("0x{:02X}", message.message_type_code)),
            sequence_number: Some(message.sequence_number),
            checksum: Some(format!("{:04X}", message.checksum)),
            business_data: Some(message.data_json()),
            ..RecordUpdate::to(LifecycleState::Parsed)
        };
        self.transition(message_id, LifecycleState::Received, update)
            .await?;

        let record = self.require(message_id).await?;
        if self.already_processed(&record).await? {
            info!(
                message_id,
                device_id = %record.device_id,
                sequence = message.sequence_number,
                "duplicate of processed message, ignoring"
            );
            self.transition(
                message_id,
                LifecycleState::Parsed,
                RecordUpdate::to(LifecycleState::Ignored).processed_at(self.now(), 0),
            )
            .await?;
            return Ok(LifecycleState::Ignored);
        }
        Ok(LifecycleState::Parsed)
    }

    pub async fn mark_validated(&self, message_id: &str) -> Result<()> {
        self.transition(
            message_id,
            LifecycleState::Parsed,
            RecordUpdate::to(LifecycleState::Validated),
        )
        .await
    }

    /// Record a successful attempt and cancel pending retries of the same
    /// `(device, sequence)` key.
    pub async fn mark_processed(
        &self,
        message_id: &str,
        result: ProcessResult,
        duration_ms: i64,
    ) -> Result<()> {
        self.transition(
            message_id,
            LifecycleState::Validated,
            RecordUpdate::to(LifecycleState::Processed)
                .clear_error()
                .process_result(result)
                .processed_at(self.now(), duration_ms),
        )
        .await?;

        let record = self.require(message_id).await?;
        let Some((device_id, sequence)) = record.dedup_key() else {
            return Ok(());
        };
        for sibling in self.store.find_by_key(device_id, sequence).await? {
            if sibling.message_id == record.message_id
                || sibling.lifecycle_state != LifecycleState::RetryScheduled
            {
                continue;
            }
            let cancelled = self
                .store
                .transition(
                    &sibling.message_id,
                    LifecycleState::RetryScheduled,
                    &RecordUpdate::to(LifecycleState::Ignored).processed_at(self.now(), 0),
                )
                .await?;
            if cancelled {
                info!(
                    message_id = %sibling.message_id,
                    processed_by = message_id,
                    "scheduled retry cancelled"
                );
            }
        }
        Ok(())
    }

    /// Record a failed attempt made from state `from`.
    ///
    /// Retryable errors increment `retry_count`; the record is rescheduled
    /// while the count stays below `max_retry_count` and goes `DEAD`
    /// otherwise. Terminal errors leave the record `FAILED`. The outcome is
    /// written in one compare-and-swap, so a failed write leaves the record
    /// in `from`. Returns the state the record ended in.
    pub async fn record_failure(
        &self,
        message_id: &str,
        from: LifecycleState,
        error: &Error,
        duration_ms: i64,
    ) -> Result<LifecycleState> {
        if !from.can_transition_to(&LifecycleState::Failed) {
            return Err(Error::InvalidStateTransition {
                from: from.to_string(),
                to: LifecycleState::Failed.to_string(),
            });
        }
        let record = self.require(message_id).await?;
        self.resolve_failure(&record, from, error, error.is_retryable(), duration_ms)
            .await
    }

    /// Reschedule a record left in flight by an attempt that could not
    /// finish, e.g. because a lifecycle write failed.
    ///
    /// The failure counts against the retry budget whatever its class, so a
    /// record that keeps getting stranded ends `DEAD`. Records no longer in
    /// flight are left alone. Returns the state the record ended in.
    pub async fn reschedule_stranded(
        &self,
        message_id: &str,
        cause: &Error,
    ) -> Result<LifecycleState> {
        let record = self.require(message_id).await?;
        let from = record.lifecycle_state;
        if !from.is_in_flight() {
            return Ok(from);
        }
        warn!(
            message_id,
            device_id = %record.device_id,
            state = %from,
            error = %cause,
            "attempt stranded in flight, rescheduling"
        );
        self.resolve_failure(&record, from, cause, true, 0).await
    }

    async fn resolve_failure(
        &self,
        record: &ProtocolMessageRecord,
        from: LifecycleState,
        error: &Error,
        retryable: bool,
        duration_ms: i64,
    ) -> Result<LifecycleState> {
        let message_id = record.message_id.as_str();
        let now = self.now();
        let mut update = RecordUpdate::to(LifecycleState::Failed)
            .error(error.error_code(), error.to_string())
            .process_result(ProcessResult::Failed)
            .processed_at(now, duration_ms);

        let mut due = None;
        if retryable {
            let retry_count = record
                .retry_count
                .saturating_add(1)
                .min(record.max_retry_count);
            update = update.retry_count(retry_count);
            if retry_count < record.max_retry_count {
                let at = chrono::Duration::from_std(self.backoff.delay(retry_count))
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                update = update.next_retry_time(at);
                update.state = LifecycleState::RetryScheduled;
                due = Some(at);
            } else {
                update.state = LifecycleState::Dead;
            }
        }

        let target = update.state;
        if !from.can_fail_to(&target) {
            return Err(Error::InvalidStateTransition {
                from: from.to_string(),
                to: target.to_string(),
            });
        }
        let retry_count = update.retry_count.unwrap_or(record.retry_count);
        self.swap(message_id, from, &update).await?;

        match (target, due) {
            (LifecycleState::RetryScheduled, Some(due)) => info!(
                message_id,
                retry_count,
                next_retry_time = %due,
                code = error.error_code(),
                "retry scheduled"
            ),
            (LifecycleState::Dead, _) => warn!(
                message_id,
                device_id = %record.device_id,
                retry_count,
                code = error.error_code(),
                error = %error,
                "retries exhausted, message is dead"
            ),
            _ => debug!(message_id, code = error.error_code(), "terminal failure"),
        }
        Ok(target)
    }

    /// Claim up to `limit` due retries, moving them back to `RECEIVED`.
    ///
    /// Records whose key has been processed meanwhile become `IGNORED` and
    /// are not returned. Records claimed concurrently elsewhere are skipped,
    /// and so are records whose claim could not be written; they stay
    /// `RETRY_SCHEDULED` for the next sweep.
    pub async fn claim_due_retries(&self, limit: usize) -> Result<Vec<ProtocolMessageRecord>> {
        let due = self.store.due_retries(self.now(), limit).await?;
        let mut claimed = Vec::with_capacity(due.len());

        for record in due {
            match self.claim(record).await {
                Ok(Some(record)) => claimed.push(record),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "could not claim due retry"),
            }
        }

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed due retries");
        }
        Ok(claimed)
    }

    async fn claim(
        &self,
        mut record: ProtocolMessageRecord,
    ) -> Result<Option<ProtocolMessageRecord>> {
        if self.already_processed(&record).await? {
            self.store
                .transition(
                    &record.message_id,
                    LifecycleState::RetryScheduled,
                    &RecordUpdate::to(LifecycleState::Ignored).processed_at(self.now(), 0),
                )
                .await?;
            return Ok(None);
        }

        let update = RecordUpdate::to(LifecycleState::Received);
        if !self
            .store
            .transition(&record.message_id, LifecycleState::RetryScheduled, &update)
            .await?
        {
            return Ok(None);
        }
        record.apply(&update);
        Ok(Some(record))
    }

    /// `DEAD` records awaiting operator attention, oldest first.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<ProtocolMessageRecord>> {
        Ok(self.store.list_by_state(LifecycleState::Dead, limit).await?)
    }

    pub async fn stats(&self) -> Result<LifecycleStats> {
        Ok(LifecycleStats {
            counts: self.store.count_by_state().await?,
        })
    }

    /// Archive a terminal record. Returns `false` if it is not terminal or
    /// already archived.
    pub async fn archive(&self, message_id: &str) -> Result<bool> {
        self.require(message_id).await?;
        Ok(self.store.soft_delete(message_id).await?)
    }

    /// Whether another record with the same key reached `PROCESSED`.
    async fn already_processed(&self, record: &ProtocolMessageRecord) -> Result<bool> {
        let Some((device_id, sequence)) = record.dedup_key() else {
            return Ok(false);
        };
        Ok(self
            .store
            .find_by_key(device_id, sequence)
            .await?
            .iter()
            .any(|other| {
                other.message_id != record.message_id
                    && other.lifecycle_state == LifecycleState::Processed
            }))
    }
}
