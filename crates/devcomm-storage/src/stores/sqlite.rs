use super::MessageStore;
use crate::error::{StorageError, StorageResult};
use crate::record::{ProtocolMessageRecord, RecordUpdate};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use devcomm_core::{LifecycleState, Priority};
use sqlx::SqlitePool;
use tracing::debug;

const COLUMNS: &str = r#"
    message_id, device_id, device_code, protocol_type, message_direction,
    message_type, command_code, raw_hex_data, raw_byte_data, business_data,
    message_status, lifecycle_state, process_result, error_code, error_message,
    process_duration, sequence_number, session_id, signature, checksum,
    priority, retry_count, max_retry_count, next_retry_time, receive_time,
    process_time, deleted
"#;

/// Timestamps are stored as fixed-width RFC 3339 text so that string order
/// matches time order in `ORDER BY` and range filters.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| StorageError::corrupt(column, value))
}

fn parse_column<T: std::str::FromStr>(column: &str, value: &str) -> StorageResult<T> {
    value.parse().map_err(|_| StorageError::corrupt(column, value))
}

/// Row as SQLite hands it back, before domain conversion.
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    message_id: String,
    device_id: String,
    device_code: Option<String>,
    protocol_type: String,
    message_direction: String,
    message_type: Option<String>,
    command_code: Option<String>,
    raw_hex_data: String,
    raw_byte_data: String,
    business_data: Option<String>,
    message_status: String,
    lifecycle_state: String,
    process_result: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    process_duration: Option<i64>,
    sequence_number: Option<i64>,
    session_id: Option<String>,
    signature: Option<String>,
    checksum: Option<String>,
    priority: i64,
    retry_count: i64,
    max_retry_count: i64,
    next_retry_time: Option<String>,
    receive_time: String,
    process_time: Option<String>,
    deleted: bool,
}

impl TryFrom<RecordRow> for ProtocolMessageRecord {
    type Error = StorageError;

    fn try_from(row: RecordRow) -> StorageResult<Self> {
        let business_data = row
            .business_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let sequence_number = row
            .sequence_number
            .map(|seq| {
                u32::try_from(seq).map_err(|_| StorageError::corrupt("sequence_number", seq.to_string()))
            })
            .transpose()?;
        let priority = u8::try_from(row.priority)
            .ok()
            .filter(|rank| *rank <= 2)
            .map(Priority::from_rank)
            .ok_or_else(|| StorageError::corrupt("priority", row.priority.to_string()))?;
        let retry_count = u32::try_from(row.retry_count)
            .map_err(|_| StorageError::corrupt("retry_count", row.retry_count.to_string()))?;
        let max_retry_count = u32::try_from(row.max_retry_count)
            .map_err(|_| StorageError::corrupt("max_retry_count", row.max_retry_count.to_string()))?;

        Ok(Self {
            message_direction: parse_column("message_direction", &row.message_direction)?,
            message_status: parse_column("message_status", &row.message_status)?,
            lifecycle_state: parse_column("lifecycle_state", &row.lifecycle_state)?,
            process_result: row
                .process_result
                .as_deref()
                .map(|v| parse_column("process_result", v))
                .transpose()?,
            next_retry_time: row
                .next_retry_time
                .as_deref()
                .map(|v| parse_timestamp("next_retry_time", v))
                .transpose()?,
            receive_time: parse_timestamp("receive_time", &row.receive_time)?,
            process_time: row
                .process_time
                .as_deref()
                .map(|v| parse_timestamp("process_time", v))
                .transpose()?,
            message_id: row.message_id,
            device_id: row.device_id,
            device_code: row.device_code,
            protocol_type: row.protocol_type,
            message_type: row.message_type,
            command_code: row.command_code,
            raw_hex_data: row.raw_hex_data,
            raw_byte_data: row.raw_byte_data,
            business_data,
            error_code: row.error_code,
            error_message: row.error_message,
            process_duration: row.process_duration,
            sequence_number,
            session_id: row.session_id,
            signature: row.signature,
            checksum: row.checksum,
            priority,
            retry_count,
            max_retry_count,
            deleted: row.deleted,
        })
    }
}

fn into_records(rows: Vec<RecordRow>) -> StorageResult<Vec<ProtocolMessageRecord>> {
    rows.into_iter().map(ProtocolMessageRecord::try_from).collect()
}

/// SQLite implementation of [`MessageStore`]
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, record: &ProtocolMessageRecord) -> StorageResult<()> {
        let business_data = record
            .business_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(&format!(
            "INSERT INTO protocol_messages ({COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&record.message_id)
        .bind(&record.device_id)
        .bind(&record.device_code)
        .bind(&record.protocol_type)
        .bind(record.message_direction.as_str())
        .bind(&record.message_type)
        .bind(&record.command_code)
        .bind(&record.raw_hex_data)
        .bind(&record.raw_byte_data)
        .bind(business_data)
        .bind(record.message_status.as_str())
        .bind(record.lifecycle_state.as_str())
        .bind(record.process_result.map(|r| r.as_str()))
        .bind(&record.error_code)
        .bind(&record.error_message)
        .bind(record.process_duration)
        .bind(record.sequence_number.map(i64::from))
        .bind(&record.session_id)
        .bind(&record.signature)
        .bind(&record.checksum)
        .bind(i64::from(record.priority.rank()))
        .bind(i64::from(record.retry_count))
        .bind(i64::from(record.max_retry_count))
        .bind(record.next_retry_time.map(timestamp))
        .bind(timestamp(record.receive_time))
        .bind(record.process_time.map(timestamp))
        .bind(record.deleted)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::Duplicate(record.message_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, message_id: &str) -> StorageResult<Option<ProtocolMessageRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {COLUMNS} FROM protocol_messages WHERE message_id = ?"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProtocolMessageRecord::try_from).transpose()
    }

    async fn transition(
        &self,
        message_id: &str,
        expected: LifecycleState,
        update: &RecordUpdate,
    ) -> StorageResult<bool> {
        let business_data = update
            .business_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let (error_code, error_message) = match &update.error {
            Some((code, message)) => (Some(code.as_str()), Some(message.as_str())),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE protocol_messages SET
                lifecycle_state  = ?,
                message_status   = ?,
                protocol_type    = COALESCE(?, protocol_type),
                device_code      = COALESCE(?, device_code),
                message_type     = COALESCE(?, message_type),
                command_code     = COALESCE(?, command_code),
                sequence_number  = COALESCE(?, sequence_number),
                checksum         = COALESCE(?, checksum),
                business_data    = COALESCE(?, business_data),
                process_result   = COALESCE(?, process_result),
                error_code       = COALESCE(?, CASE WHEN ? THEN NULL ELSE error_code END),
                error_message    = COALESCE(?, CASE WHEN ? THEN NULL ELSE error_message END),
                retry_count      = COALESCE(?, retry_count),
                next_retry_time  = ?,
                process_time     = COALESCE(?, process_time),
                process_duration = COALESCE(?, process_duration)
            WHERE message_id = ? AND lifecycle_state = ?
            "#,
        )
        .bind(update.state.as_str())
        .bind(update.state.message_status().as_str())
        .bind(&update.protocol_type)
        .bind(&update.device_code)
        .bind(&update.message_type)
        .bind(&update.command_code)
        .bind(update.sequence_number.map(i64::from))
        .bind(&update.checksum)
        .bind(business_data)
        .bind(update.process_result.map(|r| r.as_str()))
        .bind(error_code)
        .bind(update.clear_error)
        .bind(error_message)
        .bind(update.clear_error)
        .bind(update.retry_count.map(i64::from))
        .bind(update.next_retry_time.map(timestamp))
        .bind(update.process_time.map(timestamp))
        .bind(update.process_duration)
        .bind(message_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            debug!(
                message_id,
                expected = %expected,
                target = %update.state,
                "transition skipped, record not in expected state"
            );
        }
        Ok(applied)
    }

    async fn find_by_key(
        &self,
        device_id: &str,
        sequence_number: u32,
    ) -> StorageResult<Vec<ProtocolMessageRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {COLUMNS} FROM protocol_messages \
             WHERE device_id = ? AND sequence_number = ? \
             ORDER BY receive_time ASC"
        ))
        .bind(device_id)
        .bind(i64::from(sequence_number))
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<ProtocolMessageRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {COLUMNS} FROM protocol_messages \
             WHERE lifecycle_state = ? AND deleted = 0 \
               AND next_retry_time IS NOT NULL AND next_retry_time <= ? \
             ORDER BY priority ASC, next_retry_time ASC \
             LIMIT ?"
        ))
        .bind(LifecycleState::RetryScheduled.as_str())
        .bind(timestamp(now))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn list_by_state(
        &self,
        state: LifecycleState,
        limit: usize,
    ) -> StorageResult<Vec<ProtocolMessageRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {COLUMNS} FROM protocol_messages \
             WHERE lifecycle_state = ? AND deleted = 0 \
             ORDER BY receive_time ASC \
             LIMIT ?"
        ))
        .bind(state.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn count_by_state(&self) -> StorageResult<Vec<(LifecycleState, u64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT lifecycle_state, COUNT(*)
            FROM protocol_messages
            WHERE deleted = 0
            GROUP BY lifecycle_state
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts: Vec<(LifecycleState, u64)> =
            LifecycleState::ALL.into_iter().map(|s| (s, 0)).collect();
        for (state, count) in rows {
            let state: LifecycleState = parse_column("lifecycle_state", &state)?;
            if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == state) {
                slot.1 = u64::try_from(count).unwrap_or(0);
            }
        }
        Ok(counts)
    }

    async fn soft_delete(&self, message_id: &str) -> StorageResult<bool> {
        let terminal: Vec<&str> = LifecycleState::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.as_str())
            .collect();
        let placeholders = vec!["?"; terminal.len()].join(", ");

        let sql = format!(
            "UPDATE protocol_messages SET deleted = 1 \
             WHERE message_id = ? AND deleted = 0 AND lifecycle_state IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(message_id);
        for state in terminal {
            query = query.bind(state);
        }
        let result = query.execute(&self.pool).await?;

        Ok(result.rows_affected() == 1)
    }
}
