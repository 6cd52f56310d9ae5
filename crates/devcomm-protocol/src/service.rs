//! Boundary to the business services that record access, attendance and
//! consumption events.
//!
//! Adapters translate a validated message into a [`BusinessRequest`] and
//! hand it to a [`BusinessServiceClient`]. How the request travels (HTTP,
//! RPC, in-process) is the client's concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devcomm_core::{DeviceId, ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HttpVerb::Get => f.write_str("GET"),
            HttpVerb::Post => f.write_str("POST"),
        }
    }
}

/// One downstream business action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessRequest {
    pub action_path: String,
    pub verb: HttpVerb,
    pub payload: Value,
}

impl BusinessRequest {
    pub fn post(action_path: impl Into<String>, payload: Value) -> Self {
        Self {
            action_path: action_path.into(),
            verb: HttpVerb::Post,
            payload,
        }
    }

    pub fn get(action_path: impl Into<String>, payload: Value) -> Self {
        Self {
            action_path: action_path.into(),
            verb: HttpVerb::Get,
            payload,
        }
    }
}

/// Answer of a business service that was reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub result: ProcessResult,
    #[serde(default)]
    pub body: Value,
}

impl ServiceResponse {
    pub fn success(body: Value) -> Self {
        Self {
            result: ProcessResult::Success,
            body,
        }
    }

    pub fn partial(body: Value) -> Self {
        Self {
            result: ProcessResult::Partial,
            body,
        }
    }

    pub fn failed(body: Value) -> Self {
        Self {
            result: ProcessResult::Failed,
            body,
        }
    }
}

/// Transport-level failures of a business call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0} timed out")]
    Timeout(String),

    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("{0} rejected: {1}")]
    Rejected(String, String),
}

impl From<ServiceError> for ProcessError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Timeout(_) => ProcessError::DownstreamTimeout(err.to_string()),
            ServiceError::Unavailable(_) => ProcessError::DownstreamUnavailable(err.to_string()),
            ServiceError::Rejected(..) => ProcessError::DownstreamRejected(err.to_string()),
        }
    }
}

#[async_trait]
pub trait BusinessServiceClient: Send + Sync {
    async fn call(&self, request: BusinessRequest) -> Result<ServiceResponse, ServiceError>;
}

/// Per-attempt context handed to `process`.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    /// Id of the persisted record for this attempt
    pub message_id: String,
    pub device_id: DeviceId,
    /// Processing time, used when the device sent no event time
    pub now: DateTime<Utc>,
}

impl ProcessContext {
    pub fn new(message_id: impl Into<String>, device_id: DeviceId, now: DateTime<Utc>) -> Self {
        Self {
            message_id: message_id.into(),
            device_id,
            now,
        }
    }
}

/// Client that only logs requests and reports success.
///
/// Stands in for real business services when running the gateway locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingServiceClient;

#[async_trait]
impl BusinessServiceClient for LoggingServiceClient {
    async fn call(&self, request: BusinessRequest) -> Result<ServiceResponse, ServiceError> {
        info!(
            verb = %request.verb,
            path = %request.action_path,
            payload = %request.payload,
            "business request"
        );
        Ok(ServiceResponse::success(Value::Null))
    }
}
