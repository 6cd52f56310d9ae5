//! Common test utilities for protocol integration tests.
//!
//! Frame helpers build wire-exact frames with [`FrameBuilder`] so tests read
//! as "what the device sent", and [`CountingClient`] records every business
//! call an adapter makes.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use devcomm_protocol::adapters::{access, attendance, consume};
use devcomm_protocol::{
    BusinessRequest, BusinessServiceClient, FrameBuilder, ServiceError, ServiceResponse,
};
use serde_json::Value;
use std::sync::Mutex;

/// Device code used throughout the access scenarios.
pub const DEVICE_CODE: &str = "DEV001";

/// Access record: userId, passType, door, verify method; no device time.
pub fn access_record(seq: u32, user_id: u32, pass_type: u8, door: u8, verify: u8) -> Bytes {
    FrameBuilder::new(access::ACCESS_RECORD, DEVICE_CODE, seq)
        .u32(user_id)
        .u8(pass_type)
        .u8(door)
        .u8(verify)
        .build()
}

/// The canonical access record: user 1001 entering door 1 by fingerprint.
pub fn scenario_a_frame() -> Bytes {
    access_record(1, 1001, 0, 1, 1)
}

pub fn attendance_record(seq: u32, user_id: u32) -> Bytes {
    FrameBuilder::new(attendance::ATTENDANCE_RECORD, "CLK001", seq)
        .u32(user_id)
        .u8(0)
        .u8(2)
        .build()
}

pub fn consume_record(seq: u32, card_no: u32, amount: u32, balance: u32) -> Bytes {
    FrameBuilder::new(consume::CONSUME_RECORD, "POS001", seq)
        .u32(card_no)
        .u32(amount)
        .u32(balance)
        .u8(1)
        .u8(0)
        .build()
}

/// Flip the last checksum byte.
pub fn corrupt_checksum(frame: &Bytes) -> Vec<u8> {
    let mut bytes = frame.to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    bytes
}

/// Business client that records calls and always succeeds.
#[derive(Default)]
pub struct CountingClient {
    requests: Mutex<Vec<BusinessRequest>>,
}

impl CountingClient {
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.action_path == path)
            .count()
    }

    pub fn last(&self) -> Option<BusinessRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl BusinessServiceClient for CountingClient {
    async fn call(&self, request: BusinessRequest) -> Result<ServiceResponse, ServiceError> {
        self.requests.lock().unwrap().push(request);
        Ok(ServiceResponse::success(Value::Null))
    }
}
