use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serial::RegisterAddress;

/// One register access: where, and how many bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDescriptor {
    pub address: RegisterAddress,
    pub size_bytes: u8,
}

/// Contiguous run of registers served by a single burst read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstBlock {
    pub start_address: RegisterAddress,
    pub length_bytes: u32,
    pub members: Vec<RegisterAddress>,
}

/// Outcome of one client-requested register operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub address: String,
    pub success: bool,
    pub value: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    pub fn ok(address: impl Into<String>, value: Option<String>, message: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            success: true,
            value,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            success: false,
            value: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Wait for the device's `OK`.
    #[default]
    Confirmed,
    /// Queue the command and return; success only means "sent".
    FireAndForget,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchWriteStrategy {
    #[default]
    Sequential,
    Concurrent,
}

/// Unvalidated write request as clients send it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOp {
    pub address: String,
    pub value: String,
}

impl WriteOp {
    pub fn new(address: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            value: value.into(),
        }
    }
}
