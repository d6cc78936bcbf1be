use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serial::{LinkSettings, Parity, StopBits};

fn default_baudrate() -> u32 {
    115200
}

fn default_bytesize() -> u8 {
    8
}

fn default_parity() -> Parity {
    Parity::None
}

fn default_stopbits() -> f64 {
    1.0
}

fn default_timeout() -> f64 {
    0.05
}

/// Stored serial port configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialConfig {
    pub id: i64,
    pub name: String,
    pub port: String,
    pub baudrate: u32,
    pub bytesize: u8,
    pub parity: Parity,
    pub stopbits: f64,
    /// Read timeout in seconds.
    pub timeout: f64,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SerialConfig {
    pub fn link_settings(&self) -> crate::serial::Result<LinkSettings> {
        Ok(LinkSettings::new(self.port.clone(), self.baudrate)
            .with_framing(self.bytesize, self.parity, StopBits::parse(self.stopbits)?)
            .with_read_timeout(std::time::Duration::from_secs_f64(self.timeout)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSerialConfig {
    pub name: String,
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_bytesize")]
    pub bytesize: u8,
    #[serde(default = "default_parity")]
    pub parity: Parity,
    #[serde(default = "default_stopbits")]
    pub stopbits: f64,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewSerialConfig {
    pub fn new(name: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: port.into(),
            baudrate: default_baudrate(),
            bytesize: default_bytesize(),
            parity: default_parity(),
            stopbits: default_stopbits(),
            timeout: default_timeout(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialConfigUpdate {
    pub name: Option<String>,
    pub port: Option<String>,
    pub baudrate: Option<u32>,
    pub bytesize: Option<u8>,
    pub parity: Option<Parity>,
    pub stopbits: Option<f64>,
    pub timeout: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Read,
    Write,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Read => "read",
            OperationType::Write => "write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
        }
    }
}

/// Audit record of one register operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterLog {
    pub id: i64,
    pub serial_config_id: Option<i64>,
    pub operation_type: OperationType,
    pub address: String,
    pub value: Option<String>,
    pub response: Option<String>,
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRegisterLog {
    pub serial_config_id: Option<i64>,
    pub operation_type: OperationType,
    pub address: String,
    pub value: Option<String>,
    pub response: Option<String>,
    pub status: LogStatus,
}

/// Register bookmarked by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRegister {
    pub id: i64,
    pub address: String,
    pub data: String,
    pub value32bit: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSavedRegister {
    pub address: String,
    pub data: String,
    pub value32bit: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRegisterUpdate {
    pub address: Option<String>,
    pub data: Option<String>,
    pub value32bit: Option<String>,
    pub description: Option<String>,
}

/// One page of a listing plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}
