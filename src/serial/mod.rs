pub mod forwarder;
pub mod link;
pub mod mock;
pub mod protocol;
pub mod transport;
pub mod waiter;

pub use forwarder::spawn_forwarder;
pub use link::{LinkStatus, SerialLink};
pub use protocol::{RegisterAddress, RegisterValue};
pub use transport::{PortIo, PortProvider, SystemPorts};
pub use waiter::{ByteSource, ResponseWaiter};

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Serial port is not open")]
    NotOpen,

    #[error("Serial port is already open, close it first")]
    AlreadyOpen,

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Truncated response: expected {expected} hex digits, got {actual}")]
    TruncatedResponse { expected: usize, actual: usize },

    #[error("No response terminator within {timeout:?} ({} bytes received)", .partial.len())]
    ResponseTimeout { timeout: Duration, partial: Vec<u8> },

    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),

    #[error("Invalid value format: {0}")]
    InvalidValueFormat(String),

    #[error("Invalid access size {0}, expected 1..=8 bytes")]
    InvalidSize(u8),

    #[error("Invalid stop bits {0}, expected 1, 1.5 or 2")]
    InvalidStopBits(f64),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

impl SerialError {
    /// True for errors raised by input validation, before any I/O happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SerialError::InvalidAddressFormat(_)
                | SerialError::InvalidValueFormat(_)
                | SerialError::InvalidSize(_)
                | SerialError::InvalidStopBits(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SerialError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[serde(rename = "N")]
    None,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "O")]
    Odd,
    #[serde(rename = "M")]
    Mark,
    #[serde(rename = "S")]
    Space,
}

impl Parity {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "N" => Some(Parity::None),
            "E" => Some(Parity::Even),
            "O" => Some(Parity::Odd),
            "M" => Some(Parity::Mark),
            "S" => Some(Parity::Space),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Parity::None => "N",
            Parity::Even => "E",
            Parity::Odd => "O",
            Parity::Mark => "M",
            Parity::Space => "S",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OnePointFive,
    #[serde(rename = "2")]
    Two,
}

impl StopBits {
    /// Maps the numeric form used by stored configs and connect requests.
    pub fn from_f64(value: f64) -> Option<Self> {
        [StopBits::One, StopBits::OnePointFive, StopBits::Two]
            .into_iter()
            .find(|bits| (bits.as_f64() - value).abs() < f64::EPSILON)
    }

    pub fn parse(value: f64) -> Result<Self> {
        Self::from_f64(value).ok_or(SerialError::InvalidStopBits(value))
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

/// Parameters used to open the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub byte_size: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub read_timeout: Duration,
}

impl LinkSettings {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            byte_size: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }

    pub fn with_framing(mut self, byte_size: u8, parity: Parity, stop_bits: StopBits) -> Self {
        self.byte_size = byte_size;
        self.parity = parity;
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}
