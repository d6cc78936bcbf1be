//! Text protocol spoken by the register device.
//!
//! Requests are single lines, `read 0xADDR SIZE\r\n` and
//! `write 0xADDR 0xVALUE\r\n`. Replies carry one or more `prefix:hexdigits`
//! lines and end with an `OK` line:
//!
//! ```text
//! VAL:FFB25233\r\n
//! OK\r\n
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Result, SerialError};

pub const LINE_ENDING: &str = "\r\n";
/// Sequence that ends every device reply.
pub const RESPONSE_TERMINATOR: &[u8] = b"OK\r\n";
const OK_MARKER: &str = "\r\nOK";
pub const MAX_ACCESS_SIZE: u8 = 8;

/// Device register address. Ordered and compared numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterAddress(pub u32);

impl RegisterAddress {
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Address `bytes` further on, `None` on wrap-around.
    pub fn offset(&self, bytes: u32) -> Option<RegisterAddress> {
        self.0.checked_add(bytes).map(RegisterAddress)
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for RegisterAddress {
    fn from(value: u32) -> Self {
        RegisterAddress(value)
    }
}

impl FromStr for RegisterAddress {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = strip_hex_prefix(s.trim())
            .ok_or_else(|| SerialError::InvalidAddressFormat(format!("{} (expected 0x prefix)", s)))?;
        if digits.is_empty() || digits.len() > 8 {
            return Err(SerialError::InvalidAddressFormat(format!(
                "{} (expected 1 to 8 hex digits)",
                s
            )));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SerialError::InvalidAddressFormat(format!(
                "{} (allowed characters: 0-9, A-F, a-f)",
                s
            )));
        }
        u32::from_str_radix(digits, 16)
            .map(RegisterAddress)
            .map_err(|e| SerialError::InvalidAddressFormat(format!("{} ({})", s, e)))
    }
}

impl Serialize for RegisterAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RegisterAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Hex value written to a register, kept as the digits the client sent (uppercased).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisterValue(String);

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.0)
    }
}

impl FromStr for RegisterValue {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = strip_hex_prefix(s.trim())
            .ok_or_else(|| SerialError::InvalidValueFormat(format!("{} (expected 0x prefix)", s)))?;
        if digits.is_empty() || digits.len() > usize::from(MAX_ACCESS_SIZE) * 2 {
            return Err(SerialError::InvalidValueFormat(format!(
                "{} (expected 1 to 16 hex digits)",
                s
            )));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SerialError::InvalidValueFormat(format!(
                "{} (allowed characters: 0-9, A-F, a-f)",
                s
            )));
        }
        Ok(RegisterValue(digits.to_ascii_uppercase()))
    }
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

/// Reject access sizes the device cannot serve.
pub fn validate_size(size: u8) -> Result<u8> {
    if (1..=MAX_ACCESS_SIZE).contains(&size) {
        Ok(size)
    } else {
        Err(SerialError::InvalidSize(size))
    }
}

pub fn build_read_command(address: RegisterAddress, size_bytes: u32) -> String {
    format!("read {} {}{}", address, size_bytes, LINE_ENDING)
}

pub fn build_write_command(address: RegisterAddress, value: &RegisterValue) -> String {
    format!("write {} {}{}", address, value, LINE_ENDING)
}

/// True once `buffer` holds a complete reply.
pub fn has_terminator(buffer: &[u8]) -> bool {
    buffer
        .windows(RESPONSE_TERMINATOR.len())
        .any(|w| w == RESPONSE_TERMINATOR)
}

/// Extract the hex payload of a framed reply.
///
/// Every line before the `OK` marker that carries a `:` contributes the
/// text after its first colon, in order. Lines without a colon (command
/// echo, blank lines) are skipped.
pub fn parse_framed_response(raw: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(raw);
    let body_end = text
        .find(OK_MARKER)
        .ok_or_else(|| SerialError::MalformedResponse(format!("missing OK marker in {:?}", text)))?;
    let body = &text[..body_end];

    let mut payload = String::new();
    let mut segments = 0;
    for line in body.split(['\r', '\n']) {
        let Some((_, segment)) = line.split_once(':') else {
            continue;
        };
        segments += 1;
        for c in segment.chars().filter(|c| !c.is_ascii_whitespace()) {
            if !c.is_ascii_hexdigit() {
                return Err(SerialError::MalformedResponse(format!(
                    "non-hex character {:?} in segment {:?}",
                    c, segment
                )));
            }
            payload.push(c.to_ascii_uppercase());
        }
    }

    if segments == 0 {
        return Err(SerialError::MalformedResponse(format!(
            "no ':' delimited segment in {:?}",
            text
        )));
    }
    Ok(payload)
}

/// Parse a read reply and check it covers `count` registers of `size_bytes` each.
pub fn parse_read_payload(raw: &[u8], count: usize, size_bytes: u8) -> Result<String> {
    let payload = parse_framed_response(raw)?;
    let expected = count * usize::from(size_bytes) * 2;
    if payload.len() < expected {
        return Err(SerialError::TruncatedResponse {
            expected,
            actual: payload.len(),
        });
    }
    if payload.len() > expected {
        return Err(SerialError::MalformedResponse(format!(
            "expected {} hex digits, got {}",
            expected,
            payload.len()
        )));
    }
    // Confirms the digits decode; never fails after the per-character check above.
    hex::decode(&payload).map_err(|e| SerialError::MalformedResponse(e.to_string()))?;
    Ok(payload)
}

/// Split a validated payload into one `0x`-prefixed value per register.
pub fn split_payload(payload: &str, size_bytes: u8) -> Vec<String> {
    let width = usize::from(size_bytes) * 2;
    payload
        .as_bytes()
        .chunks(width)
        .map(|chunk| format!("0x{}", String::from_utf8_lossy(chunk)))
        .collect()
}

/// Check a write confirmation: an `OK` line must stand on its own.
pub fn parse_ack(raw: &[u8]) -> Result<()> {
    let text = String::from_utf8_lossy(raw);
    if text.split("\r\n").any(|line| line.trim() == "OK") {
        Ok(())
    } else {
        Err(SerialError::MalformedResponse(format!(
            "no standalone OK line in {:?}",
            text
        )))
    }
}
