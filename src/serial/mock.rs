//! Simulated register device for running the protocol stack without hardware.
//!
//! `MockPorts` plays the role of the operating system (port list, open) and
//! hands out `SimulatedPort` handles that all talk to one shared
//! `SimulatedDevice`. The device parses the same `read`/`write` lines a real
//! board does and answers through a byte queue that is drained in small
//! chunks, so replies arrive split across several reads.
//!
//! Besides backing the test suite, this module ships in the library so the
//! server can run against a simulated board when `[serial] simulated = true`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::transport::{PortIo, PortProvider};
use super::{LinkSettings, Result, SerialError};

/// Largest reply piece handed out per read.
pub const DEFAULT_REPLY_CHUNK: usize = 5;
/// Port name the simulated board appears under when the server runs without hardware.
pub const SIMULATED_PORT: &str = "/dev/ttySIM0";
/// Bytes reported per `addr:hex` line of a read reply.
const BYTES_PER_LINE: usize = 4;

/// Misbehaviour injected for commands addressed at a given register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Swallow the command, never answer.
    Silent,
    /// Answer a read with half of the expected payload.
    Truncate,
    /// Answer with a non-hex payload.
    Garbage,
    /// Reject a write with `NOK`.
    Reject,
}

struct DeviceState {
    memory: HashMap<u32, u8>,
    faults: HashMap<u32, Fault>,
    line: Vec<u8>,
    outgoing: VecDeque<u8>,
    /// Replies still travelling back, with the instant they become readable.
    in_flight: VecDeque<(Instant, Vec<u8>)>,
    reply_delay: Duration,
    commands: Vec<String>,
    raw_written: Vec<u8>,
}

/// Shared state behind every simulated handle.
#[derive(Clone)]
pub struct SimulatedDevice {
    inner: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        SimulatedDevice {
            inner: Arc::new(Mutex::new(DeviceState {
                memory: HashMap::new(),
                faults: HashMap::new(),
                line: Vec::new(),
                outgoing: VecDeque::new(),
                in_flight: VecDeque::new(),
                reply_delay: Duration::ZERO,
                commands: Vec::new(),
                raw_written: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `bytes` starting at `address`, most significant byte first.
    pub fn set_bytes(&self, address: u32, bytes: &[u8]) {
        let mut state = self.state();
        for (i, byte) in bytes.iter().enumerate() {
            state.memory.insert(address.wrapping_add(i as u32), *byte);
        }
    }

    pub fn set_u32(&self, address: u32, value: u32) {
        self.set_bytes(address, &value.to_be_bytes());
    }

    pub fn bytes(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.state();
        (0..len)
            .map(|i| {
                state
                    .memory
                    .get(&address.wrapping_add(i as u32))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn set_fault(&self, address: u32, fault: Fault) {
        self.state().faults.insert(address, fault);
    }

    /// Delay every reply by `delay` after its command line arrives.
    ///
    /// Delayed replies are not yet in the input buffer, so a flush does not
    /// remove them.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.state().reply_delay = delay;
    }

    /// Queue bytes as if the device had sent them unprompted.
    pub fn inject_noise(&self, data: &[u8]) {
        self.state().outgoing.extend(data);
    }

    /// Complete command lines received so far, terminator stripped.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Every byte written to the device, in arrival order.
    pub fn raw_written(&self) -> Vec<u8> {
        self.state().raw_written.clone()
    }

    fn receive(&self, data: &[u8]) {
        let mut state = self.state();
        state.raw_written.extend_from_slice(data);
        state.line.extend_from_slice(data);

        while let Some(end) = state.line.windows(2).position(|w| w == b"\r\n") {
            let raw: Vec<u8> = state.line.drain(..end + 2).collect();
            let command = String::from_utf8_lossy(&raw[..end]).trim().to_string();
            if command.is_empty() {
                continue;
            }
            let reply = respond(&mut state, &command);
            state.commands.push(command);
            if reply.is_empty() {
                continue;
            }
            if state.reply_delay.is_zero() {
                state.outgoing.extend(reply);
            } else {
                let ready_at = Instant::now() + state.reply_delay;
                state.in_flight.push_back((ready_at, reply));
            }
        }
    }

    fn take_reply(&self, max: usize) -> Vec<u8> {
        let mut state = self.state();
        let now = Instant::now();
        while state.in_flight.front().is_some_and(|(ready_at, _)| *ready_at <= now) {
            if let Some((_, reply)) = state.in_flight.pop_front() {
                state.outgoing.extend(reply);
            }
        }
        let n = state.outgoing.len().min(max).min(DEFAULT_REPLY_CHUNK);
        state.outgoing.drain(..n).collect()
    }

    fn discard(&self) {
        self.state().outgoing.clear();
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number(text: &str) -> Option<u32> {
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
    u32::from_str_radix(digits, 16).ok()
}

fn respond(state: &mut DeviceState, command: &str) -> Vec<u8> {
    let parts: Vec<&str> = command.split_whitespace().collect();
    match parts.as_slice() {
        ["read", address, size] => {
            let (Some(address), Ok(size)) = (parse_number(address), size.parse::<usize>()) else {
                return b"ERR\r\n".to_vec();
            };
            let fault = state.faults.get(&address).copied();
            if fault == Some(Fault::Silent) {
                return Vec::new();
            }
            if fault == Some(Fault::Garbage) {
                return format!("0x{:08X}:ZZ!?\r\nOK\r\n", address).into_bytes();
            }

            let data: Vec<u8> = (0..size)
                .map(|i| {
                    state
                        .memory
                        .get(&address.wrapping_add(i as u32))
                        .copied()
                        .unwrap_or(0)
                })
                .collect();
            let keep = if fault == Some(Fault::Truncate) {
                data.len() / 2
            } else {
                data.len()
            };

            let mut reply = String::new();
            for (i, chunk) in data[..keep].chunks(BYTES_PER_LINE).enumerate() {
                let line_address = address.wrapping_add((i * BYTES_PER_LINE) as u32);
                reply.push_str(&format!(
                    "0x{:08X}:{}\r\n",
                    line_address,
                    hex::encode_upper(chunk)
                ));
            }
            if reply.is_empty() {
                reply.push_str(&format!("0x{:08X}:\r\n", address));
            }
            reply.push_str("OK\r\n");
            reply.into_bytes()
        }
        ["write", address, value] => {
            let Some(address) = parse_number(address) else {
                return b"ERR\r\n".to_vec();
            };
            match state.faults.get(&address).copied() {
                Some(Fault::Silent) => return Vec::new(),
                Some(Fault::Reject) => return b"NOK\r\n".to_vec(),
                Some(Fault::Garbage) => return b"??\r\n".to_vec(),
                _ => {}
            }
            let digits = value
                .strip_prefix("0x")
                .or_else(|| value.strip_prefix("0X"))
                .unwrap_or(value);
            let padded = if digits.len() % 2 == 1 {
                format!("0{}", digits)
            } else {
                digits.to_string()
            };
            match hex::decode(&padded) {
                Ok(bytes) => {
                    for (i, byte) in bytes.iter().enumerate() {
                        state.memory.insert(address.wrapping_add(i as u32), *byte);
                    }
                    b"OK\r\n".to_vec()
                }
                Err(_) => b"ERR\r\n".to_vec(),
            }
        }
        _ => b"ERR\r\n".to_vec(),
    }
}

/// One open handle onto the simulated device.
pub struct SimulatedPort {
    device: SimulatedDevice,
}

#[async_trait]
impl PortIo for SimulatedPort {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        self.device.receive(data);
        Ok(data.len())
    }

    async fn read_data(&mut self, max: usize) -> Result<Vec<u8>> {
        Ok(self.device.take_reply(max))
    }

    async fn discard_input(&mut self) -> Result<()> {
        self.device.discard();
        Ok(())
    }
}

/// Port provider backed by a simulated device.
#[derive(Clone)]
pub struct MockPorts {
    ports: Arc<Mutex<Vec<String>>>,
    device: SimulatedDevice,
}

impl MockPorts {
    pub fn new(ports: &[&str]) -> Self {
        MockPorts {
            ports: Arc::new(Mutex::new(ports.iter().map(|p| p.to_string()).collect())),
            device: SimulatedDevice::new(),
        }
    }

    pub fn device(&self) -> SimulatedDevice {
        self.device.clone()
    }

    /// Replace the visible port list, as if devices were plugged or unplugged.
    pub fn set_ports(&self, ports: &[&str]) {
        let mut guard = self.ports.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = ports.iter().map(|p| p.to_string()).collect();
    }
}

impl PortProvider for MockPorts {
    fn available_ports(&self) -> Result<Vec<String>> {
        let guard = self.ports.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.clone())
    }

    fn open(&self, settings: &LinkSettings) -> Result<Box<dyn PortIo>> {
        if !self.available_ports()?.contains(&settings.port_name) {
            return Err(SerialError::DeviceError(format!(
                "could not open {}: no such device",
                settings.port_name
            )));
        }
        Ok(Box::new(SimulatedPort {
            device: self.device.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_reply_is_split_into_lines() {
        let device = SimulatedDevice::new();
        device.set_bytes(0x100, &[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02]);
        device.receive(b"read 0x00000100 6\r\n");

        let mut reply = Vec::new();
        loop {
            let chunk = device.take_reply(64);
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= DEFAULT_REPLY_CHUNK);
            reply.extend(chunk);
        }
        assert_eq!(
            String::from_utf8(reply).unwrap(),
            "0x00000100:DEADBEEF\r\n0x00000104:0102\r\nOK\r\n"
        );
    }

    #[test]
    fn test_write_updates_memory() {
        let device = SimulatedDevice::new();
        device.receive(b"write 0x00000010 0xABC\r\n");
        assert_eq!(device.bytes(0x10, 2), vec![0x0A, 0xBC]);
        assert_eq!(device.commands(), vec!["write 0x00000010 0xABC".to_string()]);
    }
}
