//! Register read/write orchestration over the shared serial link.
//!
//! Every confirmed exchange runs the same sequence under the link's exchange
//! lock: flush stale input, send one command line, collect the reply with a
//! `ResponseWaiter`, parse it. Unconfirmed writes go through the
//! `WriteQueue` instead; the caller never waits for the device.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::events::EventHub;
use crate::serial::protocol::{
    build_read_command, build_write_command, parse_ack, parse_read_payload, split_payload,
    validate_size,
};
use crate::serial::{RegisterAddress, RegisterValue, ResponseWaiter, Result, SerialError, SerialLink};

use super::grouper::{group_addresses, DEFAULT_MAX_BLOCK_SIZE};
use super::types::{AccessDescriptor, BatchWriteStrategy, OperationResult, WriteMode, WriteOp};
use super::writer::{QueueSettings, WriteQueue, DEFAULT_ACK_GRACE, DEFAULT_QUEUE_CAPACITY};

/// Timeouts and limits for register exchanges.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub batch_read_timeout: Duration,
    pub poll_interval: Duration,
    pub max_block_size: usize,
    pub write_queue_capacity: usize,
    /// How long the write queue waits for the ack of an unconfirmed write.
    pub write_ack_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            batch_read_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(10),
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            write_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_ack_grace: DEFAULT_ACK_GRACE,
        }
    }
}

/// Progress of one command/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    CommandSent,
    AwaitingResponse,
    Parsed,
    TimedOut,
    Malformed,
    ResultEmitted,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeState::Idle => "idle",
            ExchangeState::CommandSent => "command-sent",
            ExchangeState::AwaitingResponse => "awaiting-response",
            ExchangeState::Parsed => "parsed",
            ExchangeState::TimedOut => "timed-out",
            ExchangeState::Malformed => "malformed",
            ExchangeState::ResultEmitted => "result-emitted",
        };
        f.write_str(name)
    }
}

struct ExchangeTrace<'a> {
    command: &'a str,
    state: ExchangeState,
}

impl<'a> ExchangeTrace<'a> {
    fn new(command: &'a str) -> Self {
        Self {
            command: command.trim_end(),
            state: ExchangeState::Idle,
        }
    }

    fn advance(&mut self, next: ExchangeState) {
        log::debug!("[{}] {} -> {}", self.command, self.state, next);
        self.state = next;
    }
}

pub struct RegisterEngine {
    link: Arc<SerialLink>,
    writer: WriteQueue,
    events: EventHub,
    config: EngineConfig,
}

impl RegisterEngine {
    /// Build an engine over `link`. Every reply chunk it reads is published on
    /// `events`. Spawns the write queue task, so a tokio runtime must be running.
    pub fn new(link: Arc<SerialLink>, config: EngineConfig, events: EventHub) -> Self {
        let settings = QueueSettings {
            capacity: config.write_queue_capacity,
            ack_grace: config.write_ack_grace,
            poll_interval: config.poll_interval,
        };
        let writer = WriteQueue::spawn(Arc::clone(&link), events.clone(), settings);
        Self {
            link,
            writer,
            events,
            config,
        }
    }

    pub fn link(&self) -> &Arc<SerialLink> {
        &self.link
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn write_queue(&self) -> &WriteQueue {
        &self.writer
    }

    async fn exchange<T, P>(&self, command: &str, timeout: Duration, parse: P) -> Result<T>
    where
        P: FnOnce(&[u8]) -> Result<T>,
    {
        let _exchange = self.link.exchange().await;
        let mut trace = ExchangeTrace::new(command);

        self.link.flush_input().await?;
        self.link.write(command.as_bytes()).await?;
        trace.advance(ExchangeState::CommandSent);

        trace.advance(ExchangeState::AwaitingResponse);
        let waiter = ResponseWaiter::new(timeout).with_poll_interval(self.config.poll_interval);
        let events = &self.events;
        let reply = waiter
            .wait_observed(self.link.as_ref(), |chunk| events.publish_serial(chunk))
            .await;

        let raw = match reply {
            Ok(raw) => raw,
            Err(e) => {
                if matches!(e, SerialError::ResponseTimeout { .. }) {
                    trace.advance(ExchangeState::TimedOut);
                }
                return Err(e);
            }
        };

        match parse(&raw) {
            Ok(value) => {
                trace.advance(ExchangeState::Parsed);
                trace.advance(ExchangeState::ResultEmitted);
                Ok(value)
            }
            Err(e) => {
                trace.advance(ExchangeState::Malformed);
                Err(e)
            }
        }
    }

    /// Read one register. Errors propagate to the caller.
    pub async fn read(&self, address: &str, size: u8) -> Result<OperationResult> {
        let access = AccessDescriptor {
            address: address.parse()?,
            size_bytes: validate_size(size)?,
        };
        self.read_access(access).await
    }

    pub async fn read_access(&self, access: AccessDescriptor) -> Result<OperationResult> {
        let size = validate_size(access.size_bytes)?;
        let command = build_read_command(access.address, u32::from(size));
        let payload = self
            .exchange(&command, self.config.read_timeout, |raw| {
                parse_read_payload(raw, 1, size)
            })
            .await?;

        Ok(OperationResult::ok(
            access.address.to_string(),
            Some(format!("0x{}", payload)),
            "Read successful",
        ))
    }

    /// Write one register, confirmed or fire-and-forget.
    pub async fn write(&self, address: &str, value: &str, mode: WriteMode) -> Result<OperationResult> {
        let address: RegisterAddress = address.parse()?;
        let value: RegisterValue = value.parse()?;
        match mode {
            WriteMode::Confirmed => self.write_confirmed(address, &value).await,
            WriteMode::FireAndForget => self.write_unconfirmed(address, &value).await,
        }
    }

    async fn write_confirmed(&self, address: RegisterAddress, value: &RegisterValue) -> Result<OperationResult> {
        let command = build_write_command(address, value);
        self.exchange(&command, self.config.write_timeout, parse_ack)
            .await?;
        Ok(OperationResult::ok(
            address.to_string(),
            Some(value.to_string()),
            "Write confirmed",
        ))
    }

    async fn write_unconfirmed(&self, address: RegisterAddress, value: &RegisterValue) -> Result<OperationResult> {
        if !self.link.is_open().await {
            return Err(SerialError::NotOpen);
        }
        self.writer.enqueue(build_write_command(address, value)).await?;
        Ok(OperationResult::ok(
            address.to_string(),
            Some(value.to_string()),
            "Write command sent (not confirmed)",
        ))
    }

    /// Read many registers with as few burst commands as possible.
    ///
    /// Results come back in request order, one per requested address.
    /// Repeated addresses share the outcome of a single wire read. Failures
    /// are reported per address and never abort the remaining blocks.
    pub async fn batch_read(&self, addresses: &[String], size: u8) -> Result<Vec<OperationResult>> {
        let size = validate_size(size)?;
        if !self.link.is_open().await {
            return Err(SerialError::NotOpen);
        }

        let parsed: Vec<Result<RegisterAddress>> = addresses.iter().map(|a| a.parse()).collect();
        let valid: Vec<RegisterAddress> = parsed.iter().filter_map(|p| p.as_ref().ok().copied()).collect();

        let blocks = group_addresses(&valid, size, self.config.max_block_size);
        log::info!(
            "Batch read of {} addresses ({} unique) in {} block(s)",
            addresses.len(),
            valid.len(),
            blocks.len()
        );

        let mut outcomes: HashMap<RegisterAddress, std::result::Result<String, String>> = HashMap::new();
        for block in &blocks {
            let command = build_read_command(block.start_address, block.length_bytes);
            let count = block.members.len();
            let reply = self
                .exchange(&command, self.config.batch_read_timeout, |raw| {
                    parse_read_payload(raw, count, size)
                })
                .await;

            match reply {
                Ok(payload) => {
                    for (member, value) in block.members.iter().zip(split_payload(&payload, size)) {
                        outcomes.insert(*member, Ok(value));
                    }
                }
                Err(e) => {
                    log::warn!("Burst read at {} failed: {}", block.start_address, e);
                    let message = e.to_string();
                    for member in &block.members {
                        outcomes.insert(*member, Err(message.clone()));
                    }
                }
            }
        }

        let results = addresses
            .iter()
            .zip(parsed)
            .map(|(text, parsed)| match parsed {
                Err(e) => OperationResult::failed(text.clone(), e.to_string()),
                Ok(address) => match outcomes.get(&address) {
                    Some(Ok(value)) => OperationResult::ok(address.to_string(), Some(value.clone()), "Read successful"),
                    Some(Err(message)) => OperationResult::failed(address.to_string(), message.clone()),
                    None => OperationResult::failed(address.to_string(), "Address was not read"),
                },
            })
            .collect();
        Ok(results)
    }

    /// Write many registers.
    ///
    /// `Sequential` confirms each write before sending the next. `Concurrent`
    /// queues every command at once and reports them as sent; once the write
    /// queue is full the remaining ops fail with `write queue is full`.
    /// Entries with a bad address or value fail on their own before any I/O.
    pub async fn batch_write(&self, ops: &[WriteOp], strategy: BatchWriteStrategy) -> Result<Vec<OperationResult>> {
        if !self.link.is_open().await {
            return Err(SerialError::NotOpen);
        }

        let parsed: Vec<Result<(RegisterAddress, RegisterValue)>> = ops
            .iter()
            .map(|op| -> Result<(RegisterAddress, RegisterValue)> {
                Ok((op.address.parse()?, op.value.parse()?))
            })
            .collect();

        match strategy {
            BatchWriteStrategy::Sequential => {
                let mut results = Vec::with_capacity(ops.len());
                for (op, parsed) in ops.iter().zip(parsed) {
                    let result = match parsed {
                        Err(e) => OperationResult::failed(op.address.clone(), e.to_string()),
                        Ok((address, value)) => match self.write_confirmed(address, &value).await {
                            Ok(result) => result,
                            Err(e) => {
                                log::warn!("Write to {} failed: {}", address, e);
                                OperationResult::failed(address.to_string(), e.to_string())
                            }
                        },
                    };
                    results.push(result);
                }
                Ok(results)
            }
            BatchWriteStrategy::Concurrent => {
                // Never waits for queue room: ops beyond the free capacity fail individually.
                let results = ops
                    .iter()
                    .zip(parsed)
                    .map(|(op, parsed)| match parsed {
                        Err(e) => OperationResult::failed(op.address.clone(), e.to_string()),
                        Ok((address, value)) => match self.writer.try_enqueue(build_write_command(address, &value)) {
                            Ok(()) => OperationResult::ok(
                                address.to_string(),
                                Some(value.to_string()),
                                "Write command sent (not confirmed)",
                            ),
                            Err(e) => OperationResult::failed(address.to_string(), e.to_string()),
                        },
                    })
                    .collect();
                Ok(results)
            }
        }
    }
}
