use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::protocol::{has_terminator, RESPONSE_TERMINATOR};
use super::{Result, SerialError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Anything the waiter can pull reply bytes from.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Bytes currently available; empty when nothing arrived yet.
    async fn read_chunk(&self) -> Result<Vec<u8>>;
}

/// Collects a device reply until its terminator shows up or the budget runs out.
#[derive(Debug, Clone)]
pub struct ResponseWaiter {
    timeout: Duration,
    poll_interval: Duration,
}

impl ResponseWaiter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn wait(&self, source: &dyn ByteSource) -> Result<Vec<u8>> {
        self.wait_observed(source, |_| {}).await
    }

    /// Like `wait`, handing every received chunk to `observe` as it arrives.
    pub async fn wait_observed<F>(&self, source: &dyn ByteSource, mut observe: F) -> Result<Vec<u8>>
    where
        F: FnMut(&[u8]) + Send,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let chunk = source.read_chunk().await?;
            if !chunk.is_empty() {
                observe(&chunk);
                // Only the tail can newly complete the terminator.
                let scan_from = buffer.len().saturating_sub(RESPONSE_TERMINATOR.len() - 1);
                buffer.extend_from_slice(&chunk);
                if has_terminator(&buffer[scan_from..]) {
                    log::debug!(
                        "Response complete after {:?} ({} bytes)",
                        started.elapsed(),
                        buffer.len()
                    );
                    return Ok(buffer);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                if buffer.is_empty() {
                    log::warn!("No response within {:?}", self.timeout);
                } else {
                    log::warn!(
                        "Response timeout after {:?}; partial: {:?}",
                        self.timeout,
                        String::from_utf8_lossy(&buffer)
                    );
                }
                return Err(SerialError::ResponseTimeout {
                    timeout: self.timeout,
                    partial: buffer,
                });
            }

            if chunk.is_empty() {
                tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            }
        }
    }
}
