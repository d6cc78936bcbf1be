//! Single writer task for unconfirmed writes.
//!
//! Callers enqueue complete command lines; one task drains the queue and
//! writes each line while holding the link's exchange lock, so queued
//! commands reach the wire whole and in enqueue order. After each write the
//! task keeps the lock until the device's acknowledgement line has been
//! consumed or the ack grace period ends, so a late `OK` never lands in
//! the next exchange's reply.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use crate::events::EventHub;
use crate::serial::{ResponseWaiter, Result, SerialError, SerialLink};

pub const DEFAULT_QUEUE_CAPACITY: usize = 128;
pub const DEFAULT_ACK_GRACE: Duration = Duration::from_millis(250);

enum WriteJob {
    Command(String),
    Barrier(oneshot::Sender<()>),
}

/// How the writer task waits for acknowledgements.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub capacity: usize,
    pub ack_grace: Duration,
    pub poll_interval: Duration,
}

#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<WriteJob>,
}

/// Consume the acknowledgement of a queued write. Its bytes are published
/// as traffic; whatever they say, the write stays reported as sent only.
async fn settle_ack(link: &SerialLink, events: &EventHub, settings: &QueueSettings, command: &str) {
    let waiter = ResponseWaiter::new(settings.ack_grace).with_poll_interval(settings.poll_interval);
    match waiter
        .wait_observed(link, |chunk| events.publish_serial(chunk))
        .await
    {
        Ok(reply) => log::debug!(
            "Queued write {:?} answered {:?}",
            command,
            String::from_utf8_lossy(&reply).trim_end()
        ),
        Err(SerialError::ResponseTimeout { .. }) => {
            log::debug!("Queued write {:?} not acknowledged within {:?}", command, settings.ack_grace)
        }
        Err(e) => log::warn!("Queued write {:?}: {}", command, e),
    }
}

impl WriteQueue {
    /// Start the writer task. It ends once every `WriteQueue` clone is dropped.
    pub fn spawn(link: Arc<SerialLink>, events: EventHub, settings: QueueSettings) -> Self {
        let (tx, mut rx) = mpsc::channel::<WriteJob>(settings.capacity.max(1));

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    WriteJob::Command(command) => {
                        let _exchange = link.exchange().await;
                        let line = command.trim_end();
                        match link.write(command.as_bytes()).await {
                            Ok(_) => {
                                log::debug!("Queued write sent: {}", line);
                                settle_ack(&link, &events, &settings, line).await;
                            }
                            Err(e) => log::warn!("Queued write {:?} dropped: {}", line, e),
                        }
                    }
                    WriteJob::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
            log::debug!("Write queue closed");
        });

        Self { tx }
    }

    /// Hand a command line to the writer, waiting for room in the queue.
    /// Returns once it is queued, not written.
    pub async fn enqueue(&self, command: String) -> Result<()> {
        self.tx
            .send(WriteJob::Command(command))
            .await
            .map_err(|_| SerialError::DeviceError("write queue is closed".to_string()))
    }

    /// Queue a command line only if there is room right now.
    pub fn try_enqueue(&self, command: String) -> Result<()> {
        self.tx.try_send(WriteJob::Command(command)).map_err(|e| match e {
            TrySendError::Full(_) => SerialError::DeviceError("write queue is full".to_string()),
            TrySendError::Closed(_) => SerialError::DeviceError("write queue is closed".to_string()),
        })
    }

    /// Wait until everything queued before this call has been written and settled.
    pub async fn drain(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriteJob::Barrier(done_tx))
            .await
            .map_err(|_| SerialError::DeviceError("write queue is closed".to_string()))?;
        done_rx
            .await
            .map_err(|_| SerialError::DeviceError("write queue stopped".to_string()))
    }
}
