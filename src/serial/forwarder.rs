//! Passive forwarding of unsolicited serial traffic to subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::link::READ_CHUNK;
use super::{Result, SerialError, SerialLink};
use crate::events::EventHub;

pub const DEFAULT_FORWARD_INTERVAL: Duration = Duration::from_millis(20);

/// Spawn the forwarder for the currently open link.
///
/// The task reads only while no exchange holds the link, so it never eats a
/// reply some waiter expects. It exits when the link is closed.
pub async fn spawn_forwarder(
    link: Arc<SerialLink>,
    events: EventHub,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    let mut closed = link.close_signal().await?;

    Ok(tokio::spawn(async move {
        log::debug!("Serial forwarder started");
        loop {
            tokio::select! {
                changed = closed.changed() => {
                    if changed.is_err() || *closed.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    let Some(_exchange) = link.try_exchange() else {
                        continue;
                    };
                    match link.read(READ_CHUNK).await {
                        Ok(data) => events.publish_serial(&data),
                        Err(SerialError::NotOpen) => break,
                        Err(e) => log::warn!("Serial forwarder read failed: {}", e),
                    }
                }
            }
        }
        log::debug!("Serial forwarder stopped");
    }))
}
