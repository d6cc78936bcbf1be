//! In-process fan-out for serial traffic and port changes.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const SERIAL_CAPACITY: usize = 256;
const PORT_CAPACITY: usize = 16;

/// Messages pushed to WebSocket subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Text decoded from bytes the device sent.
    Serial { payload: String },
    /// Full snapshot of visible serial ports.
    PortsUpdate { ports: Vec<String> },
}

/// Two broadcast channels: raw serial traffic, port snapshots.
#[derive(Clone)]
pub struct EventHub {
    serial_tx: broadcast::Sender<BridgeEvent>,
    ports_tx: broadcast::Sender<BridgeEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (serial_tx, _) = broadcast::channel(SERIAL_CAPACITY);
        let (ports_tx, _) = broadcast::channel(PORT_CAPACITY);
        Self { serial_tx, ports_tx }
    }

    /// Publish bytes read from the link. Nobody listening is not an error.
    pub fn publish_serial(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let payload = String::from_utf8_lossy(data).into_owned();
        let _ = self.serial_tx.send(BridgeEvent::Serial { payload });
    }

    pub fn publish_ports(&self, ports: Vec<String>) {
        let _ = self.ports_tx.send(BridgeEvent::PortsUpdate { ports });
    }

    pub fn subscribe_serial(&self) -> broadcast::Receiver<BridgeEvent> {
        self.serial_tx.subscribe()
    }

    pub fn subscribe_ports(&self) -> broadcast::Receiver<BridgeEvent> {
        self.ports_tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
