use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::events::EventHub;
use crate::serial::{PortProvider, Result, SerialError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One difference between two port snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A serial port was added
    PortAdded(String),
    /// A serial port was removed
    PortRemoved(String),
}

/// Tracks the set of visible serial ports and reports changes.
pub struct PortRegistry {
    provider: Arc<dyn PortProvider>,
    events: EventHub,
    snapshot: RwLock<Vec<String>>,
}

impl PortRegistry {
    pub fn new(provider: Arc<dyn PortProvider>, events: EventHub) -> Self {
        Self {
            provider,
            events,
            snapshot: RwLock::new(Vec::new()),
        }
    }

    /// Last enumerated port list, sorted.
    pub async fn current_ports(&self) -> Vec<String> {
        self.snapshot.read().await.clone()
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        let provider = Arc::clone(&self.provider);
        let mut ports = tokio::task::spawn_blocking(move || provider.available_ports())
            .await
            .map_err(|e| SerialError::DeviceError(format!("port enumeration task failed: {}", e)))??;
        ports.sort();
        ports.dedup();
        Ok(ports)
    }

    /// Enumerate now, store the snapshot and publish it if it changed.
    pub async fn refresh(&self) -> Result<Vec<PortEvent>> {
        let ports = self.enumerate().await?;
        let mut snapshot = self.snapshot.write().await;

        let before: BTreeSet<&String> = snapshot.iter().collect();
        let after: BTreeSet<&String> = ports.iter().collect();
        let mut changes: Vec<PortEvent> = after
            .difference(&before)
            .map(|p| PortEvent::PortAdded((*p).clone()))
            .collect();
        changes.extend(before.difference(&after).map(|p| PortEvent::PortRemoved((*p).clone())));

        if !changes.is_empty() {
            for change in &changes {
                log::info!("Port change: {:?}", change);
            }
            *snapshot = ports.clone();
            self.events.publish_ports(ports);
        }
        Ok(changes)
    }
}

/// Periodic task driving `PortRegistry::refresh`.
pub struct PortMonitor {
    registry: Arc<PortRegistry>,
    interval: Duration,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PortMonitor {
    pub fn new(registry: Arc<PortRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            stop_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let registry = Arc::clone(&self.registry);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        log::info!("Port monitor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = registry.refresh().await {
                            log::warn!("Port enumeration failed: {}", e);
                        }
                    }
                }
            }
        });

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        log::info!("Port monitor started ({:?} interval)", interval);
    }

    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
