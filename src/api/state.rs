use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, SerialDefaults};
use crate::device::PortRegistry;
use crate::events::EventHub;
use crate::register::RegisterEngine;
use crate::serial::{spawn_forwarder, LinkSettings, LinkStatus, PortProvider, Result, SerialLink};
use crate::store::Store;

/// Everything handlers share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub link: Arc<SerialLink>,
    pub engine: Arc<RegisterEngine>,
    pub store: Arc<Store>,
    pub events: EventHub,
    pub ports: Arc<PortRegistry>,
    pub serial_defaults: SerialDefaults,
    forwarder: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AppState {
    /// Wire the link, engine and registry together. Needs a running tokio runtime.
    pub fn new(provider: Arc<dyn PortProvider>, store: Store, config: &AppConfig) -> Self {
        let events = EventHub::new();
        let link = Arc::new(SerialLink::new(Arc::clone(&provider)));
        let engine = RegisterEngine::new(Arc::clone(&link), config.protocol.engine_config(), events.clone());
        let ports = PortRegistry::new(provider, events.clone());

        Self {
            link,
            engine: Arc::new(engine),
            store: Arc::new(store),
            events,
            ports: Arc::new(ports),
            serial_defaults: config.serial.clone(),
            forwarder: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the link and start forwarding its unsolicited traffic.
    pub async fn connect(&self, settings: LinkSettings, config_id: Option<i64>) -> Result<LinkStatus> {
        self.link.open_with_config(settings, config_id).await?;
        let interval = Duration::from_millis(self.serial_defaults.forward_interval_ms);
        let handle = spawn_forwarder(Arc::clone(&self.link), self.events.clone(), interval).await?;
        if let Some(previous) = self.forwarder.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(self.link.status().await)
    }

    /// Close the link; safe to call when nothing is open.
    pub async fn disconnect(&self) -> LinkStatus {
        self.link.close().await;
        if let Some(handle) = self.forwarder.lock().await.take() {
            let _ = handle.await;
        }
        if let Err(e) = self.store.deactivate_configs() {
            log::warn!("Could not clear active config: {}", e);
        }
        self.link.status().await
    }
}
