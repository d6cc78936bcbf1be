use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, MutexGuard};

use super::transport::{PortIo, PortProvider};
use super::waiter::ByteSource;
use super::{LinkSettings, Result, SerialError};

/// Read granularity used by `ByteSource` consumers.
pub const READ_CHUNK: usize = 1024;

/// Snapshot of the link reported to API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub is_open: bool,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub active_config_id: Option<i64>,
}

struct OpenLink {
    settings: LinkSettings,
    io: Box<dyn PortIo>,
    active_config_id: Option<i64>,
    closed_tx: watch::Sender<bool>,
}

/// Owner of the one open serial handle.
///
/// Every byte-level call goes through `inner`, so concurrent writers
/// serialize instead of interleaving. A logical request/response exchange
/// additionally holds the exchange lock for its whole duration.
pub struct SerialLink {
    provider: Arc<dyn PortProvider>,
    inner: Mutex<Option<OpenLink>>,
    exchange: Mutex<()>,
}

impl SerialLink {
    pub fn new(provider: Arc<dyn PortProvider>) -> Self {
        Self {
            provider,
            inner: Mutex::new(None),
            exchange: Mutex::new(()),
        }
    }

    /// List port names visible to the provider.
    pub fn available_ports(&self) -> Result<Vec<String>> {
        self.provider.available_ports()
    }

    pub async fn open(&self, settings: LinkSettings) -> Result<()> {
        self.open_with_config(settings, None).await
    }

    /// Open the port and remember which stored config it came from.
    pub async fn open_with_config(
        &self,
        settings: LinkSettings,
        config_id: Option<i64>,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return Err(SerialError::AlreadyOpen);
        }

        let provider = Arc::clone(&self.provider);
        let open_settings = settings.clone();
        let io = tokio::task::spawn_blocking(move || provider.open(&open_settings))
            .await
            .map_err(|e| SerialError::DeviceError(format!("open task failed: {}", e)))??;

        let (closed_tx, _closed_rx) = watch::channel(false);
        log::info!("Serial link open on {}", settings.port_name);
        *guard = Some(OpenLink {
            settings,
            io,
            active_config_id: config_id,
            closed_tx,
        });
        Ok(())
    }

    /// Release the handle and signal every reader watching the close signal.
    /// Calling it on a closed link does nothing.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(open) = guard.take() {
            let _ = open.closed_tx.send(true);
            log::info!("Serial link on {} closed", open.settings.port_name);
        }
    }

    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    pub async fn status(&self) -> LinkStatus {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(open) => LinkStatus {
                is_open: true,
                port: Some(open.settings.port_name.clone()),
                baud: Some(open.settings.baud_rate),
                active_config_id: open.active_config_id,
            },
            None => LinkStatus {
                is_open: false,
                port: None,
                baud: None,
                active_config_id: None,
            },
        }
    }

    /// Receiver that flips to `true` when the current handle is closed.
    pub async fn close_signal(&self) -> Result<watch::Receiver<bool>> {
        let guard = self.inner.lock().await;
        guard
            .as_ref()
            .map(|open| open.closed_tx.subscribe())
            .ok_or(SerialError::NotOpen)
    }

    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.inner.lock().await;
        let open = guard.as_mut().ok_or(SerialError::NotOpen)?;
        let written = open.io.send_data(data).await?;
        log::trace!("-> {:?}", String::from_utf8_lossy(data));
        Ok(written)
    }

    pub async fn read(&self, max: usize) -> Result<Vec<u8>> {
        let mut guard = self.inner.lock().await;
        let open = guard.as_mut().ok_or(SerialError::NotOpen)?;
        open.io.read_data(max).await
    }

    /// Drop stale input so a new command's reply cannot be confused with an abandoned one.
    pub async fn flush_input(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let open = guard.as_mut().ok_or(SerialError::NotOpen)?;
        open.io.discard_input().await
    }

    /// Hold the link for a full command/response exchange.
    pub async fn exchange(&self) -> MutexGuard<'_, ()> {
        self.exchange.lock().await
    }

    /// Take the exchange lock only if nobody is mid-exchange.
    pub fn try_exchange(&self) -> Option<MutexGuard<'_, ()>> {
        self.exchange.try_lock().ok()
    }
}

#[async_trait]
impl ByteSource for SerialLink {
    async fn read_chunk(&self) -> Result<Vec<u8>> {
        self.read(READ_CHUNK).await
    }
}
