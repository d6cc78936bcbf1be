pub mod api;
pub mod config;
pub mod device;
pub mod events;
pub mod register;
pub mod serial;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use api::AppState;
use config::AppConfig;
use device::PortMonitor;
use serial::mock::{MockPorts, SIMULATED_PORT};
use serial::{PortProvider, SystemPorts};
use store::Store;

/// Run the bridge until Ctrl-C: open the database, start port monitoring, serve HTTP.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store = Store::open(&config.storage.database_path)
        .with_context(|| format!("opening database {}", config.storage.database_path.display()))?;
    // A previous run may have exited with a config still marked active.
    store.deactivate_configs()?;

    let provider: Arc<dyn PortProvider> = if config.serial.simulated {
        log::info!("Serving a simulated register board on {}", SIMULATED_PORT);
        Arc::new(MockPorts::new(&[SIMULATED_PORT]))
    } else {
        Arc::new(SystemPorts)
    };
    let state = AppState::new(provider, store, &config);

    if let Err(e) = state.ports.refresh().await {
        log::warn!("Initial port enumeration failed: {}", e);
    }
    let mut monitor = PortMonitor::new(
        Arc::clone(&state.ports),
        Duration::from_millis(config.ports.poll_interval_ms),
    );
    monitor.start();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for shutdown signal: {}", e);
        }
        log::info!("Shutting down");
    };

    let served = api::serve(state.clone(), &config.server, shutdown)
        .await
        .with_context(|| format!("serving on {}", config.server.bind_address));

    monitor.stop().await;
    state.disconnect().await;
    served
}
