pub mod port_monitor;

pub use port_monitor::{PortEvent, PortMonitor, PortRegistry};
