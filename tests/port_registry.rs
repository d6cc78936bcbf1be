use std::sync::Arc;
use std::time::Duration;

use regbridge_lib::device::{PortEvent, PortMonitor, PortRegistry};
use regbridge_lib::events::{BridgeEvent, EventHub};
use regbridge_lib::serial::mock::MockPorts;

#[tokio::test]
async fn test_refresh_reports_deltas() {
    let ports = MockPorts::new(&["/dev/ttyUSB1", "/dev/ttyUSB0"]);
    let events = EventHub::new();
    let mut rx = events.subscribe_ports();
    let registry = PortRegistry::new(Arc::new(ports.clone()), events);

    let first = registry.refresh().await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(
        registry.current_ports().await,
        vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()]
    );
    assert!(matches!(rx.try_recv(), Ok(BridgeEvent::PortsUpdate { .. })));

    // Same set, different order: nothing to report.
    ports.set_ports(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
    assert!(registry.refresh().await.unwrap().is_empty());
    assert!(rx.try_recv().is_err());

    ports.set_ports(&["/dev/ttyUSB1", "/dev/ttyACM0"]);
    let changes = registry.refresh().await.unwrap();
    assert!(changes.contains(&PortEvent::PortAdded("/dev/ttyACM0".to_string())));
    assert!(changes.contains(&PortEvent::PortRemoved("/dev/ttyUSB0".to_string())));
    match rx.try_recv() {
        Ok(BridgeEvent::PortsUpdate { ports }) => {
            assert_eq!(ports, vec!["/dev/ttyACM0".to_string(), "/dev/ttyUSB1".to_string()])
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_monitor_pushes_hotplug() {
    let ports = MockPorts::new(&[]);
    let events = EventHub::new();
    let mut rx = events.subscribe_ports();
    let registry = Arc::new(PortRegistry::new(Arc::new(ports.clone()), events));

    let mut monitor = PortMonitor::new(Arc::clone(&registry), Duration::from_millis(10));
    monitor.start();
    assert!(monitor.is_running());

    ports.set_ports(&["/dev/ttyUSB3"]);
    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no port update")
        .unwrap();
    assert_eq!(
        event,
        BridgeEvent::PortsUpdate {
            ports: vec!["/dev/ttyUSB3".to_string()]
        }
    );

    monitor.stop().await;
    assert!(!monitor.is_running());
}
