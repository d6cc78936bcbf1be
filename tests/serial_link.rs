use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regbridge_lib::events::{BridgeEvent, EventHub};
use regbridge_lib::serial::mock::{Fault, MockPorts};
use regbridge_lib::serial::{
    spawn_forwarder, ByteSource, LinkSettings, Parity, PortProvider, ResponseWaiter, Result,
    SerialError, SerialLink, StopBits, SystemPorts,
};

const PORT: &str = "/dev/ttyUSB0";

fn link() -> (Arc<SerialLink>, MockPorts) {
    let ports = MockPorts::new(&[PORT]);
    (Arc::new(SerialLink::new(Arc::new(ports.clone()))), ports)
}

#[tokio::test]
async fn test_second_open_is_rejected() {
    let (link, _) = link();
    link.open(LinkSettings::new(PORT, 115200)).await.unwrap();
    assert!(matches!(
        link.open(LinkSettings::new(PORT, 9600)).await,
        Err(SerialError::AlreadyOpen)
    ));
    // The first handle stays in place.
    assert_eq!(link.status().await.baud, Some(115200));
}

#[tokio::test]
async fn test_close_twice_is_harmless() {
    let (link, _) = link();
    link.open(LinkSettings::new(PORT, 115200)).await.unwrap();
    link.close().await;
    link.close().await;

    assert!(!link.is_open().await);
    assert!(matches!(link.write(b"x").await, Err(SerialError::NotOpen)));
    assert!(matches!(link.read(16).await, Err(SerialError::NotOpen)));
    assert!(matches!(link.flush_input().await, Err(SerialError::NotOpen)));
}

#[tokio::test]
async fn test_open_missing_port_fails_with_device_error() {
    let (link, _) = link();
    let result = link.open(LinkSettings::new("/dev/ttyUSB7", 115200)).await;
    assert!(matches!(result, Err(SerialError::DeviceError(_))));
    assert!(!link.is_open().await);
}

#[tokio::test]
async fn test_status_reports_port_and_config() {
    let (link, _) = link();
    link.open_with_config(LinkSettings::new(PORT, 57600), Some(3))
        .await
        .unwrap();
    let status = link.status().await;
    assert!(status.is_open);
    assert_eq!(status.port.as_deref(), Some(PORT));
    assert_eq!(status.baud, Some(57600));
    assert_eq!(status.active_config_id, Some(3));

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["isOpen"], true);
    assert_eq!(json["activeConfigId"], 3);
}

#[tokio::test]
async fn test_flush_drops_stale_input() {
    let (link, ports) = link();
    link.open(LinkSettings::new(PORT, 115200)).await.unwrap();
    ports.device().inject_noise(b"left over\r\n");
    link.flush_input().await.unwrap();
    assert!(link.read(64).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_close_signal_fires() {
    let (link, _) = link();
    link.open(LinkSettings::new(PORT, 115200)).await.unwrap();
    let mut closed = link.close_signal().await.unwrap();
    link.close().await;
    tokio::time::timeout(Duration::from_secs(1), closed.changed())
        .await
        .expect("close signal not delivered")
        .ok();
    assert!(link.close_signal().await.is_err());
}

struct Never;

#[async_trait]
impl ByteSource for Never {
    async fn read_chunk(&self) -> Result<Vec<u8>> {
        Ok(b"..".to_vec())
    }
}

#[tokio::test]
async fn test_waiter_times_out_within_budget() {
    let budget = Duration::from_millis(120);
    let started = Instant::now();
    let err = ResponseWaiter::new(budget).wait(&Never).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(elapsed >= budget, "returned early after {:?}", elapsed);
    assert!(elapsed < budget + Duration::from_millis(500), "overshot: {:?}", elapsed);
    match err {
        SerialError::ResponseTimeout { timeout, partial } => {
            assert_eq!(timeout, budget);
            assert!(!partial.is_empty());
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_waiter_on_silent_link_times_out() {
    let (link, _) = link();
    link.open(LinkSettings::new(PORT, 115200)).await.unwrap();
    let budget = Duration::from_millis(80);
    let started = Instant::now();
    let result = ResponseWaiter::new(budget).wait(link.as_ref()).await;
    assert!(matches!(result, Err(SerialError::ResponseTimeout { ref partial, .. }) if partial.is_empty()));
    assert!(started.elapsed() >= budget);
}

#[tokio::test]
async fn test_close_ends_pending_wait() {
    let (link, ports) = link();
    link.open(LinkSettings::new(PORT, 115200)).await.unwrap();
    ports.device().set_fault(0x40, Fault::Silent);
    link.write(b"read 0x00000040 4\r\n").await.unwrap();

    let waiting = Arc::clone(&link);
    let wait = tokio::spawn(async move {
        ResponseWaiter::new(Duration::from_secs(10))
            .wait(waiting.as_ref())
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    link.close().await;

    let result = tokio::time::timeout(Duration::from_secs(1), wait)
        .await
        .expect("waiter kept running after close")
        .unwrap();
    assert!(matches!(result, Err(SerialError::NotOpen)));
}

#[tokio::test]
async fn test_forwarder_publishes_unsolicited_bytes_until_close() {
    let (link, ports) = link();
    link.open(LinkSettings::new(PORT, 115200)).await.unwrap();
    let events = EventHub::new();
    let mut rx = events.subscribe_serial();
    let handle = spawn_forwarder(Arc::clone(&link), events, Duration::from_millis(5))
        .await
        .unwrap();

    ports.device().inject_noise(b"boot complete\r\n");

    let mut text = String::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    while text != "boot complete\r\n" && Instant::now() < deadline {
        if let Ok(Ok(BridgeEvent::Serial { payload })) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            text.push_str(&payload);
        }
    }
    assert_eq!(text, "boot complete\r\n");

    link.close().await;
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("forwarder stops after close")
        .unwrap();
}

#[tokio::test]
async fn test_forwarder_requires_open_link() {
    let (link, _) = link();
    let result = spawn_forwarder(link, EventHub::new(), Duration::from_millis(5)).await;
    assert!(matches!(result, Err(SerialError::NotOpen)));
}

#[test]
fn test_stop_bits_accept_only_standard_values() {
    assert_eq!(StopBits::from_f64(1.0), Some(StopBits::One));
    assert_eq!(StopBits::from_f64(1.5), Some(StopBits::OnePointFive));
    assert_eq!(StopBits::from_f64(2.0), Some(StopBits::Two));
    assert_eq!(StopBits::from_f64(1.3), None);
    assert!(matches!(StopBits::parse(3.0), Err(SerialError::InvalidStopBits(_))));
}

#[test]
fn test_system_ports_refuse_one_and_a_half_stop_bits() {
    let settings = LinkSettings::new("/dev/ttyUSB0", 9600).with_framing(8, Parity::None, StopBits::OnePointFive);
    match SystemPorts.open(&settings) {
        Err(SerialError::DeviceError(message)) => assert!(message.contains("1.5")),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("1.5 stop bits must not open"),
    }
}
