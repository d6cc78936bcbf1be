use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use regbridge_lib::api::{self, AppState};
use regbridge_lib::config::AppConfig;
use regbridge_lib::serial::mock::{Fault, MockPorts, SimulatedDevice};
use regbridge_lib::serial::LinkSettings;
use regbridge_lib::store::Store;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PORT: &str = "/dev/ttyUSB0";

fn app() -> (Router, AppState, SimulatedDevice) {
    let ports = MockPorts::new(&[PORT]);
    let device = ports.device();
    let mut config = AppConfig::default();
    config.protocol.read_timeout_ms = 150;
    config.protocol.write_timeout_ms = 150;
    config.protocol.batch_read_timeout_ms = 200;
    let state = AppState::new(Arc::new(ports), Store::in_memory().unwrap(), &config);
    (api::router(state.clone(), &config.server), state, device)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_ping_and_ports() {
    let (app, _, _) = app();
    let (status, body) = call(&app, "GET", "/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let (status, body) = call(&app, "GET", "/ports", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([PORT]));
}

#[tokio::test]
async fn test_connect_lifecycle() {
    let (app, _, _) = app();
    let (status, body) = call(&app, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isOpen"], false);

    let (status, body) = call(&app, "POST", "/connect", Some(json!({ "port": PORT, "baud": 9600 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isOpen"], true);
    assert_eq!(body["baud"], 9600);

    let (status, body) = call(&app, "POST", "/connect", Some(json!({ "port": PORT }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "ALREADY_OPEN");

    let (status, body) = call(&app, "POST", "/disconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isOpen"], false);
    let (status, _) = call(&app, "POST", "/disconnect", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_connect_rejects_unknown_stop_bits() {
    let (app, state, _) = app();
    let (status, body) = call(&app, "POST", "/connect", Some(json!({ "port": PORT, "stopBits": 3 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_STOP_BITS");
    assert!(!state.link.is_open().await);

    let (status, body) = call(&app, "POST", "/connect", Some(json!({ "port": PORT, "stopBits": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isOpen"], true);
}

#[tokio::test]
async fn test_register_read_requires_open_link() {
    let (app, _, _) = app();
    let (status, body) = call(&app, "POST", "/register/read", Some(json!({ "address": "0x10", "size": 4 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NOT_OPEN");
}

#[tokio::test]
async fn test_register_operations_are_logged() {
    let (app, state, device) = app();
    device.set_u32(0x2000_0000, 0xFFB2_5233);
    device.set_fault(0x2000_0040, Fault::Silent);
    call(&app, "POST", "/connect", Some(json!({ "port": PORT }))).await;

    let (status, body) = call(&app, "POST", "/register/read", Some(json!({ "address": "0x20000000", "size": 4 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["value"], "0xFFB25233");

    let (status, body) = call(&app, "POST", "/register/read", Some(json!({ "address": "0x20000040" }))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "RESPONSE_TIMEOUT");

    let (status, body) = call(&app, "POST", "/register/read", Some(json!({ "address": "20000000" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ADDRESS_FORMAT");

    let (status, body) = call(
        &app,
        "POST",
        "/register/write",
        Some(json!({ "address": "0x20000010", "value": "0xABCD", "mode": "confirmed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Write confirmed");

    // Validation failures never reach the log.
    let logs = state.store.list_logs(0, 100, None).unwrap();
    assert_eq!(logs.total, 3);

    let (status, body) = call(&app, "GET", "/register/logs?limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["operationType"], "write");
}

#[tokio::test]
async fn test_batch_endpoints() {
    let (app, _, device) = app();
    device.set_u32(0x100, 1);
    device.set_u32(0x104, 2);
    call(&app, "POST", "/connect", Some(json!({ "port": PORT }))).await;

    let (status, body) = call(
        &app,
        "POST",
        "/register/batch-read",
        Some(json!({ "addresses": ["0x104", "0x100"], "size": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["value"], "0x00000002");
    assert_eq!(body[1]["value"], "0x00000001");

    let (status, body) = call(
        &app,
        "POST",
        "/register/batch-write",
        Some(json!({
            "operations": [
                { "address": "0x200", "value": "0x1" },
                { "address": "0x204", "value": "0x2" }
            ],
            "strategy": "concurrent"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["success"], true);

    let (status, body) = call(
        &app,
        "POST",
        "/register/batch-read",
        Some(json!({ "addresses": ["0x100"], "size": 12 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_SIZE");
}

#[tokio::test]
async fn test_saved_register_routes() {
    let (app, _, _) = app();
    let register = json!({ "address": "0x20470C04", "data": "0x1F", "value32bit": "0x0000001F" });

    let (status, created) = call(&app, "POST", "/register/saved", Some(register.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let id = created["id"].as_i64().unwrap();

    let (status, body) = call(&app, "POST", "/register/saved", Some(register)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ADDRESS_EXISTS");
    assert_eq!(body["field"], "address");
    assert_eq!(body["value"], "0x20470C04");

    let (status, body) = call(
        &app,
        "POST",
        "/register/saved",
        Some(json!({ "address": "20470C08", "data": "0x1", "value32bit": "0x1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_HEX_FORMAT");

    let (status, body) = call(&app, "GET", &format!("/register/saved/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value32bit"], "0x0000001F");

    let (status, body) = call(&app, "GET", "/register/saved/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "REGISTER_NOT_FOUND");

    let (status, body) = call(&app, "POST", "/register/saved/batch-delete", Some(json!({ "ids": [id, 999] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deletedCount"], 1);
}

#[tokio::test]
async fn test_open_stored_config() {
    let (app, state, _) = app();
    let (status, config) = call(
        &app,
        "POST",
        "/configs",
        Some(json!({ "name": "bench", "port": PORT, "baudrate": 57600 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = config["id"].as_i64().unwrap();

    let (status, body) = call(&app, "POST", &format!("/configs/{}/open", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activeConfigId"], id);
    assert_eq!(body["baud"], 57600);
    assert!(state.store.get_config(id).unwrap().is_active);

    call(&app, "POST", "/disconnect", None).await;
    assert!(!state.store.get_config(id).unwrap().is_active);

    let (status, body) = call(&app, "GET", "/configs/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "CONFIG_NOT_FOUND");
}

async fn serve_app() -> (SocketAddr, AppState, MockPorts) {
    let ports = MockPorts::new(&[PORT]);
    let config = AppConfig::default();
    let state = AppState::new(Arc::new(ports.clone()), Store::in_memory().unwrap(), &config);
    state.ports.refresh().await.unwrap();

    let app = api::router(state.clone(), &config.server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state, ports)
}

async fn next_text(ws: &mut WsClient) -> String {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame within 2s")
            .expect("socket still open")
            .unwrap();
        if let WsMessage::Text(text) = message {
            return text.as_str().to_string();
        }
    }
}

async fn next_json(ws: &mut WsClient) -> Value {
    serde_json::from_str(&next_text(ws).await).unwrap()
}

async fn send_text(ws: &mut WsClient, text: &str) {
    ws.send(WsMessage::Text(text.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn test_ports_channel() {
    let (addr, state, ports) = serve_app().await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws/serial-ports", addr)).await.unwrap();

    assert_eq!(next_json(&mut ws).await, json!({ "type": "ports_update", "ports": [PORT] }));

    send_text(&mut ws, "ping").await;
    assert_eq!(next_text(&mut ws).await, "pong");
    send_text(&mut ws, r#"{"type":"ping"}"#).await;
    assert_eq!(next_json(&mut ws).await, json!({ "type": "pong" }));

    ports.set_ports(&[PORT, "/dev/ttyUSB1"]);
    send_text(&mut ws, "get_ports").await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "type": "ports_update", "ports": [PORT, "/dev/ttyUSB1"] })
    );

    // Changes found by the registry are pushed without a request.
    ports.set_ports(&["/dev/ttyUSB1"]);
    state.ports.refresh().await.unwrap();
    let mut pushed = next_json(&mut ws).await;
    while pushed["ports"] != json!(["/dev/ttyUSB1"]) {
        assert_eq!(pushed["type"], "ports_update");
        pushed = next_json(&mut ws).await;
    }
}

#[tokio::test]
async fn test_serial_channel_writes_and_streams() {
    let (addr, state, ports) = serve_app().await;
    let device = ports.device();
    state.connect(LinkSettings::new(PORT, 115200), None).await.unwrap();
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    send_text(&mut ws, r#"{"type":"shout"}"#).await;
    assert_eq!(next_json(&mut ws).await["type"], "error");

    send_text(
        &mut ws,
        &json!({ "type": "write", "payload": "hello", "appendNewline": true }).to_string(),
    )
    .await;

    // The simulated board answers the unknown command with ERR, which the
    // forwarder streams back to the client.
    let mut streamed = String::new();
    while !streamed.contains("ERR\r\n") {
        let event = next_json(&mut ws).await;
        assert_eq!(event["type"], "serial");
        streamed.push_str(event["payload"].as_str().unwrap());
    }
    assert_eq!(device.commands(), vec!["hello".to_string()]);

    state.disconnect().await;
}
