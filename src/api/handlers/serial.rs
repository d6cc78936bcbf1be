//! Port discovery and connection lifecycle.

use std::time::Duration;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::serial::{LinkSettings, LinkStatus, Parity, StopBits};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub port: String,
    pub baud: Option<u32>,
    pub byte_size: Option<u8>,
    pub parity: Option<Parity>,
    pub stop_bits: Option<f64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialWriteRequest {
    pub data: String,
    #[serde(default)]
    pub append_newline: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialWriteResponse {
    pub bytes_written: usize,
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Enumerate ports now; also refreshes the snapshot pushed to port subscribers.
pub async fn list_ports(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    state.ports.refresh().await?;
    Ok(Json(state.ports.current_ports().await))
}

pub async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<Json<LinkStatus>> {
    let defaults = &state.serial_defaults;
    let stop_bits = match request.stop_bits {
        Some(value) => StopBits::parse(value)?,
        None => StopBits::One,
    };
    let settings = LinkSettings::new(request.port, request.baud.unwrap_or(defaults.baud_rate))
        .with_framing(
            request.byte_size.unwrap_or(8),
            request.parity.unwrap_or(Parity::None),
            stop_bits,
        )
        .with_read_timeout(Duration::from_millis(
            request.timeout_ms.unwrap_or(defaults.read_timeout_ms),
        ));

    let status = state.connect(settings, None).await?;
    Ok(Json(status))
}

pub async fn disconnect(State(state): State<AppState>) -> Json<LinkStatus> {
    Json(state.disconnect().await)
}

pub async fn status(State(state): State<AppState>) -> Json<LinkStatus> {
    Json(state.link.status().await)
}

/// Raw text write, outside the register protocol.
pub async fn write(
    State(state): State<AppState>,
    Json(request): Json<SerialWriteRequest>,
) -> ApiResult<Json<SerialWriteResponse>> {
    let bytes_written = write_text(&state, &request.data, request.append_newline).await?;
    Ok(Json(SerialWriteResponse { bytes_written }))
}

pub(crate) async fn write_text(
    state: &AppState,
    data: &str,
    append_newline: bool,
) -> crate::serial::Result<usize> {
    let mut payload = data.to_string();
    if append_newline {
        payload.push_str(crate::serial::protocol::LINE_ENDING);
    }
    let _exchange = state.link.exchange().await;
    state.link.write(payload.as_bytes()).await
}
