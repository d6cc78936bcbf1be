//! Register operations. Every operation that reached the link is logged.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::register::{BatchWriteStrategy, OperationResult, WriteMode, WriteOp};
use crate::serial::SerialError;
use crate::store::{LogStatus, NewRegisterLog, OperationType, Page, RegisterLog};

fn default_size() -> u8 {
    4
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadRequest {
    pub address: String,
    #[serde(default = "default_size")]
    pub size: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub address: String,
    pub value: String,
    #[serde(default)]
    pub mode: WriteMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchReadRequest {
    pub addresses: Vec<String>,
    #[serde(default = "default_size")]
    pub size: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchWriteRequest {
    pub operations: Vec<WriteOp>,
    #[serde(default)]
    pub strategy: BatchWriteStrategy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub config_id: Option<i64>,
}

async fn record(state: &AppState, operation_type: OperationType, result: &OperationResult, value: Option<String>) {
    let entry = NewRegisterLog {
        serial_config_id: state.link.status().await.active_config_id,
        operation_type,
        address: result.address.clone(),
        value,
        response: Some(result.value.clone().unwrap_or_else(|| result.message.clone())),
        status: if result.success {
            LogStatus::Success
        } else {
            LogStatus::Failed
        },
    };
    if let Err(e) = state.store.add_log(&entry) {
        log::warn!("Could not store register log: {}", e);
    }
}

async fn record_failure(state: &AppState, operation_type: OperationType, address: &str, value: Option<String>, error: &SerialError) {
    if error.is_validation() || matches!(error, SerialError::NotOpen) {
        return;
    }
    let failed = OperationResult::failed(address, error.to_string());
    record(state, operation_type, &failed, value).await;
}

pub async fn read(
    State(state): State<AppState>,
    Json(request): Json<ReadRequest>,
) -> ApiResult<Json<OperationResult>> {
    match state.engine.read(&request.address, request.size).await {
        Ok(result) => {
            record(&state, OperationType::Read, &result, None).await;
            Ok(Json(result))
        }
        Err(e) => {
            record_failure(&state, OperationType::Read, &request.address, None, &e).await;
            Err(e.into())
        }
    }
}

pub async fn write(
    State(state): State<AppState>,
    Json(request): Json<WriteRequest>,
) -> ApiResult<Json<OperationResult>> {
    let value = Some(request.value.clone());
    match state.engine.write(&request.address, &request.value, request.mode).await {
        Ok(result) => {
            record(&state, OperationType::Write, &result, value).await;
            Ok(Json(result))
        }
        Err(e) => {
            record_failure(&state, OperationType::Write, &request.address, value, &e).await;
            Err(e.into())
        }
    }
}

pub async fn batch_read(
    State(state): State<AppState>,
    Json(request): Json<BatchReadRequest>,
) -> ApiResult<Json<Vec<OperationResult>>> {
    let results = state.engine.batch_read(&request.addresses, request.size).await?;
    for result in &results {
        record(&state, OperationType::Read, result, None).await;
    }
    Ok(Json(results))
}

pub async fn batch_write(
    State(state): State<AppState>,
    Json(request): Json<BatchWriteRequest>,
) -> ApiResult<Json<Vec<OperationResult>>> {
    let results = state.engine.batch_write(&request.operations, request.strategy).await?;
    for (op, result) in request.operations.iter().zip(&results) {
        record(&state, OperationType::Write, result, Some(op.value.clone())).await;
    }
    Ok(Json(results))
}

pub async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Page<RegisterLog>>> {
    let page = state
        .store
        .list_logs(query.skip.max(0), query.limit.clamp(1, 1000), query.config_id)?;
    Ok(Json(page))
}
