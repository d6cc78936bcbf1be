//! Stored serial configurations.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::serial::LinkStatus;
use crate::store::{NewSerialConfig, Page, SerialConfig, SerialConfigUpdate};

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

impl Pagination {
    pub fn bounds(&self) -> (i64, i64) {
        (self.skip.max(0), self.limit.clamp(1, 1000))
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Page<SerialConfig>>> {
    let (skip, limit) = page.bounds();
    Ok(Json(state.store.list_configs(skip, limit)?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(config): Json<NewSerialConfig>,
) -> ApiResult<Json<SerialConfig>> {
    let created = state.store.create_config(&config)?;
    log::info!("Created serial config {} ({})", created.id, created.name);
    Ok(Json(created))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<SerialConfig>> {
    Ok(Json(state.store.get_config(id)?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<SerialConfigUpdate>,
) -> ApiResult<Json<SerialConfig>> {
    Ok(Json(state.store.update_config(id, &update)?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    state.store.delete_config(id)?;
    Ok(Json(json!({ "status": "ok", "id": id })))
}

/// Open the link with a stored config and mark it active.
pub async fn open(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<LinkStatus>> {
    let config = state.store.get_config(id)?;
    let status = state.connect(config.link_settings()?, Some(id)).await?;
    state.store.activate_config(id)?;
    Ok(Json(status))
}
