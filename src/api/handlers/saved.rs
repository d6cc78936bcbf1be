use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::configs::Pagination;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::store::{NewSavedRegister, Page, SavedRegister, SavedRegisterUpdate};

#[derive(Debug, Clone, Deserialize)]
pub struct BatchDeleteRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResponse {
    pub deleted_count: usize,
    pub requested: usize,
}

pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Page<SavedRegister>>> {
    let (skip, limit) = page.bounds();
    Ok(Json(state.store.list_saved(skip, limit)?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(register): Json<NewSavedRegister>,
) -> ApiResult<Json<SavedRegister>> {
    Ok(Json(state.store.create_saved(&register)?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<SavedRegister>> {
    Ok(Json(state.store.get_saved(id)?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<SavedRegisterUpdate>,
) -> ApiResult<Json<SavedRegister>> {
    Ok(Json(state.store.update_saved(id, &update)?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    state.store.delete_saved(id)?;
    Ok(Json(json!({ "status": "ok", "id": id })))
}

pub async fn batch_delete(
    State(state): State<AppState>,
    Json(request): Json<BatchDeleteRequest>,
) -> ApiResult<Json<BatchDeleteResponse>> {
    let deleted_count = state.store.delete_saved_many(&request.ids)?;
    Ok(Json(BatchDeleteResponse {
        deleted_count,
        requested: request.ids.len(),
    }))
}
