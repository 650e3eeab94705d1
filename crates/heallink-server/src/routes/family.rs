use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use heallink_core::family::{CreateFamilyMember, UpdateFamilyMember};
use serde_json::{json, Value};

use super::{error_body, to_error, ApiError, AppState};
use crate::auth::Account;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/family", get(list_members).post(create_member))
        .route(
            "/api/family/{id}",
            get(get_member).put(update_member).delete(delete_member),
        )
}

async fn list_members(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
) -> Result<Json<Value>, ApiError> {
    state
        .db
        .list_family_members(&account.id)
        .await
        .map(|m| Json(json!(m)))
        .map_err(to_error)
}

async fn create_member(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Json(input): Json<CreateFamilyMember>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    input
        .validate()
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    state
        .db
        .create_family_member(&account.id, &input)
        .await
        .map(|m| (StatusCode::CREATED, Json(json!(m))))
        .map_err(to_error)
}

async fn get_member(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .db
        .get_family_member(&account.id, &id)
        .await
        .map(|m| Json(json!(m)))
        .map_err(to_error)
}

async fn update_member(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
    Json(input): Json<UpdateFamilyMember>,
) -> Result<Json<Value>, ApiError> {
    if input.name.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(error_body(StatusCode::BAD_REQUEST, "name cannot be empty"));
    }
    state
        .db
        .update_family_member(&account.id, &id, &input)
        .await
        .map(|m| Json(json!(m)))
        .map_err(to_error)
}

/// 409 while any record or appointment still names the member.
async fn delete_member(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .db
        .delete_family_member(&account.id, &id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(to_error)
}
