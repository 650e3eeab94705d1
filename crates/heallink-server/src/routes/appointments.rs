use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use heallink_core::appointment::{CreateAppointment, UpdateAppointment};
use serde_json::{json, Value};

use super::{error_body, to_error, ApiError, AppState};
use crate::auth::Account;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/appointments",
            get(list_appointments).post(create_appointment),
        )
        .route(
            "/api/appointments/{id}",
            get(get_appointment)
                .put(update_appointment)
                .delete(delete_appointment),
        )
}

async fn list_appointments(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
) -> Result<Json<Value>, ApiError> {
    state
        .db
        .list_appointments(&account.id)
        .await
        .map(|a| Json(json!(a)))
        .map_err(to_error)
}

async fn create_appointment(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Json(input): Json<CreateAppointment>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    input
        .validate()
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    state
        .db
        .create_appointment(&account.id, &input)
        .await
        .map(|a| (StatusCode::CREATED, Json(json!(a))))
        .map_err(to_error)
}

async fn get_appointment(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .db
        .get_appointment(&account.id, &id)
        .await
        .map(|a| Json(json!(a)))
        .map_err(to_error)
}

async fn update_appointment(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
    Json(input): Json<UpdateAppointment>,
) -> Result<Json<Value>, ApiError> {
    let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
    if blank(&input.member) || blank(&input.doctor) {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            "member and doctor cannot be empty",
        ));
    }
    state
        .db
        .update_appointment(&account.id, &id, &input)
        .await
        .map(|a| Json(json!(a)))
        .map_err(to_error)
}

async fn delete_appointment(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .db
        .delete_appointment(&account.id, &id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(to_error)
}
