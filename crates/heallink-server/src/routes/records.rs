use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use heallink_core::attachment::{in_folder, NewAttachment};
use heallink_core::record::{CreateRecord, RemoveFiles, ReplaceFiles, UpdateRecord};
use serde_json::{json, Value};

use super::{error_body, to_error, ApiError, AppState};
use crate::auth::Account;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/records", get(list_records).post(create_record))
        .route(
            "/api/records/{id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/api/records/{id}/files", put(replace_files))
        .route("/api/records/{id}/files/delete", post(remove_files))
}

fn check_files(folder: &str, files: &[NewAttachment]) -> Result<(), ApiError> {
    if files.iter().any(|f| f.remote_id.trim().is_empty()) {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            "every file needs a remote_id",
        ));
    }
    if let Some(file) = files.iter().find(|f| !in_folder(folder, &f.remote_id)) {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            format!("remote_id {} is outside {folder}", file.remote_id),
        ));
    }
    Ok(())
}

async fn list_records(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
) -> Result<Json<Value>, ApiError> {
    state
        .db
        .list_records(&account.id)
        .await
        .map(|r| Json(json!(r)))
        .map_err(to_error)
}

async fn create_record(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Json(input): Json<CreateRecord>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    input
        .validate()
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    check_files(&state.folder, &input.files)?;
    state
        .db
        .create_record(&account.id, &input)
        .await
        .map(|r| (StatusCode::CREATED, Json(json!(r))))
        .map_err(to_error)
}

async fn get_record(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .db
        .get_record(&account.id, &id)
        .await
        .map(|r| Json(json!(r)))
        .map_err(to_error)
}

async fn update_record(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
    Json(input): Json<UpdateRecord>,
) -> Result<Json<Value>, ApiError> {
    let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
    if blank(&input.title) || blank(&input.member) {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            "title and member cannot be empty",
        ));
    }
    state
        .db
        .update_record(&account.id, &id, &input)
        .await
        .map(|r| Json(json!(r)))
        .map_err(to_error)
}

/// Deletes the record, then its remote objects. Answers with the remote
/// deletion counts.
async fn delete_record(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .lifecycle
        .delete_record(&account.id, &id)
        .await
        .map(|report| Json(json!(report)))
        .map_err(to_error)
}

async fn replace_files(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
    Json(input): Json<ReplaceFiles>,
) -> Result<Json<Value>, ApiError> {
    check_files(&state.folder, &input.files)?;
    state
        .lifecycle
        .replace(&account.id, &id, &input.files, input.expected_version)
        .await
        .map(|r| Json(json!(r)))
        .map_err(to_error)
}

async fn remove_files(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<String>,
    Json(input): Json<RemoveFiles>,
) -> Result<Json<Value>, ApiError> {
    state
        .lifecycle
        .remove(&account.id, &id, &input.remote_ids)
        .await
        .map(|report| Json(json!(report)))
        .map_err(to_error)
}
