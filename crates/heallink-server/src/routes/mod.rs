pub mod admin;
pub mod appointments;
pub mod family;
pub mod health;
pub mod records;

use std::sync::Arc;

use axum::{http::StatusCode, middleware, Json, Router};
use heallink_db::{Database, DbError};
use serde_json::{json, Value};

use crate::attachments::AttachmentLifecycle;
use crate::auth::{auth_middleware, AuthConfig};
use crate::sweep::OrphanSweeper;

pub struct InnerAppState {
    pub db: Arc<dyn Database>,
    pub lifecycle: AttachmentLifecycle,
    /// Asset folder every attachment's remote id must live under.
    pub folder: String,
    pub sweeper: Arc<OrphanSweeper>,
    pub auth: Option<Arc<AuthConfig>>,
}

pub type AppState = Arc<InnerAppState>;

pub fn build_router(state: AppState) -> Router {
    let public = Router::new().merge(health::routes());

    let protected = Router::new()
        .merge(family::routes())
        .merge(records::routes())
        .merge(appointments::routes())
        .merge(admin::routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public.merge(protected).with_state(state)
}

pub(crate) type ApiError = (StatusCode, Json<Value>);

pub(crate) fn error_body(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": msg.into() })))
}

fn to_error(e: DbError) -> ApiError {
    let status = match &e {
        DbError::NotFound(_) => StatusCode::NOT_FOUND,
        DbError::Conflict(_) => StatusCode::CONFLICT,
        DbError::Invalid(_) => StatusCode::BAD_REQUEST,
        DbError::Internal(_) | DbError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, e.to_string())
}
