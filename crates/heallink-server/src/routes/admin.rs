use axum::{extract::State, http::StatusCode, routing::post, Extension, Json, Router};
use heallink_core::sweep::SweepReport;
use tracing::{info, warn};

use super::{error_body, ApiError, AppState};
use crate::auth::Account;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/admin/sweep", post(run_sweep))
}

/// Run one orphan sweep pass now. The sweep spans every account, so only
/// the operator may start it. A pass that cannot run or fails still
/// answers 200 with `success: false`.
async fn run_sweep(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
) -> Result<Json<SweepReport>, ApiError> {
    if !account.admin {
        warn!(account = %account.id, "sweep refused for non-operator key");
        return Err(error_body(
            StatusCode::FORBIDDEN,
            "the sweep requires the operator key",
        ));
    }
    info!(account = %account.id, "sweep requested");
    Ok(Json(state.sweeper.run().await))
}
