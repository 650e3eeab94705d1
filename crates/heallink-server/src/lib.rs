pub mod attachments;
pub mod auth;
mod routes;
pub mod sweep;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

use std::sync::Arc;

use anyhow::Result;
use axum::http::{header, HeaderValue, Method};
use heallink_core::LifecycleConfig;
use heallink_db::Database;
use heallink_store::AssetHost;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use attachments::AttachmentLifecycle;
use auth::AuthConfig;
use sweep::OrphanSweeper;

pub use routes::{build_router, AppState, InnerAppState};

/// Wire the database and asset host into the shared handler state.
pub fn build_state(
    db: Arc<dyn Database>,
    host: Arc<dyn AssetHost>,
    config: &LifecycleConfig,
    auth: Option<Arc<AuthConfig>>,
) -> AppState {
    let sweeper = Arc::new(OrphanSweeper::new(
        db.clone(),
        host.clone(),
        &config.folder,
        config.grace_period(),
    ));
    Arc::new(InnerAppState {
        lifecycle: AttachmentLifecycle::new(db.clone(), host, &config.folder),
        folder: config.folder.clone(),
        sweeper,
        db,
        auth,
    })
}

pub async fn serve(
    listener: TcpListener,
    state: AppState,
    frontend_url: Option<&str>,
) -> Result<()> {
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(frontend_url)?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

/// Only the configured frontend may call the API from a browser; without
/// one any origin is allowed.
fn cors_layer(frontend_url: Option<&str>) -> Result<CorsLayer> {
    let origin = match frontend_url {
        Some(url) => AllowOrigin::exact(HeaderValue::from_str(url.trim_end_matches('/'))?),
        None => AllowOrigin::any(),
    };
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_accepts_frontend_url() {
        assert!(cors_layer(Some("https://heallink.example/")).is_ok());
        assert!(cors_layer(None).is_ok());
    }

    #[test]
    fn cors_rejects_unprintable_origin() {
        assert!(cors_layer(Some("https://bad\nhost")).is_err());
    }
}
