use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use heallink_core::LifecycleConfig;
use heallink_db::Database;
use heallink_store::{HostConfig, LocalHost};
use tempfile::TempDir;
use tokio::net::TcpListener;

use crate::auth::AuthConfig;
use crate::AppState;

/// A router over in-memory SQLite and a temp-dir asset host, with handles
/// for seeding and inspecting state.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: Arc<dyn Database>,
    /// Base directory of the local asset host.
    pub asset_dir: PathBuf,
    pub config: LifecycleConfig,
    /// Removes `asset_dir` when the app is dropped.
    _asset_root: TempDir,
}

pub fn test_host_config(asset_dir: &std::path::Path) -> HostConfig {
    HostConfig {
        local_data_dir: Some(asset_dir.to_string_lossy().to_string()),
        ..Default::default()
    }
}

fn build_test_app(auth: impl FnOnce(Arc<dyn Database>) -> Option<Arc<AuthConfig>>) -> TestApp {
    let db: Arc<dyn Database> =
        Arc::new(heallink_db::SqliteDatabase::open_in_memory().unwrap());
    let asset_root = tempfile::tempdir().unwrap();
    let asset_dir = asset_root.path().to_path_buf();
    let config = LifecycleConfig::default();
    let host = Arc::new(LocalHost::new(&test_host_config(&asset_dir), &config.folder));
    let state = crate::build_state(db.clone(), host, &config, auth(db.clone()));
    TestApp {
        router: crate::build_router(state.clone()),
        state,
        db,
        asset_dir,
        config,
        _asset_root: asset_root,
    }
}

/// Build a test router with no auth; requests run as the local account.
pub async fn test_router() -> TestApp {
    build_test_app(|_| None)
}

/// Build a test router with auth enabled, returning (app, api_key).
pub async fn test_router_with_auth() -> (TestApp, String) {
    let api_key = crate::auth::generate_api_key();
    let env_key_hash = Some(crate::auth::sha256_hex(&api_key));
    let app = build_test_app(|db| Some(Arc::new(AuthConfig { env_key_hash, db })));
    (app, api_key)
}

/// A running test server with base_url and background task handle.
pub struct TestServer {
    pub base_url: String,
    pub db: Arc<dyn Database>,
    pub asset_dir: PathBuf,
    pub config: LifecycleConfig,
    _asset_root: TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

/// Spawn an axum test server on a random port. Returns the TestServer
/// with the `base_url` (e.g. "http://127.0.0.1:12345").
pub async fn spawn_test_server() -> TestServer {
    serve_test_app(test_router().await).await
}

/// Like [`spawn_test_server`], with auth enabled. Returns the server and
/// a key for the local account.
pub async fn spawn_test_server_with_auth() -> (TestServer, String) {
    let (app, api_key) = test_router_with_auth().await;
    (serve_test_app(app).await, api_key)
}

async fn serve_test_app(app: TestApp) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{addr}");
    let router = app.router;
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    TestServer {
        base_url,
        db: app.db,
        asset_dir: app.asset_dir,
        config: app.config,
        _asset_root: app._asset_root,
        _handle: handle,
    }
}
