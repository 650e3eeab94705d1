use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sha2::{Digest, Sha256};

use heallink_db::Database;

use crate::routes::AppState;

/// Account every request runs as when the server has no keys, and the
/// owner of the `HEALLINK_API_KEY` key.
pub const LOCAL_ACCOUNT: &str = "local";

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    /// Operator access: open mode or the `HEALLINK_API_KEY` key. Keys from
    /// the database never carry it.
    pub admin: bool,
}

impl Account {
    pub fn local() -> Self {
        Self {
            id: LOCAL_ACCOUNT.to_string(),
            admin: true,
        }
    }
}

/// Authentication configuration.
pub struct AuthConfig {
    /// SHA-256 hash of the `HEALLINK_API_KEY` env var (if set).
    pub env_key_hash: Option<String>,
    /// Database handle for DB-backed API keys.
    pub db: Arc<dyn Database>,
}

/// SHA-256 hash a raw key, returning the hex-encoded digest.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generate a new API key: `hl_` + 43 chars of base62-encoded random bytes.
pub fn generate_api_key() -> String {
    use rand::Rng;
    const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let random_part: String = (0..43)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect();
    format!("hl_{random_part}")
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "missing or invalid API key" })),
    )
        .into_response()
}

/// Axum middleware that resolves the caller's account.
///
/// With no `auth` in the AppState every request runs as the local account.
/// Otherwise a valid `Authorization: Bearer <token>` header is required.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth = match &state.auth {
        Some(auth) => auth,
        None => {
            request.extensions_mut().insert(Account::local());
            return next.run(request).await;
        }
    };

    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = token else {
        return unauthorized();
    };
    let token_hash = sha256_hex(token);

    if let Some(ref env_hash) = auth.env_key_hash {
        if constant_time_eq(&token_hash, env_hash) {
            request.extensions_mut().insert(Account::local());
            return next.run(request).await;
        }
    }

    match auth.db.find_api_key_by_hash(&token_hash).await {
        Ok(Some(api_key)) => {
            // Fire-and-forget: update last_used_at
            let db = auth.db.clone();
            let key_id = api_key.id.clone();
            tokio::spawn(async move {
                let _ = db.touch_api_key(&key_id).await;
            });
            request.extensions_mut().insert(Account {
                id: api_key.account_id,
                admin: false,
            });
            next.run(request).await
        }
        Ok(None) => unauthorized(),
        Err(e) => {
            tracing::error!("api key lookup failed: {e}");
            unauthorized()
        }
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Build an `Option<AuthConfig>` from env + DB state.
///
/// Returns `None` (open access) when neither `HEALLINK_API_KEY` is set
/// nor any DB-backed keys exist.
pub async fn build_auth_config(db: Arc<dyn Database>) -> Option<Arc<AuthConfig>> {
    let env_key = std::env::var("HEALLINK_API_KEY").ok();
    build_auth_config_with_key(db, env_key.as_deref()).await
}

/// Build auth config from an explicit key value (testable without env mutation).
pub async fn build_auth_config_with_key(
    db: Arc<dyn Database>,
    env_key: Option<&str>,
) -> Option<Arc<AuthConfig>> {
    let env_key_hash = env_key.filter(|k| !k.is_empty()).map(sha256_hex);
    let has_db_keys = db.has_api_keys().await.unwrap_or(false);

    if env_key_hash.is_none() && !has_db_keys {
        return None;
    }
    Some(Arc::new(AuthConfig { env_key_hash, db }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::test_helpers::{test_router, test_router_with_auth, TestApp};

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_generate_api_key_format() {
        let key = generate_api_key();
        assert!(key.starts_with("hl_"), "key should start with 'hl_': {key}");
        assert_eq!(key.len(), 46, "key should be 46 chars: {key}");
        assert!(
            key[3..].chars().all(|c| c.is_ascii_alphanumeric()),
            "key suffix should be base62: {key}"
        );
    }

    #[test]
    fn test_generate_api_key_uniqueness() {
        assert_ne!(generate_api_key(), generate_api_key());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("hello", "hello"));
        assert!(!constant_time_eq("hello", "world"));
        assert!(!constant_time_eq("short", "longer-string"));
        assert!(constant_time_eq("", ""));
    }

    #[tokio::test]
    async fn build_auth_config_no_keys() {
        let db = Arc::new(heallink_db::SqliteDatabase::open_in_memory().unwrap());
        assert!(build_auth_config_with_key(db, None).await.is_none());
    }

    #[tokio::test]
    async fn build_auth_config_env_key() {
        let db = Arc::new(heallink_db::SqliteDatabase::open_in_memory().unwrap());
        let auth = build_auth_config_with_key(db, Some("test-key-for-auth"))
            .await
            .unwrap();
        assert!(auth.env_key_hash.is_some());
    }

    #[tokio::test]
    async fn build_auth_config_db_keys_only() {
        let db = Arc::new(heallink_db::SqliteDatabase::open_in_memory().unwrap());
        db.insert_api_key("acct-1", "laptop", &sha256_hex("hl_x"))
            .await
            .unwrap();
        let auth = build_auth_config_with_key(db, Some("")).await.unwrap();
        assert!(auth.env_key_hash.is_none());
    }

    fn get(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn auth_middleware_no_config_passes_all() {
        let TestApp { router, .. } = test_router().await;
        let resp = router.oneshot(get("/api/records", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn auth_middleware_valid_bearer() {
        let (app, api_key) = test_router_with_auth().await;
        let resp = app
            .router
            .oneshot(get("/api/records", Some(&api_key)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn auth_middleware_db_key_resolves_its_account() {
        let (app, _env_key) = test_router_with_auth().await;
        let raw = generate_api_key();
        app.db
            .insert_api_key("acct-db", "phone", &sha256_hex(&raw))
            .await
            .unwrap();

        let resp = app
            .router
            .oneshot(get("/api/records", Some(&raw)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sweep_is_reserved_for_the_operator() {
        let (app, env_key) = test_router_with_auth().await;
        let raw = generate_api_key();
        app.db
            .insert_api_key(LOCAL_ACCOUNT, "phone", &sha256_hex(&raw))
            .await
            .unwrap();
        let sweep = |key: &str| {
            Request::builder()
                .method("POST")
                .uri("/api/admin/sweep")
                .header("Authorization", format!("Bearer {key}"))
                .body(Body::empty())
                .unwrap()
        };

        let resp = app.router.clone().oneshot(sweep(&raw)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app.router.oneshot(sweep(&env_key)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn auth_middleware_invalid_bearer() {
        let (app, _api_key) = test_router_with_auth().await;
        let resp = app
            .router
            .oneshot(get("/api/records", Some("wrong-key")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_middleware_missing_header() {
        let (app, _api_key) = test_router_with_auth().await;
        let resp = app.router.oneshot(get("/api/records", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_health_endpoint_no_auth_required() {
        let (app, _api_key) = test_router_with_auth().await;
        let resp = app.router.oneshot(get("/api/health", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
