//! HTTP Server implementation
//!
//! This module provides the HTTP server using Axum framework with:
//! - Configurable host/port binding
//! - Graceful shutdown handling
//! - Request timeouts
//! - Health check endpoint
//! - CORS support
//! - Periodic removal of expired sessions

use crate::api::middleware::trace_id_middleware;
use crate::api::routes::build_api_routes;
use crate::api::state::AppState;
use crate::auth::service::CredentialService;
use crate::core::config::ServerConfig;
use crate::core::Config;
use axum::{http::HeaderValue, middleware, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

/// HTTP API Server
pub struct ApiServer {
    router: Router,
    config: ServerConfig,
    service: Arc<CredentialService>,
    sweep_interval: Duration,
}

impl ApiServer {
    /// Create a new API server around a ready credential service
    pub fn new(config: &Config, service: Arc<CredentialService>) -> Self {
        let state = AppState::new(service.clone(), config.auth.cookie_secure);
        let router = Self::build_router(state, &config.server);

        Self {
            router,
            config: config.server.clone(),
            service,
            sweep_interval: Duration::from_secs(config.auth.session_sweep_interval),
        }
    }

    /// Build the Axum router with all routes and middleware
    pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .merge(build_api_routes(state.clone()))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn(trace_id_middleware))
                    .layer(TraceLayer::new_for_http())
                    .layer(Self::build_cors_layer(&config.allowed_origins))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout))),
            )
    }

    /// Build CORS layer from allowed origins configuration
    fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
        use tower_http::cors::Any;

        if allowed_origins.iter().any(|o| o == "*") {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = allowed_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();

            // Credentialed CORS rejects wildcard methods and headers
            CorsLayer::new()
                .allow_origin(origins)
                .allow_credentials(true)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                ])
        }
    }

    /// Start the HTTP server and listen for requests
    ///
    /// This method will block until the server is shut down gracefully.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr: SocketAddr = addr.parse()?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            request_timeout = self.config.request_timeout,
            "Starting HTTP server"
        );

        let listener = tokio::net::TcpListener::bind(socket_addr).await?;
        info!(addr = %socket_addr, "HTTP server listening");

        let sweeper = spawn_session_sweeper(self.service.clone(), self.sweep_interval);

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        sweeper.abort();
        served?;

        info!("HTTP server shut down gracefully");

        Ok(())
    }
}

/// Spawn the background task that deletes expired sessions
pub fn spawn_session_sweeper(service: Arc<CredentialService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.purge_expired_sessions().await {
                Ok(purged) => {
                    if purged > 0 {
                        info!(purged, "Session sweep finished");
                    }
                }
                Err(e) => error!(error = %e, "Session sweep failed"),
            }
        }
    })
}

/// Health check endpoint handler
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Initiating graceful shutdown...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::middleware::TRACE_ID_HEADER;
    use crate::auth::jwt::JwtSigner;
    use crate::auth::password::SecretHasher;
    use crate::core::error::ErrorResponse;
    use crate::db::memory::MemoryStore;
    use axum::body::Body;
    use axum::http::{header, Request, Response, StatusCode};
    use tower::util::ServiceExt;

    fn server_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout: 30,
            allowed_origins: vec!["*".to_string()],
        }
    }

    fn app_with(store: MemoryStore) -> Router {
        let service = Arc::new(CredentialService::new(
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::new(JwtSigner::new("test-secret").unwrap()),
            SecretHasher::new(4).unwrap(),
            Duration::from_secs(900),
            Duration::from_secs(86400),
        ));
        ApiServer::build_router(AppState::new(service, false), &server_config())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn ann() -> Value {
        json!({
            "first_name": "Ann",
            "last_name": "Lee",
            "email": "ann@example.com",
            "password": "secret1",
        })
    }

    fn set_cookies(response: &Response<Body>) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    /// `name=value` pair of cookie `name` from the Set-Cookie headers
    fn cookie_pair(response: &Response<Body>, name: &str) -> String {
        set_cookies(response)
            .into_iter()
            .find(|c| c.starts_with(&format!("{}=", name)))
            .and_then(|c| c.split(';').next().map(str::to_string))
            .unwrap()
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await;
        let value = response.0;

        assert_eq!(value["status"], "ok");
        assert!(value["version"].is_string());
        assert!(value["timestamp"].is_number());
    }

    #[tokio::test]
    async fn test_register_sets_http_only_cookies() {
        let store = MemoryStore::new();
        let app = app_with(store.clone());

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/user/register", ann()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(TRACE_ID_HEADER));

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        for cookie in &cookies {
            assert!(cookie.contains("HttpOnly"));
            assert!(cookie.contains("Path=/"));
        }
        assert!(cookies.iter().any(|c| c.starts_with("access_token=") && c.contains("Max-Age=900")));
        assert!(cookies.iter().any(|c| c.starts_with("refresh_token=") && c.contains("Max-Age=86400")));
        assert_eq!(store.session_count().await, 1);

        let body = json_body(response).await;
        assert!(body["message"].is_string());
        assert!(body.get("access_token").is_none());

        let duplicate = app
            .oneshot(post_json("/api/v1/user/register", ann()))
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
        let error = json_body(duplicate).await;
        assert_eq!(error["error"], "Conflict");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = app_with(MemoryStore::new());
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/user/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_failures_look_identical() {
        let app = app_with(MemoryStore::new());
        app.clone()
            .oneshot(post_json("/api/v1/user/register", ann()))
            .await
            .unwrap();

        let wrong = app
            .clone()
            .oneshot(post_json(
                "/api/v1/user/login",
                json!({"email": "ann@example.com", "password": "nope"}),
            ))
            .await
            .unwrap();
        let unknown = app
            .oneshot(post_json(
                "/api/v1/user/login",
                json!({"email": "bob@example.com", "password": "secret1"}),
            ))
            .await
            .unwrap();

        assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        let wrong: ErrorResponse = serde_json::from_value(json_body(wrong).await).unwrap();
        let unknown: ErrorResponse = serde_json::from_value(json_body(unknown).await).unwrap();
        assert_eq!(wrong.error, unknown.error);
        assert_eq!(wrong.message, unknown.message);
    }

    #[tokio::test]
    async fn test_refresh_rotates_cookie() {
        let app = app_with(MemoryStore::new());
        let registered = app
            .clone()
            .oneshot(post_json("/api/v1/user/register", ann()))
            .await
            .unwrap();
        let old = cookie_pair(&registered, "refresh_token");

        let refreshed = app
            .clone()
            .oneshot(post_with_cookie("/api/v1/user/refresh", &old))
            .await
            .unwrap();
        assert_eq!(refreshed.status(), StatusCode::OK);
        let new = cookie_pair(&refreshed, "refresh_token");
        assert_ne!(old, new);

        let replay = app
            .clone()
            .oneshot(post_with_cookie("/api/v1/user/refresh", &old))
            .await
            .unwrap();
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

        let missing = app
            .oneshot(post_with_cookie("/api/v1/user/refresh", "theme=dark"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_clears_cookies_and_is_idempotent() {
        let store = MemoryStore::new();
        let app = app_with(store.clone());
        let registered = app
            .clone()
            .oneshot(post_json("/api/v1/user/register", ann()))
            .await
            .unwrap();
        let refresh = cookie_pair(&registered, "refresh_token");

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(post_with_cookie("/api/v1/user/logout", &refresh))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let cookies = set_cookies(&response);
            assert_eq!(cookies.len(), 2);
            assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
        }
        assert_eq!(store.session_count().await, 0);

        let missing = app
            .clone()
            .oneshot(post_with_cookie("/api/v1/user/logout", ""))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        store.fail_writes(true);
        let failing = app
            .oneshot(post_with_cookie("/api/v1/user/logout", &refresh))
            .await
            .unwrap();
        assert_eq!(failing.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let error = json_body(failing).await;
        assert_eq!(error["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_me_requires_access_token() {
        let app = app_with(MemoryStore::new());
        let registered = app
            .clone()
            .oneshot(post_json("/api/v1/user/register", ann()))
            .await
            .unwrap();
        let access = cookie_pair(&registered, "access_token");
        let bearer = access.trim_start_matches("access_token=").to_string();

        let anonymous = app
            .clone()
            .oneshot(Request::get("/api/v1/user/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let via_cookie = app
            .clone()
            .oneshot(
                Request::get("/api/v1/user/me")
                    .header(header::COOKIE, &access)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(via_cookie.status(), StatusCode::OK);

        let via_bearer = app
            .clone()
            .oneshot(
                Request::get("/api/v1/user/me")
                    .header(header::AUTHORIZATION, format!("Bearer {}", bearer))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(via_bearer.status(), StatusCode::OK);
        let me = json_body(via_bearer).await;
        assert_eq!(me["email"], "ann@example.com");
        assert_eq!(me["role"], "participant");
        assert!(me.get("pass_hash").is_none());

        let patch = |body: serde_json::Value| {
            Request::patch("/api/v1/user/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", bearer))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };
        let patched = app.clone().oneshot(patch(json!({"bio": "hi"}))).await.unwrap();
        assert_eq!(patched.status(), StatusCode::OK);
        assert_eq!(json_body(patched).await["bio"], "hi");

        let cleared = app.oneshot(patch(json!({"bio": null}))).await.unwrap();
        assert_eq!(cleared.status(), StatusCode::OK);
        assert!(json_body(cleared).await["bio"].is_null());
    }

    #[tokio::test]
    async fn test_change_password_revokes_refresh_tokens() {
        let app = app_with(MemoryStore::new());
        let registered = app
            .clone()
            .oneshot(post_json("/api/v1/user/register", ann()))
            .await
            .unwrap();
        let access = cookie_pair(&registered, "access_token");
        let refresh = cookie_pair(&registered, "refresh_token");

        let changed = app
            .clone()
            .oneshot(
                Request::post("/api/v1/user/password")
                    .header(header::COOKIE, &access)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({"current_password": "secret1", "new_password": "secret2"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(changed.status(), StatusCode::OK);
        assert!(set_cookies(&changed).iter().all(|c| c.contains("Max-Age=0")));

        let refreshed = app
            .oneshot(post_with_cookie("/api/v1/user/refresh", &refresh))
            .await
            .unwrap();
        assert_eq!(refreshed.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_all() {
        let store = MemoryStore::new();
        let app = app_with(store.clone());
        let registered = app
            .clone()
            .oneshot(post_json("/api/v1/user/register", ann()))
            .await
            .unwrap();
        app.clone()
            .oneshot(post_json(
                "/api/v1/user/login",
                json!({"email": "ann@example.com", "password": "secret1"}),
            ))
            .await
            .unwrap();
        assert_eq!(store.session_count().await, 2);

        let refresh = cookie_pair(&registered, "refresh_token");
        let response = app
            .oneshot(post_with_cookie("/api/v1/user/logout/all", &refresh))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_sessions() {
        use crate::db::models::NewSession;
        use crate::db::repository::SessionStore;

        let store = MemoryStore::new();
        store
            .save(&NewSession {
                id: "s1".to_string(),
                user_id: "u1".to_string(),
                token: "expired".to_string(),
                expires_at: chrono::Utc::now() - chrono::Duration::seconds(1),
            })
            .await
            .unwrap();

        let service = Arc::new(CredentialService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(JwtSigner::new("test-secret").unwrap()),
            SecretHasher::new(4).unwrap(),
            Duration::from_secs(900),
            Duration::from_secs(86400),
        ));

        let sweeper = spawn_session_sweeper(service, Duration::from_millis(10));
        for _ in 0..50 {
            if store.session_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.abort();
        assert_eq!(store.session_count().await, 0);
    }
}
