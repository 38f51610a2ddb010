//! HTTP API gateway for Kateno.
//!
//! Exposes the streaming chat endpoint, provider listing, stored
//! conversations, and a health check.
//!
//! Built on Axum for high performance async HTTP.

pub mod chat;
pub mod store;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use kateno_config::{AppConfig, GatewayConfig};
use kateno_core::error::ChatError;
use kateno_core::store::ConversationStore;
use kateno_pipeline::ChatPipeline;
use kateno_security::{
    RateLimit, RateLimiter, generate_csrf_token, validate_csrf_token,
};

pub use store::InMemoryConversationStore;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub pipeline: ChatPipeline,
    pub store: Arc<dyn ConversationStore>,
    pub rate_limiter: Arc<dyn RateLimit>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(
        pipeline: ChatPipeline,
        store: Arc<dyn ConversationStore>,
        rate_limiter: Arc<dyn RateLimit>,
    ) -> Self {
        Self {
            pipeline,
            store,
            rate_limiter,
        }
    }

    /// Build every subsystem from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            ChatPipeline::from_config(config),
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(RateLimiter::from_config(&config.rate_limit)),
        )
    }
}

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - Per-client rate limiting on `/api/chat` (health and reads are exempt)
/// - CSRF check on `/api/chat` when `require_csrf` is set
/// - CORS restricted to the configured origin
/// - Request body size limit
/// - HTTP trace logging
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let mut chat = Router::new().route("/api/chat", post(chat::chat_handler));
    if config.require_csrf {
        chat = chat.route_layer(middleware::from_fn(csrf_middleware));
    }
    let chat = chat.route_layer(middleware::from_fn_with_state(
        state.clone(),
        rate_limit_middleware,
    ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/csrf", get(csrf_handler))
        .route("/api/providers", get(chat::providers_handler))
        .route("/api/conversations/{id}", get(chat::conversation_handler))
        .merge(chat)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors_layer(&config.cors_origin))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(CSRF_HEADER),
        ])
        .allow_credentials(true)
        .expose_headers([
            header::HeaderName::from_static(chat::CONVERSATION_ID_HEADER),
            header::HeaderName::from_static(chat::PROVIDER_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600));

    match origin.parse::<HeaderValue>() {
        Ok(origin) => base.allow_origin(tower_http::cors::AllowOrigin::exact(origin)),
        Err(e) => {
            warn!(origin = %origin, error = %e, "Invalid CORS origin, cross-origin requests disabled");
            base
        }
    }
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = Arc::new(GatewayState::from_config(&config));
    let active = state.pipeline.registry().active();
    info!(
        provider = %active.name(),
        model = %active.model(),
        "Active provider"
    );

    let app = build_router(state, &config.gateway);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// --- Errors ---

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A JSON `{ "error": … }` response.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// A pipeline failure rendered for HTTP clients.
pub struct ApiError(pub ChatError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            ChatError::Validation(message) => error_response(StatusCode::BAD_REQUEST, message),
            ChatError::UnsupportedProvider(name) => error_response(
                StatusCode::BAD_REQUEST,
                format!("Unsupported provider: {name}"),
            ),
            ChatError::RateLimited { retry_after_secs } => {
                let mut response = error_response(
                    StatusCode::TOO_MANY_REQUESTS,
                    "Rate limit exceeded. Please wait before sending more messages.",
                );
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            ChatError::Upstream(e) => {
                warn!(error = %e, "All providers failed");
                error_response(StatusCode::BAD_GATEWAY, "Upstream model error")
            }
            ChatError::Cancelled => error_response(
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
                "Request cancelled",
            ),
        }
    }
}

// --- Rate Limiting ---

/// Identify the client: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// else "anonymous".
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Returns 429 with `Retry-After` when the client is over its limit.
async fn rate_limit_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let key = client_key(req.headers());
    let decision = state.rate_limiter.check(&key);

    if !decision.allowed {
        return ApiError(ChatError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        })
        .into_response();
    }

    let mut response = next.run(req).await;
    response.headers_mut().insert(
        "x-ratelimit-remaining",
        HeaderValue::from(decision.remaining),
    );
    response
}

// --- CSRF ---

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_COOKIE: &str = "kateno_csrf";

/// Value of cookie `name` across every `Cookie` header.
fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Rejects with 403 unless the `X-CSRF-Token` header matches the CSRF cookie.
async fn csrf_middleware(req: axum::extract::Request, next: Next) -> Response {
    let headers = req.headers();
    let token = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let stored = cookie_value(headers, CSRF_COOKIE).unwrap_or_default();

    if !validate_csrf_token(token, stored) {
        warn!("Rejected chat request with missing or mismatched CSRF token");
        return error_response(StatusCode::FORBIDDEN, "Invalid CSRF token");
    }
    next.run(req).await
}

#[derive(Serialize)]
struct CsrfResponse {
    token: String,
}

/// GET /api/csrf: issue a token in both the body and a cookie.
async fn csrf_handler() -> Response {
    let token = generate_csrf_token();
    let cookie = format!("{CSRF_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict");
    let mut response = Json(CsrfResponse { token }).into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use kateno_core::error::ProviderError;
    use kateno_core::message::ConversationId;
    use kateno_core::provider::{Provider, ProviderRequest};
    use kateno_core::session::StreamSession;
    use kateno_providers::{ProviderRegistry, SimulatorProvider};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    // ── Mock providers ──────────────────────────────────────────

    /// Refuses every request before producing anything.
    struct DownProvider;

    #[async_trait]
    impl Provider for DownProvider {
        fn name(&self) -> &str {
            "groq"
        }
        fn model(&self) -> &str {
            "down"
        }
        async fn stream(
            &self,
            _request: ProviderRequest,
            _cancel: CancellationToken,
        ) -> Result<StreamSession, ProviderError> {
            Err(ProviderError::Network("connection refused".into()))
        }
    }

    /// Sends one fragment, then breaks.
    struct FlakyProvider;

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }
        fn model(&self) -> &str {
            "flaky"
        }
        async fn stream(
            &self,
            _request: ProviderRequest,
            cancel: CancellationToken,
        ) -> Result<StreamSession, ProviderError> {
            let (tx, session) = StreamSession::channel("flaky", cancel);
            tokio::spawn(async move {
                let _ = tx.send(Ok("partial".into())).await;
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted("reset".into())))
                    .await;
            });
            Ok(session)
        }
    }

    // ── Helpers ─────────────────────────────────────────────────

    struct TestApp {
        router: Router,
        store: Arc<InMemoryConversationStore>,
    }

    fn test_app(live: Option<Arc<dyn Provider>>, max_requests: usize) -> TestApp {
        test_app_with(live, max_requests, &GatewayConfig::default())
    }

    fn test_app_with(
        live: Option<Arc<dyn Provider>>,
        max_requests: usize,
        config: &GatewayConfig,
    ) -> TestApp {
        let mut registry =
            ProviderRegistry::new(Arc::new(SimulatorProvider::instant()), Duration::from_secs(5));
        if let Some(provider) = live {
            registry.register(provider, true);
        }
        let store = Arc::new(InMemoryConversationStore::new());
        let state = Arc::new(GatewayState::new(
            ChatPipeline::new(Arc::new(registry)),
            store.clone(),
            Arc::new(RateLimiter::new(max_requests, Duration::from_secs(60))),
        ));
        TestApp {
            router: build_router(state, config),
            store,
        }
    }

    fn chat_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    const RECURSION: &str = r#"{"messages":[{"role":"user","content":"Explain recursion"}]}"#;

    // ── Tests ───────────────────────────────────────────────────

    #[tokio::test]
    async fn health_endpoint() {
        let app = test_app(None, 10);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn explain_recursion_with_provider_down_streams_simulated_reply() {
        let app = test_app(Some(Arc::new(DownProvider)), 10);

        let response = app.router.oneshot(chat_request(RECURSION)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[chat::PROVIDER_HEADER], "simulator");
        assert!(response.headers().contains_key(chat::CONVERSATION_ID_HEADER));

        let text = body_text(response).await;
        assert!(text.contains("fn factorial"), "unexpected reply: {text}");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let app = test_app(None, 10);
        let response = app
            .router
            .oneshot(chat_request("{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Invalid request format");
    }

    #[tokio::test]
    async fn empty_messages_is_bad_request() {
        let app = test_app(None, 10);
        let response = app
            .router
            .oneshot(chat_request(r#"{"messages":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("At least one message"));
    }

    #[tokio::test]
    async fn unsupported_provider_is_bad_request() {
        let app = test_app(None, 10);
        let response = app
            .router
            .oneshot(chat_request(
                r#"{"messages":[{"role":"user","content":"hi"}],"provider":"claude-direct"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            "Unsupported provider: claude-direct"
        );
    }

    #[tokio::test]
    async fn rate_limit_returns_429_and_spares_health() {
        let app = test_app(None, 1);

        let first = app
            .router
            .clone()
            .oneshot(chat_request(RECURSION))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-ratelimit-remaining"], "0");

        let second = app
            .router
            .clone()
            .oneshot(chat_request(RECURSION))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[header::RETRY_AFTER], "60");

        let health = app
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn post_byte_failure_aborts_body() {
        let app = test_app(Some(Arc::new(FlakyProvider)), 10);
        let response = app.router.oneshot(chat_request(RECURSION)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[chat::PROVIDER_HEADER], "flaky");
        assert!(response.into_body().collect().await.is_err());
    }

    #[tokio::test]
    async fn providers_endpoint_lists_simulator_last() {
        let app = test_app(Some(Arc::new(DownProvider)), 10);
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/providers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["active"], "groq");
        let providers = json["providers"].as_array().unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[1]["name"], "simulator");
        assert_eq!(providers[1]["available"], true);
    }

    #[tokio::test]
    async fn completed_exchange_is_persisted() {
        let app = test_app(None, 10);
        let body = r#"{"messages":[{"role":"user","content":"hello"}],"conversationId":"conv-42"}"#;

        let response = app
            .router
            .clone()
            .oneshot(chat_request(body))
            .await
            .unwrap();
        assert_eq!(response.headers()[chat::CONVERSATION_ID_HEADER], "conv-42");
        let reply = body_text(response).await;

        let id = ConversationId::from("conv-42");
        let mut stored = Vec::new();
        for _ in 0..100 {
            stored = app.store.messages(&id).await.unwrap();
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].content, "hello");
        assert_eq!(stored[1].content, reply);

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/conversations/conv-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["conversationId"], "conv-42");
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_conversation_is_404() {
        let app = test_app(None, 10);
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/conversations/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn client_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), "anonymous");
        headers.insert("x-real-ip", HeaderValue::from_static("10.1.1.1"));
        assert_eq!(client_key(&headers), "10.1.1.1");
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_key(&headers), "203.0.113.7");
    }

    fn csrf_app() -> TestApp {
        let config = GatewayConfig {
            require_csrf: true,
            ..GatewayConfig::default()
        };
        test_app_with(None, 10, &config)
    }

    fn csrf_chat_request(header: Option<&str>, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "10.0.0.1");
        if let Some(token) = header {
            builder = builder.header(CSRF_HEADER, token);
        }
        if let Some(token) = cookie {
            builder = builder.header("cookie", format!("theme=dark; {CSRF_COOKIE}={token}"));
        }
        builder.body(Body::from(RECURSION)).unwrap()
    }

    #[tokio::test]
    async fn csrf_endpoint_issues_token_and_cookie() {
        let app = test_app(None, 10);
        let response = app
            .router
            .oneshot(Request::builder().uri("/api/csrf").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let json = body_json(response).await;
        let token = json["token"].as_str().unwrap();
        assert_eq!(token.len(), 64);
        assert!(cookie.starts_with(&format!("{CSRF_COOKIE}={token};")));
        assert!(cookie.contains("SameSite=Strict"));
    }

    #[tokio::test]
    async fn chat_without_csrf_token_is_forbidden() {
        let app = csrf_app();
        let response = app.router.oneshot(csrf_chat_request(None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid CSRF token");
    }

    #[tokio::test]
    async fn chat_with_mismatched_csrf_token_is_forbidden() {
        let app = csrf_app();
        let issued = generate_csrf_token();
        let other = generate_csrf_token();
        let response = app
            .router
            .oneshot(csrf_chat_request(Some(&other), Some(&issued)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let app = csrf_app();
        let response = app
            .router
            .oneshot(csrf_chat_request(Some(&issued), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn chat_with_matching_csrf_token_streams() {
        let app = csrf_app();
        let token = generate_csrf_token();
        let response = app
            .router
            .oneshot(csrf_chat_request(Some(&token), Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("fn factorial"));
    }

    #[tokio::test]
    async fn csrf_check_is_off_by_default() {
        let app = test_app(None, 10);
        let response = app.router.oneshot(csrf_chat_request(None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn cookie_value_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(cookie_value(&headers, CSRF_COOKIE), None);
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=1; kateno_csrf=abc; b=2"),
        );
        assert_eq!(cookie_value(&headers, CSRF_COOKIE), Some("abc"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
