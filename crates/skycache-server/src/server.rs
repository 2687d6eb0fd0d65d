//! HTTP server for weather lookups
//!
//! # Routes
//!
//! - `GET /weather?location=<L>` - Weather for a location, served from cache when fresh
//! - `GET /health` - Liveness probe
//!
//! `/weather` sits behind a per-client-IP rate limiter. Over-limit requests get
//! `429 Too Many Requests` with a `Retry-After` header.

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota};
use serde::{Deserialize, Serialize};
use skycache_core::ServerConfig;
use skycache_weather::{LocationQuery, WeatherError, WeatherPayload, WeatherResolver};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind error: {0}")]
    Bind(String),
}

/// Per-IP token bucket.
pub struct RateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    clock: DefaultClock,
    per_second: u32,
}

impl RateLimiter {
    /// `None` when `per_second` is 0 (limiting disabled).
    pub fn per_second(per_second: u32) -> Option<Self> {
        let rate = NonZeroU32::new(per_second)?;
        Some(Self {
            limiter: governor::RateLimiter::keyed(Quota::per_second(rate)),
            clock: DefaultClock::default(),
            per_second,
        })
    }

    /// `Err` carries how long the client should wait.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        self.limiter
            .check_key(&ip)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Forget clients whose bucket has fully refilled.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of tracked client IPs.
    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }
}

/// How often idle rate-limit buckets are dropped.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

fn spawn_pruner(state: Arc<AppState>) -> Option<tokio::task::JoinHandle<()>> {
    state.rate_limiter.as_ref()?;
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Some(limiter) = state.rate_limiter.as_ref() {
                limiter.prune();
                tracing::debug!(clients = limiter.len(), "Pruned rate limiter");
            }
        }
    }))
}

/// Shared server state
struct AppState {
    resolver: WeatherResolver,
    rate_limiter: Option<RateLimiter>,
}

pub struct WeatherServer {
    state: Arc<AppState>,
}

impl WeatherServer {
    /// `rate_limit_per_sec == 0` disables rate limiting.
    pub fn new(resolver: WeatherResolver, rate_limit_per_sec: u32) -> Self {
        Self {
            state: Arc::new(AppState {
                resolver,
                rate_limiter: RateLimiter::per_second(rate_limit_per_sec),
            }),
        }
    }

    pub fn from_config(resolver: WeatherResolver, config: &ServerConfig) -> Self {
        Self::new(resolver, config.rate_limit_per_sec)
    }

    fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/weather", get(get_weather))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ))
            .route("/health", get(health))
            .with_state(state)
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn run<F>(self, addr: &str, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            rate_limit_per_sec = self.state.rate_limiter.as_ref().map_or(0, |l| l.per_second),
            cache_ttl_secs = self.state.resolver.ttl().as_secs(),
            "Weather server listening"
        );

        let pruner = spawn_pruner(self.state.clone());

        let app = Self::router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(pruner) = pruner {
            pruner.abort();
        }
        served.map_err(ServerError::Io)?;

        tracing::info!("Weather server stopped");
        Ok(())
    }
}

async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return next.run(request).await;
    };

    // No ConnectInfo when the router is driven directly (tests).
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    match limiter.check(ip) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            let retry_secs = retry_after_secs(wait);
            tracing::warn!(ip = %ip, retry_after_secs = retry_secs, "Rate limit exceeded");

            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_secs.to_string())],
                Json(ErrorResponse {
                    error: format!("Rate limit exceeded. Retry after {} seconds.", retry_secs),
                }),
            )
                .into_response()
        }
    }
}

/// Whole seconds, rounded up, never 0.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(err: &WeatherError) -> (StatusCode, Json<ErrorResponse>) {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_weather(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<WeatherPayload>, (StatusCode, Json<ErrorResponse>)> {
    let location = LocationQuery::parse(query.location.unwrap_or_default())
        .map_err(|e| error_response(&e))?;

    state.resolver.resolve(&location).await.map(Json).map_err(|e| {
        tracing::error!(location = %location, "Weather request failed: {}", e);
        error_response(&e)
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use skycache_weather::{CacheError, CacheKey, CacheStore, FetchError, MemoryCache, WeatherSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const TTL: Duration = Duration::from_secs(43_200);

    struct FakeSource {
        calls: AtomicUsize,
        fail_with_status: Option<u16>,
    }

    #[async_trait]
    impl WeatherSource for FakeSource {
        async fn fetch(&self, location: &LocationQuery) -> Result<WeatherPayload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.fail_with_status {
                return Err(FetchError::Status {
                    status,
                    body: "Bad API Request:Invalid location parameter value.".to_string(),
                });
            }
            Ok(serde_json::from_value(serde_json::json!({
                "resolvedAddress": location.as_str(),
                "days": [{"tempmax": 21.0}]
            }))
            .unwrap())
        }
    }

    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Unavailable("Connection refused (os error 111)".to_string()))
        }

        async fn set(&self, _key: &CacheKey, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("Connection refused (os error 111)".to_string()))
        }
    }

    fn source(fail_with_status: Option<u16>) -> Arc<FakeSource> {
        Arc::new(FakeSource {
            calls: AtomicUsize::new(0),
            fail_with_status,
        })
    }

    fn app(store: Arc<dyn CacheStore>, source: Arc<FakeSource>, rate_limit_per_sec: u32) -> Router {
        let resolver = WeatherResolver::new(store, source, TTL);
        WeatherServer::router(WeatherServer::new(resolver, rate_limit_per_sec).state)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(Arc::new(MemoryCache::new()), source(None), 0);

        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_location_is_bad_request() {
        let source = source(None);
        let app = app(Arc::new(MemoryCache::new()), source.clone(), 0);

        let response = app.oneshot(get("/weather")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "location query parameter is required"})
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_location_is_bad_request() {
        let app = app(Arc::new(MemoryCache::new()), source(None), 0);

        let response = app.oneshot(get("/weather?location=")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_weather_is_cached_between_requests() {
        let store = Arc::new(MemoryCache::new());
        let source = source(None);
        let app = app(store.clone(), source.clone(), 0);

        let first = app.clone().oneshot(get("/weather?location=London")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first = json_body(first).await;
        assert_eq!(first["resolvedAddress"], "London");

        let second = app.oneshot(get("/weather?location=London")).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(json_body(second).await, first);

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_encoded_location_is_decoded() {
        let source = source(None);
        let app = app(Arc::new(MemoryCache::new()), source.clone(), 0);

        let response = app
            .oneshot(get("/weather?location=New%20York%2C%20NY"))
            .await
            .unwrap();

        assert_eq!(json_body(response).await["resolvedAddress"], "New York, NY");
    }

    #[tokio::test]
    async fn test_upstream_error_is_internal_error_with_message() {
        let app = app(Arc::new(MemoryCache::new()), source(Some(400)), 0);

        let response = app.oneshot(get("/weather?location=Atlantis")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        let message = body["error"].as_str().unwrap();
        assert!(message.starts_with("failed to fetch weather data: status 400"));
    }

    #[tokio::test]
    async fn test_cache_outage_hides_details() {
        let source = source(None);
        let app = app(Arc::new(DownStore), source.clone(), 0);

        let response = app.oneshot(get("/weather?location=London")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "internal server error"})
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_burst() {
        let app = app(Arc::new(MemoryCache::new()), source(None), 1);

        let first = app.clone().oneshot(get("/weather?location=Oslo")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(get("/weather?location=Oslo")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()["Retry-After"], "1");

        // Health checks are never limited.
        let health = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[test]
    fn test_zero_rate_disables_limiter() {
        assert!(RateLimiter::per_second(0).is_none());
        assert!(RateLimiter::per_second(5).is_some());
    }

    #[test]
    fn test_limiter_is_per_ip() {
        let limiter = RateLimiter::per_second(1).unwrap();
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(limiter.check(a).is_ok());
        assert!(limiter.check(a).is_err());
        assert!(limiter.check(b).is_ok());
    }

    #[test]
    fn test_prune_drops_refilled_buckets() {
        let limiter = RateLimiter::per_second(1).unwrap();
        for i in 0..5000u32 {
            let ip = IpAddr::V4(Ipv4Addr::from(0x0A00_0000 + i));
            assert!(limiter.check(ip).is_ok());
        }
        assert_eq!(limiter.len(), 5000);

        // A 1/s bucket is full again after one second.
        std::thread::sleep(Duration::from_millis(1200));
        limiter.prune();

        assert!(limiter.is_empty());
    }

    #[test]
    fn test_prune_keeps_limited_clients() {
        let limiter = RateLimiter::per_second(1).unwrap();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(limiter.check(ip).is_ok());

        limiter.prune();

        assert_eq!(limiter.len(), 1);
        assert!(limiter.check(ip).is_err());
    }

    #[tokio::test]
    async fn test_no_pruner_without_limiter() {
        let resolver = WeatherResolver::new(Arc::new(MemoryCache::new()), source(None), TTL);
        let server = WeatherServer::new(resolver, 0);
        assert!(spawn_pruner(server.state.clone()).is_none());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(300)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
    }
}
