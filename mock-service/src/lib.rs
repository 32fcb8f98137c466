//! An in-process stand-in for the people-and-feedback API.
//!
//! Implements just enough surface for the load harness: login with the
//! fixture accounts, three authenticated read endpoints and one write
//! endpoint, all behind a tunable simulated latency. Search can be rate
//! limited and the health endpoint can be flipped unhealthy, so tests can
//! push the harness through degraded paths as well as happy ones.
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{debug_handler, Json, Router};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lazy_static::lazy_static;
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
#[allow(unused)]
use tracing::{debug, info, warn};

lazy_static! {
    static ref FIXTURE_USERS: HashMap<&'static str, &'static str> = HashMap::from([
        ("user1@test.com", "password123"),
        ("user2@test.com", "password123"),
        ("user3@test.com", "password123"),
        ("user4@test.com", "password123"),
        ("user5@test.com", "password123"),
    ]);
    static ref PEOPLE: Vec<Person> = vec![
        Person::new("person-1", "Test Person One", "person1@test.com"),
        Person::new("person-2", "Test Person Two", "person2@test.com"),
        Person::new("person-3", "Another Tester", "person3@test.com"),
    ];
}

/// Shared state behind all routes.
pub struct MockState {
    users: HashMap<&'static str, &'static str>,
    tokens: RwLock<HashSet<String>>,
    seq: AtomicU64,
    base_delay: Duration,
    search_limiter: Option<DefaultDirectRateLimiter>,
    healthy: AtomicBool,
}

impl MockState {
    pub fn new() -> Self {
        Self {
            users: FIXTURE_USERS.clone(),
            tokens: RwLock::new(HashSet::new()),
            seq: AtomicU64::new(0),
            base_delay: Duration::from_millis(2),
            search_limiter: None,
            healthy: AtomicBool::new(true),
        }
    }

    /// Center of the simulated per-request latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Cap `/api/v1/people/search` at `tps` requests per second; excess
    /// requests get `429 Too Many Requests`.
    pub fn with_search_limit(mut self, tps: NonZeroU32) -> Self {
        self.search_limiter = Some(RateLimiter::direct(Quota::per_second(tps)));
        self
    }

    /// Flip the `/health` endpoint; can be called while serving.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        bearer_token(headers)
            .map(|token| self.tokens.read().unwrap().contains(token))
            .unwrap_or(false)
    }

    async fn simulate_work(&self) {
        let millis = self.base_delay.as_secs_f64() * 1e3;
        let jitter = Normal::new(millis, millis / 4.0)
            .map(|normal| normal.sample(&mut rand::thread_rng()))
            .unwrap_or(millis)
            .max(0.0);
        tokio::time::sleep(Duration::from_secs_f64(jitter / 1e3)).await;
    }
}

impl Default for MockState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn app(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/dashboard", get(dashboard))
        .route("/api/v1/people/search", get(search))
        .route("/api/v1/feedback/public", get(feedback_public))
        .route("/api/v1/feedback", post(feedback_create))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener. Tests bind port 0 and read the
/// local address back before calling this.
pub async fn serve(listener: TcpListener, state: Arc<MockState>) -> anyhow::Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn run(addr: SocketAddr, state: Arc<MockState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("mock service listening on {addr}");
    serve(listener, state).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn note(route: &'static str) {
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    counter!("mock-service.requests", "route" => route).increment(1);
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ApiError {
            error: message.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

/** Handlers **/

#[debug_handler]
async fn health(State(state): State<Arc<MockState>>) -> Response {
    note("health");
    if state.healthy.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response()
    } else {
        error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "UNHEALTHY",
            "service is draining",
        )
    }
}

#[debug_handler]
async fn login(State(state): State<Arc<MockState>>, Json(body): Json<LoginRequest>) -> Response {
    note("login");
    state.simulate_work().await;

    match state.users.get(body.email.as_str()) {
        Some(password) if *password == body.password => {
            let seq = state.seq.fetch_add(1, Ordering::Relaxed);
            let access_token = format!("token-{seq:08x}");
            state.tokens.write().unwrap().insert(access_token.clone());
            (
                StatusCode::OK,
                Json(LoginResponse {
                    access_token,
                    refresh_token: format!("refresh-{seq:08x}"),
                }),
            )
                .into_response()
        }
        _ => error_response(
            StatusCode::UNAUTHORIZED,
            "INVALID_CREDENTIALS",
            "invalid email or password",
        ),
    }
}

#[debug_handler]
async fn dashboard(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    note("dashboard");
    if !state.authorized(&headers) {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid token",
        );
    }
    state.simulate_work().await;
    (
        StatusCode::OK,
        Json(DashboardResponse {
            pending_reviews: 3,
            unread_feedback: 7,
            team_size: 12,
        }),
    )
        .into_response()
}

#[debug_handler]
async fn search(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Response {
    note("search");
    if !state.authorized(&headers) {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid token",
        );
    }
    if let Some(limiter) = &state.search_limiter {
        if limiter.check().is_err() {
            debug!("search rate limit tripped");
            return error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "search is rate limited",
            );
        }
    }
    state.simulate_work().await;

    let needle = query.q.to_lowercase();
    let results: Vec<Person> = PEOPLE
        .iter()
        .filter(|person| {
            needle.is_empty()
                || person.name.to_lowercase().contains(&needle)
                || person.email.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect();
    (
        StatusCode::OK,
        Json(SearchResponse {
            total: results.len(),
            results,
        }),
    )
        .into_response()
}

#[debug_handler]
async fn feedback_public(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    note("feedback_public");
    if !state.authorized(&headers) {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid token",
        );
    }
    state.simulate_work().await;
    let feedback = vec![
        FeedbackEntry {
            id: "feedback-1".to_string(),
            content: "Great collaboration this sprint".to_string(),
            rating: 5,
            recipient_id: "user-123".to_string(),
        },
        FeedbackEntry {
            id: "feedback-2".to_string(),
            content: "Clear and timely reviews".to_string(),
            rating: 4,
            recipient_id: "user-456".to_string(),
        },
    ];
    (
        StatusCode::OK,
        Json(FeedbackListResponse {
            total: feedback.len(),
            feedback,
        }),
    )
        .into_response()
}

#[debug_handler]
async fn feedback_create(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<FeedbackRequest>,
) -> Response {
    note("feedback_create");
    if !state.authorized(&headers) {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid token",
        );
    }
    state.simulate_work().await;

    if body.content.is_empty() || body.recipient_id.is_empty() || !(1..=5).contains(&body.rating) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_FEEDBACK",
            "content, rating 1-5 and recipient_id are required",
        );
    }

    let seq = state.seq.fetch_add(1, Ordering::Relaxed);
    (
        StatusCode::CREATED,
        Json(FeedbackEntry {
            id: format!("feedback-{seq}"),
            content: body.content,
            rating: body.rating,
            recipient_id: body.recipient_id,
        }),
    )
        .into_response()
}

/** Wire types **/

#[derive(Serialize)]
struct ApiError {
    error: String,
    code: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
}

#[derive(Serialize)]
struct DashboardResponse {
    pending_reviews: u32,
    unread_feedback: u32,
    team_size: u32,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Serialize, Clone)]
struct Person {
    id: String,
    name: String,
    email: String,
}

impl Person {
    fn new(id: &str, name: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<Person>,
    total: usize,
}

#[derive(Deserialize)]
struct FeedbackRequest {
    content: String,
    rating: u8,
    recipient_id: String,
}

#[derive(Serialize)]
struct FeedbackEntry {
    id: String,
    content: String,
    rating: u8,
    recipient_id: String,
}

#[derive(Serialize)]
struct FeedbackListResponse {
    feedback: Vec<FeedbackEntry>,
    total: usize,
}

/** TPS Printer **/

static TPS_MEASURE: AtomicU64 = AtomicU64::new(0);

pub async fn tps_measure_task() {
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let transactions = TPS_MEASURE.fetch_min(0, Ordering::Relaxed);
        println!("{transactions} TPS");
    }
}
