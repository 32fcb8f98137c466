//! The virtual-user iteration: log in, run one flow, think, repeat.
use rand::Rng;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use stampede::metrics::{HttpMetrics, Rate, Registry, Trend};
use stampede::pick::{IterationContext, WeightedChoice};
use std::ops::Range;
use std::time::{Duration, Instant};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

/// Custom metric series recorded on top of the built-in HTTP ones.
pub const ERRORS: &str = "errors";
pub const LOGIN_DURATION: &str = "login_duration";
pub const API_DURATION: &str = "api_duration";
pub const SEARCH_DURATION: &str = "search_duration";

/// Accounts the backend test fixtures know about.
pub const TEST_USERS: [TestUser; 5] = [
    TestUser::new("user1@test.com", "password123"),
    TestUser::new("user2@test.com", "password123"),
    TestUser::new("user3@test.com", "password123"),
    TestUser::new("user4@test.com", "password123"),
    TestUser::new("user5@test.com", "password123"),
];

/// Fraction of feedback-create picks that actually post feedback; the rest
/// are a no-op that counts as success.
pub const FEEDBACK_CREATE_PROBABILITY: f64 = 0.1;

/// Pause between iterations, sampled uniformly.
const THINK_TIME: Range<Duration> = Duration::from_secs(1)..Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestUser {
    pub email: &'static str,
    pub password: &'static str,
}

impl TestUser {
    const fn new(email: &'static str, password: &'static str) -> Self {
        Self { email, password }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Dashboard,
    Search,
    FeedbackView,
    FeedbackCreate,
}

/// One pool of virtual users' view of the API under test.
///
/// All metric handles are acquired once at wiring time; iterations never
/// touch the registry.
pub struct ApiScenarios {
    client: Client,
    base_url: String,
    users: WeightedChoice<TestUser>,
    flows: WeightedChoice<Flow>,
    http: HttpMetrics,
    errors: Rate,
    login_duration: Trend,
    api_duration: Trend,
    search_duration: Trend,
}

impl ApiScenarios {
    pub fn new(client: Client, base_url: String, registry: &Registry) -> Self {
        Self {
            client,
            base_url,
            users: WeightedChoice::uniform(TEST_USERS),
            flows: WeightedChoice::uniform([
                Flow::Dashboard,
                Flow::Search,
                Flow::FeedbackView,
                Flow::FeedbackCreate,
            ]),
            http: registry.http(),
            errors: registry.rate(ERRORS),
            login_duration: registry.trend(LOGIN_DURATION),
            api_duration: registry.trend(API_DURATION),
            search_duration: registry.trend(SEARCH_DURATION),
        }
    }

    /// One full virtual-user iteration. Failures are recorded in the
    /// `errors` series rather than propagated; the load keeps flowing.
    ///
    /// A failed login ends the iteration immediately, without think time.
    pub async fn iteration(&self, mut ctx: IterationContext) {
        let user = *self.users.pick(ctx.rng());
        trace!(
            "Worker {} iteration {} running as {}",
            ctx.worker(),
            ctx.iteration(),
            user.email
        );

        let Some(token) = self.login(user).await else {
            return;
        };

        let flow = *self.flows.pick(ctx.rng());
        let ok = match flow {
            Flow::Dashboard => self.dashboard(&token).await,
            Flow::Search => self.search(&token).await,
            Flow::FeedbackView => self.feedback_view(&token).await,
            Flow::FeedbackCreate => self.feedback_create(&token, user, &mut ctx).await,
        };
        if !ok {
            self.errors.add(true);
        }

        tokio::time::sleep(ctx.think_time(THINK_TIME)).await;
    }

    /// Authenticates as `user`, returning the access token. Every failure
    /// path records exactly one `errors` sample.
    async fn login(&self, user: TestUser) -> Option<String> {
        let request = self
            .client
            .post(format!("{}/api/v1/auth/login", self.base_url))
            .json(&LoginRequest {
                email: user.email,
                password: user.password,
            });

        let started = Instant::now();
        let result = request.send().await;
        let elapsed = started.elapsed();
        self.login_duration.add(elapsed);

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.http.record(elapsed, false);
                self.errors.add(true);
                warn!("Login request failed for {}: {err}", user.email);
                return None;
            }
        };

        let status = response.status();
        self.http.record(elapsed, status.as_u16() < 400);
        if status != StatusCode::OK {
            self.errors.add(true);
            warn!("Login failed for {}: {status}", user.email);
            return None;
        }

        match response.json::<LoginResponse>().await {
            Ok(body) if !body.access_token.is_empty() => Some(body.access_token),
            Ok(_) => {
                self.errors.add(true);
                warn!("Login response for {} carried an empty access token", user.email);
                None
            }
            Err(err) => {
                self.errors.add(true);
                warn!("Login response for {} was unreadable: {err}", user.email);
                None
            }
        }
    }

    async fn dashboard(&self, token: &str) -> bool {
        let request = self
            .client
            .get(format!("{}/api/v1/dashboard", self.base_url))
            .bearer_auth(token);
        self.timed(request, &self.api_duration).await == Some(StatusCode::OK)
    }

    async fn search(&self, token: &str) -> bool {
        let request = self
            .client
            .get(format!("{}/api/v1/people/search", self.base_url))
            .query(&[("q", "test")])
            .bearer_auth(token);
        self.timed(request, &self.search_duration).await == Some(StatusCode::OK)
    }

    async fn feedback_view(&self, token: &str) -> bool {
        let request = self
            .client
            .get(format!("{}/api/v1/feedback/public", self.base_url))
            .bearer_auth(token);
        self.timed(request, &self.api_duration).await == Some(StatusCode::OK)
    }

    async fn feedback_create(
        &self,
        token: &str,
        user: TestUser,
        ctx: &mut IterationContext,
    ) -> bool {
        if !ctx.chance(FEEDBACK_CREATE_PROBABILITY) {
            return true;
        }
        let body = FeedbackRequest {
            content: format!("Load test feedback from {}", user.email),
            rating: ctx.rng().gen_range(1..=5),
            recipient_id: "user-123",
        };
        let request = self
            .client
            .post(format!("{}/api/v1/feedback", self.base_url))
            .bearer_auth(token)
            .json(&body);
        self.timed(request, &self.api_duration).await == Some(StatusCode::CREATED)
    }

    /// Sends `request`, recording the built-in HTTP series and `trend`.
    /// Returns the status, or `None` for a transport-level failure.
    async fn timed(&self, request: RequestBuilder, trend: &Trend) -> Option<StatusCode> {
        let started = Instant::now();
        let result = request.send().await;
        let elapsed = started.elapsed();
        trend.add(elapsed);

        match result {
            Ok(response) => {
                let status = response.status();
                self.http.record(elapsed, status.as_u16() < 400);
                Some(status)
            }
            Err(err) => {
                self.http.record(elapsed, false);
                warn!("Request failed: {err}");
                None
            }
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Serialize)]
struct FeedbackRequest<'a> {
    content: String,
    rating: u8,
    recipient_id: &'a str,
}
