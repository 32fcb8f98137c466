mod utils;
#[allow(unused)]
use utils::*;

use mock_service::MockState;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

fn fast_state() -> Arc<MockState> {
    Arc::new(MockState::new().with_delay(Duration::ZERO))
}

async fn login_token(client: &Client, base: &str) -> String {
    let response = client
        .post(format!("{base}/api/v1/auth/login"))
        .json(&json!({"email": "user1@test.com", "password": "password123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn login_issues_distinct_tokens() {
    init();
    let addr = spawn_mock(fast_state()).await;
    let base = format!("http://{addr}");
    let client = Client::new();

    let first = login_token(&client, &base).await;
    let second = login_token(&client, &base).await;
    assert_ne!(first, second);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn login_rejects_bad_credentials() {
    init();
    let addr = spawn_mock(fast_state()).await;
    let client = Client::new();

    let response = client
        .post(format!("http://{addr}/api/v1/auth/login"))
        .json(&json!({"email": "user1@test.com", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_CREDENTIALS");
    assert!(body["error"].is_string());
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn authenticated_routes_require_a_bearer_token() {
    init();
    let addr = spawn_mock(fast_state()).await;
    let base = format!("http://{addr}");
    let client = Client::new();

    for path in [
        "/api/v1/dashboard",
        "/api/v1/people/search",
        "/api/v1/feedback/public",
    ] {
        let response = client.get(format!("{base}{path}")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
    }

    let response = client
        .post(format!("{base}/api/v1/feedback"))
        .json(&json!({"content": "x", "rating": 3, "recipient_id": "user-123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A token from login opens the same routes.
    let token = login_token(&client, &base).await;
    let response = client
        .get(format!("{base}/api/v1/dashboard"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn search_finds_fixture_people() {
    init();
    let addr = spawn_mock(fast_state()).await;
    let base = format!("http://{addr}");
    let client = Client::new();
    let token = login_token(&client, &base).await;

    let response = client
        .get(format!("{base}/api/v1/people/search"))
        .query(&[("q", "test")])
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(body["total"], results.len() as u64);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn search_rate_limit_returns_429() {
    init();
    let state = Arc::new(
        MockState::new()
            .with_delay(Duration::ZERO)
            .with_search_limit(NonZeroU32::new(2).unwrap()),
    );
    let addr = spawn_mock(state).await;
    let base = format!("http://{addr}");
    let client = Client::new();
    let token = login_token(&client, &base).await;

    let mut limited = 0;
    for _ in 0..20 {
        let response = client
            .get(format!("{base}/api/v1/people/search"))
            .query(&[("q", "test")])
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            limited += 1;
        }
    }
    assert!(limited > 0, "the limiter never tripped across 20 requests");
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn feedback_create_validates_the_body() {
    init();
    let addr = spawn_mock(fast_state()).await;
    let base = format!("http://{addr}");
    let client = Client::new();
    let token = login_token(&client, &base).await;

    let response = client
        .post(format!("{base}/api/v1/feedback"))
        .bearer_auth(&token)
        .json(&json!({
            "content": "Load test feedback from user1@test.com",
            "rating": 4,
            "recipient_id": "user-123",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert!(body["id"].as_str().unwrap().starts_with("feedback-"));
    assert_eq!(body["rating"], 4);

    for bad in [
        json!({"content": "", "rating": 4, "recipient_id": "user-123"}),
        json!({"content": "x", "rating": 9, "recipient_id": "user-123"}),
        json!({"content": "x", "rating": 4, "recipient_id": ""}),
    ] {
        let response = client
            .post(format!("{base}/api/v1/feedback"))
            .bearer_auth(&token)
            .json(&bad)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{bad}");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_FEEDBACK");
    }
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn health_can_be_flipped_while_serving() {
    init();
    let state = fast_state();
    let addr = spawn_mock(state.clone()).await;
    let url = format!("http://{addr}/health");
    let client = Client::new();

    assert_eq!(client.get(&url).send().await.unwrap().status(), StatusCode::OK);

    state.set_healthy(false);
    assert_eq!(
        client.get(&url).send().await.unwrap().status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    state.set_healthy(true);
    assert_eq!(client.get(&url).send().await.unwrap().status(), StatusCode::OK);
}
