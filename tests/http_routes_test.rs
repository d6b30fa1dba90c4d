//! HTTP route tests
//!
//! Exercises the axum router end to end with `tower::ServiceExt::oneshot`
//! and a wiremock token endpoint.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use integrations::oauth::provider::Provider;
use integrations::oauth::state;
use integrations::server::{self, AppState, StoreHandle, NONCE_COOKIE};
use integrations::storage::{CredentialStore, SqliteCredentialStore};

mod common;

fn sqlite_app(base_url: &str, store: &SqliteCredentialStore) -> axum::Router {
    server::router(AppState::new(
        common::flow(base_url),
        StoreHandle::Shared(Arc::new(store.clone())),
        false,
    ))
}

async fn get(app: axum::Router, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .unwrap()
        .to_string()
}

fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Returns the `name=value` pair of the named cookie.
fn cookie_pair(response: &Response<Body>, name: &str) -> Option<String> {
    set_cookies(response)
        .into_iter()
        .find(|c| c.starts_with(&format!("{}=", name)))
        .and_then(|c| c.split(';').next().map(str::to_string))
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn mount_token(server: &MockServer, status: u16, body: serde_json::Value, times: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_healthz() {
    let (store, _tmp) = common::create_temp_store();
    let response = get(sqlite_app("https://p.example.com", &store), "/healthz", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

#[tokio::test]
async fn test_connect_redirects_to_provider_with_state() {
    let (store, _tmp) = common::create_temp_store();
    let app = sqlite_app("https://provider.example.com", &store);

    let response = get(app, "/auth/connect?userId=42", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let url = location(&response);
    assert!(url.starts_with("https://provider.example.com/authorize?"));
    assert_eq!(
        common::query_param(&url, "redirect_uri").as_deref(),
        Some(common::REDIRECT_URI)
    );
    let state_param = common::query_param(&url, "state").unwrap();
    let pending = state::decode(&state_param).unwrap();
    assert_eq!(pending.subject_id, "42");
    assert_eq!(pending.provider, Some(Provider::Github));

    // GitHub does not enforce the nonce cookie
    assert!(cookie_pair(&response, NONCE_COOKIE).is_none());
}

#[tokio::test]
async fn test_connect_without_user_id_is_bad_request() {
    let (store, _tmp) = common::create_temp_store();

    for uri in ["/auth/connect", "/auth/connect?userId=", "/auth/github?userId=%20"] {
        let response = get(sqlite_app("https://p.example.com", &store), uri, None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert!(response.headers().get(header::LOCATION).is_none());
        assert_eq!(body_text(response).await, "Missing userId");
    }
}

#[tokio::test]
async fn test_connect_unknown_provider_is_not_found() {
    let (store, _tmp) = common::create_temp_store();
    let response = get(
        sqlite_app("https://p.example.com", &store),
        "/auth/gitlab?userId=42",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_callback_success_stores_credential_and_redirects() {
    let server = MockServer::start().await;
    mount_token(
        &server,
        200,
        json!({"access_token": "tok1", "expires_in": 3600}),
        1,
    )
    .await;

    let (store, _tmp) = common::create_temp_store();
    let connect = get(sqlite_app(&server.uri(), &store), "/auth/connect?userId=42", None).await;
    let state_param = common::query_param(&location(&connect), "state").unwrap();

    let response = get(
        sqlite_app(&server.uri(), &store),
        &format!("/callback?code=abc&state={}", state_param),
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "https://app.example.com/dashboard?status=success"
    );

    let stored = store.get("42", Provider::Github).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "tok1");
    assert!(stored.expires_at.is_some());
}

#[tokio::test]
async fn test_callback_provider_rejection_redirects_with_error() {
    let server = MockServer::start().await;
    mount_token(&server, 401, json!({"error": "invalid_client"}), 1).await;

    let (store, _tmp) = common::create_temp_store();
    let connect = get(sqlite_app(&server.uri(), &store), "/auth/connect?userId=42", None).await;
    let state_param = common::query_param(&location(&connect), "state").unwrap();

    let response = get(
        sqlite_app(&server.uri(), &store),
        &format!("/callback?code=abc&state={}", state_param),
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "https://app.example.com/dashboard?status=error"
    );
    assert!(store.get("42", Provider::Github).await.unwrap().is_none());
}

#[tokio::test]
async fn test_callback_without_state_is_bad_request_and_makes_no_calls() {
    let server = MockServer::start().await;
    mount_token(&server, 200, json!({"access_token": "tok1"}), 0).await;

    let (store, _tmp) = common::create_temp_store();
    let response = get(sqlite_app(&server.uri(), &store), "/callback?code=abc", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::LOCATION).is_none());
    assert!(store.list_for_subject("42").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_callback_without_code_is_bad_request() {
    let server = MockServer::start().await;
    mount_token(&server, 200, json!({"access_token": "tok1"}), 0).await;

    let (store, _tmp) = common::create_temp_store();
    let token = state::encode(&state::PendingAuthorization::new("42", Provider::Github)).unwrap();
    let response = get(
        sqlite_app(&server.uri(), &store),
        &format!("/callback?state={}", token),
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_quickbooks_round_trip_requires_nonce_cookie() {
    let server = MockServer::start().await;
    mount_token(
        &server,
        200,
        json!({"access_token": "qb", "refresh_token": "qbr", "expires_in": 3600}),
        1,
    )
    .await;

    let (store, _tmp) = common::create_temp_store();
    let connect = get(
        sqlite_app(&server.uri(), &store),
        "/auth/quickbooks?userId=42",
        None,
    )
    .await;
    assert_eq!(connect.status(), StatusCode::FOUND);
    let nonce = cookie_pair(&connect, NONCE_COOKIE).expect("nonce cookie");
    assert!(set_cookies(&connect)
        .iter()
        .any(|c| c.starts_with(NONCE_COOKIE) && c.contains("HttpOnly")));
    let state_param = common::query_param(&location(&connect), "state").unwrap();
    let callback_uri = format!("/callback?code=abc&state={}&realmId=9130", state_param);

    // Without the cookie the callback is rejected before the exchange.
    let rejected = get(sqlite_app(&server.uri(), &store), &callback_uri, None).await;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let response = get(sqlite_app(&server.uri(), &store), &callback_uri, Some(&nonce)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "https://app.example.com/dashboard?status=success"
    );

    // The nonce is single-use.
    let cleared = cookie_pair(&response, NONCE_COOKIE).expect("nonce removal");
    assert_eq!(cleared, format!("{}=", NONCE_COOKIE));

    let stored = store.get("42", Provider::Quickbooks).await.unwrap().unwrap();
    assert_eq!(stored.realm_id.as_deref(), Some("9130"));
    assert_eq!(stored.refresh_token.as_deref(), Some("qbr"));
}

#[tokio::test]
async fn test_cookie_backend_returns_credential_cookies() {
    let server = MockServer::start().await;
    mount_token(
        &server,
        200,
        json!({"access_token": "tok1", "expires_in": 3600}),
        1,
    )
    .await;

    let app = || {
        server::router(AppState::new(
            common::flow(&server.uri()),
            StoreHandle::Cookie,
            true,
        ))
    };

    let connect = get(app(), "/auth/github?userId=42", None).await;
    let state_param = common::query_param(&location(&connect), "state").unwrap();

    let response = get(app(), &format!("/callback?code=abc&state={}", state_param), None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).ends_with("status=success"));

    let cookies = set_cookies(&response);
    let access = cookies
        .iter()
        .find(|c| c.starts_with("access_token=tok1"))
        .expect("access token cookie");
    assert!(access.contains("HttpOnly"));
    assert!(access.contains("Secure"));
    assert!(access.contains("SameSite=Lax"));
    assert!(cookies.iter().any(|c| c.starts_with("credential_subject=42")));
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("credential_provider=github")));
}

#[tokio::test]
async fn test_cookie_backend_failed_exchange_sets_no_credential_cookies() {
    let server = MockServer::start().await;
    mount_token(&server, 500, json!({"error": "server_error"}), 1).await;

    let app = || {
        server::router(AppState::new(
            common::flow(&server.uri()),
            StoreHandle::Cookie,
            true,
        ))
    };

    let connect = get(app(), "/auth/github?userId=42", None).await;
    let state_param = common::query_param(&location(&connect), "state").unwrap();

    let response = get(app(), &format!("/callback?code=abc&state={}", state_param), None).await;
    assert!(location(&response).ends_with("status=error"));
    assert!(!set_cookies(&response)
        .iter()
        .any(|c| c.starts_with("access_token=")));
}
