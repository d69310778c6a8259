// Integration tests for `RestClient` using wiremock.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tickstream_api::{Error, MemoryTokenStore, NoToken, RestClient, TokenProvider};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(tokens: Arc<dyn TokenProvider>) -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let base = server.uri().parse().expect("mock server URI");
    let client = RestClient::from_reqwest(base, reqwest::Client::new(), tokens);
    (server, client)
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn get_attaches_bearer_token() {
    let (server, client) = setup(Arc::new(MemoryTokenStore::with_token("tok-123"))).await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let orders: Vec<serde_json::Value> = client.get_json("/api/orders", &[]).await.unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn get_without_token_sends_no_auth_header() {
    let (server, client) = setup(Arc::new(NoToken)).await;

    Mock::given(method("GET"))
        .and(path("/api/quotes/initial"))
        .and(query_param("symbols", "AAPL,TSLA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "AAPL": { "price": 100.0, "changePct": 0.0, "ts": 1000 },
            "TSLA": { "price": 250.0, "changePct": -0.5, "ts": 1000 },
        })))
        .mount(&server)
        .await;

    let body = client
        .get_text("/api/quotes/initial", &[("symbols", "AAPL,TSLA".into())])
        .await
        .unwrap();

    // The mock only matched because no auth header was required; make
    // sure the payload came through untouched.
    assert!(body.contains("AAPL"));

    let requests = server.received_requests().await.unwrap();
    assert!(
        requests[0].headers.get("authorization").is_none(),
        "unauthenticated client must not send an Authorization header"
    );
}

#[tokio::test]
async fn post_decodes_created_entity() {
    let (server, client) = setup(Arc::new(NoToken)).await;

    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "symbol": "AAPL",
            "side": "BUY",
            "type": "MARKET",
            "qty": 10,
            "status": "ACCEPTED",
        })))
        .mount(&server)
        .await;

    let created: serde_json::Value = client
        .post_json(
            "/api/orders",
            &json!({ "symbol": "AAPL", "side": "BUY", "type": "MARKET", "qty": 10 }),
        )
        .await
        .unwrap();

    assert_eq!(created["id"], 42);
    assert_eq!(created["status"], "ACCEPTED");
}

#[tokio::test]
async fn delete_succeeds_on_2xx() {
    let (server, client) = setup(Arc::new(NoToken)).await;

    Mock::given(method("DELETE"))
        .and(path("/api/orders/7"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    client.delete("/api/orders/7").await.unwrap();
}

// ── Error mapping ───────────────────────────────────────────────────

#[tokio::test]
async fn error_body_message_is_unwrapped() {
    let (server, client) = setup(Arc::new(NoToken)).await;

    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "message": "qty must be positive" })),
        )
        .mount(&server)
        .await;

    let err = client
        .post_json::<serde_json::Value, _>("/api/orders", &json!({ "qty": 0 }))
        .await
        .unwrap_err();

    match err {
        Error::Api { message, status } => {
            assert_eq!(message, "qty must be positive");
            assert_eq!(status, 400);
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn unauthorized_maps_to_authentication() {
    let (server, client) = setup(Arc::new(MemoryTokenStore::with_token("stale"))).await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "expired" })))
        .mount(&server)
        .await;

    let err = client
        .get_json::<Vec<serde_json::Value>>("/api/orders", &[])
        .await
        .unwrap_err();

    match err {
        Error::Authentication { message } => assert_eq!(message, "expired"),
        other => panic!("expected Authentication error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_json_preserves_body() {
    let (server, client) = setup(Arc::new(NoToken)).await;

    Mock::given(method("GET"))
        .and(path("/api/positions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let err = client
        .get_json::<Vec<serde_json::Value>>("/api/positions", &[])
        .await
        .unwrap_err();

    match err {
        Error::Deserialization { body, .. } => assert!(body.contains("proxy error")),
        other => panic!("expected Deserialization error, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_refused_is_unreachable() {
    // Port 1 is never listening.
    let base = "http://127.0.0.1:1".parse().unwrap();
    let client = RestClient::from_reqwest(base, reqwest::Client::new(), Arc::new(NoToken));

    let err = client
        .get_json::<Vec<serde_json::Value>>("/api/orders", &[])
        .await
        .unwrap_err();

    assert!(err.is_unreachable(), "got {err:?}");
    assert!(err.is_transient());
}
