// Optimistic mutation semantics: PENDING insert, confirmation,
// rollback on rejection, and Unreachable when no path exists --
// against a wiremock backend and against gate-controlled mutators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tickstream_api::envelope::{Decoder, decode_order_frame};
use tickstream_api::token::NoToken;

use tickstream_core::{
    ClientConfig, MutationStatus, Mutator, Order, OrderDraft, OrderStatus, ResourceBuilder,
    Side, SyncError, SyncParams, TradeClient,
};

use common::wait_for;

const DEADLINE: Duration = Duration::from_secs(5);

fn client_for(server_uri: &str) -> TradeClient {
    let config = ClientConfig {
        http_base: server_uri.parse().expect("mock server URI"),
        ws_base: "ws://127.0.0.1:1/ws".parse().expect("static URL"),
        timeout: Duration::from_secs(5),
    };
    TradeClient::new(config, Arc::new(NoToken)).expect("client")
}

fn fast_poll() -> SyncParams {
    SyncParams::poll_only(Duration::from_millis(50))
}

// ── Confirmation path ───────────────────────────────────────────────

#[tokio::test]
async fn place_order_replaces_pending_with_server_entity() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "symbol": "AAPL",
            "side": "BUY",
            "type": "MARKET",
            "qty": 10,
            "status": "ACCEPTED",
            "createdAt": "2026-02-10T12:00:00Z",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let orders = client.orders_with(fast_poll());

    let placed = client
        .place_order(&orders, &OrderDraft::market("aapl", Side::Buy, 10))
        .await
        .expect("placement");

    assert_eq!(placed.id, "42");
    assert_eq!(placed.status, OrderStatus::Accepted);

    // The authoritative entity is cached; the optimistic entry is gone.
    assert!(orders.get("42").is_some());
    assert!(
        orders.data().iter().all(|o| !o.id.starts_with("local-")),
        "no optimistic leftovers"
    );

    let mutations = orders.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].status, MutationStatus::Confirmed);

    orders.close();
    client.close();
}

// ── Rejection path ──────────────────────────────────────────────────

#[tokio::test]
async fn rejected_order_is_rolled_back() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "message": "insufficient buying power" })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let orders = client.orders_with(fast_poll());

    let err = client
        .place_order(&orders, &OrderDraft::market("AAPL", Side::Buy, 10_000))
        .await
        .expect_err("server declined");

    match err {
        SyncError::MutationRejected { message, status } => {
            assert_eq!(message, "insufficient buying power");
            assert_eq!(status, Some(400));
        }
        other => panic!("expected MutationRejected, got {other:?}"),
    }

    assert!(
        orders.data().iter().all(|o| !o.id.starts_with("local-")),
        "optimistic entry must be rolled back"
    );

    let mutations = orders.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].status, MutationStatus::Rejected);

    orders.close();
    client.close();
}

/// The PENDING entry must be visible while the round-trip is in
/// flight. Driven through a gate-controlled mutator rather than
/// network timing.
#[tokio::test]
async fn pending_entry_is_visible_mid_flight() {
    let decoder: Decoder = Arc::new(decode_order_frame);
    let (_vis_tx, vis_rx) = watch::channel(true);

    let gate = Arc::new(tokio::sync::Notify::new());
    let mutator = Mutator::<Order> {
        submit: {
            let gate = Arc::clone(&gate);
            Arc::new(move |_draft: Value| {
                let gate = Arc::clone(&gate);
                Box::pin(async move {
                    gate.notified().await;
                    Err(tickstream_api::Error::Api {
                        message: "rejected after a long think".into(),
                        status: 400,
                    })
                })
            })
        },
        pending: Arc::new(|draft, local_id| {
            let mut obj = draft.as_object()?.clone();
            obj.insert("id".to_owned(), Value::String(local_id.to_owned()));
            obj.insert("status".to_owned(), Value::String("PENDING".to_owned()));
            serde_json::from_value(Value::Object(obj)).ok()
        }),
    };

    let orders = ResourceBuilder::new("orders", decoder, vis_rx)
        .mutator(mutator)
        .open();

    let draft = OrderDraft::market("AAPL", Side::Buy, 1);
    let orders_ref = orders.clone();
    let mutation = tokio::spawn(async move { orders_ref.mutate(&draft).await });

    // While parked on the gate: exactly one PENDING entry in the cache.
    wait_for("pending entry", DEADLINE, || {
        orders
            .data()
            .iter()
            .any(|o| o.status == OrderStatus::Pending && o.id.starts_with("local-"))
    })
    .await;

    gate.notify_one();
    let err = mutation.await.expect("join").expect_err("rejected");
    assert!(matches!(err, SyncError::MutationRejected { .. }));

    // Rolled back after settlement.
    assert!(orders.data().is_empty());

    orders.close();
}

// ── Unreachable path ────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_backend_surfaces_error_not_a_fake_fill() {
    // Port 1 refuses connections.
    let client = client_for("http://127.0.0.1:1");
    let orders = client.orders_with(fast_poll());

    let err = client
        .place_order(&orders, &OrderDraft::market("AAPL", Side::Buy, 1))
        .await
        .expect_err("no path to the server");

    assert!(
        matches!(err, SyncError::Unreachable { .. }),
        "got {err:?}"
    );

    // Nothing was fabricated: the cache holds no fill, no order at all.
    assert!(orders.data().is_empty());

    orders.close();
    client.close();
}

// ── Local validation ────────────────────────────────────────────────

#[tokio::test]
async fn invalid_drafts_never_reach_the_network() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // No POST mock mounted: a request would 404 and fail differently.
    let client = client_for(&server.uri());
    let orders = client.orders_with(fast_poll());

    let err = client
        .place_order(&orders, &OrderDraft::market("AAPL", Side::Buy, 0))
        .await
        .expect_err("qty 0");
    assert!(matches!(err, SyncError::InvalidParameters { .. }));

    let err = client
        .place_order(&orders, &OrderDraft::market("  ", Side::Sell, 1))
        .await
        .expect_err("blank symbol");
    assert!(matches!(err, SyncError::InvalidParameters { .. }));

    assert!(orders.mutations().is_empty(), "validation happens before the ledger");

    orders.close();
    client.close();
}

// ── Cancellation ────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_order_removes_the_cached_entry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 7, "symbol": "TSLA", "side": "SELL", "type": "LIMIT",
              "qty": 2, "limitPrice": 251.0, "status": "OPEN" }
        ])))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/orders/7"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let orders = client.orders_with(fast_poll());

    wait_for("order 7 polled in", DEADLINE, || orders.get("7").is_some()).await;

    client.cancel_order(&orders, "7").await.expect("cancel");
    assert!(orders.get("7").is_none());

    orders.close();
    client.close();
}

#[tokio::test]
async fn failed_cancel_leaves_cache_untouched() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 7, "symbol": "TSLA", "side": "SELL", "type": "LIMIT",
              "qty": 2, "limitPrice": 251.0, "status": "OPEN" }
        ])))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/orders/7"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "message": "already filled" })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let orders = client.orders_with(fast_poll());

    wait_for("order 7 polled in", DEADLINE, || orders.get("7").is_some()).await;

    let err = client
        .cancel_order(&orders, "7")
        .await
        .expect_err("server refused");
    assert!(matches!(err, SyncError::MutationRejected { .. }));
    assert!(orders.get("7").is_some(), "entry must survive a failed cancel");

    orders.close();
    client.close();
}
