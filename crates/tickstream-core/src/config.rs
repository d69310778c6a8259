// ── Runtime client configuration ──
//
// These types describe *how* to reach the backend and how each
// resource paces its live connection. They never touch disk -- the
// binary (or tickstream-config) constructs them and hands them in.

use std::time::Duration;

use url::Url;

use tickstream_api::TransportKind;

use crate::backoff::BackoffPolicy;

/// Default polling cadence for quotes (the product's 5s fallback).
pub const QUOTE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default polling cadence for orders (the product's 8s fallback).
pub const ORDER_POLL_INTERVAL: Duration = Duration::from_secs(8);

/// Default refresh cadence for portfolio positions.
pub const POSITION_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default refresh cadence for the watchlist.
pub const WATCHLIST_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Where the backend lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server origin for REST and SSE, e.g. `http://localhost:8080`.
    /// Endpoint paths (`/api/...`) are appended to this.
    pub http_base: Url,

    /// WebSocket base, e.g. `ws://localhost:8080/ws`. Stream names
    /// (`quotes`) are appended to this.
    pub ws_base: Url,

    /// One-shot request timeout for REST calls.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_base: Url::parse("http://localhost:8080").expect("static URL"),
            ws_base: Url::parse("ws://localhost:8080/ws").expect("static URL"),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Subscription parameters for one live resource.
///
/// Two `open` calls with the same resource name and equal parameters
/// attach to the same underlying resource; unequal parameters create a
/// fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncParams {
    /// Transports to attempt, in order. Each gets a full retry budget
    /// before the next is tried.
    pub transport_preference: Vec<TransportKind>,

    /// If no frame (data or keep-alive) arrives within this window,
    /// the transport is treated as stalled and reconnected.
    pub heartbeat: Duration,

    /// Reconnect pacing per transport.
    pub backoff: BackoffPolicy,

    /// Cadence of the polling transport, when it is in the chain.
    pub poll_interval: Duration,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            transport_preference: vec![
                TransportKind::WebSocket,
                TransportKind::Sse,
                TransportKind::Polling,
            ],
            heartbeat: Duration::from_secs(15),
            backoff: BackoffPolicy::default(),
            poll_interval: QUOTE_POLL_INTERVAL,
        }
    }
}

impl SyncParams {
    /// Defaults for the orders stream: the backend has no orders
    /// WebSocket, so the chain starts at SSE, with the slower 8s poll.
    pub fn orders() -> Self {
        Self {
            transport_preference: vec![TransportKind::Sse, TransportKind::Polling],
            poll_interval: ORDER_POLL_INTERVAL,
            ..Self::default()
        }
    }

    /// Defaults for refresh-style resources (positions, watchlist):
    /// no push endpoint exists, polling is the only transport.
    pub fn poll_only(interval: Duration) -> Self {
        Self {
            transport_preference: vec![TransportKind::Polling],
            poll_interval: interval,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_preference_is_ws_sse_poll() {
        let params = SyncParams::default();
        assert_eq!(
            params.transport_preference,
            vec![
                TransportKind::WebSocket,
                TransportKind::Sse,
                TransportKind::Polling
            ]
        );
        assert_eq!(params.heartbeat, Duration::from_secs(15));
    }

    #[test]
    fn orders_params_skip_websocket() {
        let params = SyncParams::orders();
        assert_eq!(params.transport_preference[0], TransportKind::Sse);
        assert_eq!(params.poll_interval, ORDER_POLL_INTERVAL);
    }
}
