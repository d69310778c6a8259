// The transport seam.
//
// A Transport knows how to open ONE connection and yield text frames
// until it drops. Reconnection, backoff, fallback between transport
// kinds, and heartbeat accounting all live in the core engine -- which
// is also why this is a trait: the engine is tested against scripted
// fakes, not live sockets.

use std::pin::Pin;

use futures_core::Stream;
use futures_util::future::BoxFuture;

use crate::error::Error;

/// The transport kinds a resource may be synchronized over, in the
/// order they appear in a preference list.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransportKind {
    /// Push socket; lowest latency, first preference.
    #[strum(serialize = "websocket")]
    WebSocket,
    /// Server-sent events over a streaming HTTP response.
    Sse,
    /// Periodic GET of the resource's list endpoint.
    Polling,
}

/// One item from a connected transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame that may contain one or more JSON envelopes.
    Text(String),
    /// A keep-alive (WebSocket ping, SSE comment or `ping` event).
    /// Resets the liveness window but carries no data.
    KeepAlive,
}

/// A live connection: frames until close. `None` means the server
/// closed cleanly; an `Err` item means the connection broke. Either
/// way the stream is done and the engine decides what happens next.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, Error>> + Send>>;

/// A way to open one live connection for a resource.
///
/// `connect` re-reads the token provider on every call, so a token
/// refreshed between attempts is picked up by the next connection.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn connect(&self) -> BoxFuture<'static, Result<FrameStream, Error>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(TransportKind::WebSocket.to_string(), "websocket");
        assert_eq!(TransportKind::Sse.to_string(), "sse");
        assert_eq!(TransportKind::Polling.to_string(), "polling");

        assert_eq!(
            TransportKind::from_str("websocket").unwrap(),
            TransportKind::WebSocket
        );
        assert_eq!(TransportKind::from_str("sse").unwrap(), TransportKind::Sse);
    }
}
