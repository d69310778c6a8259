use thiserror::Error;

/// Top-level error type for the `tickstream-api` crate.
///
/// Covers every failure mode of the transport layer: REST calls,
/// WebSocket and SSE connections, and response decoding.
/// `tickstream-core` maps these into its consumer-facing taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The server rejected the request's credential (HTTP 401).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// A credential was required to even build the request, and the
    /// token provider had none.
    #[error("No access token available")]
    MissingCredential,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── REST API ────────────────────────────────────────────────────
    /// Non-2xx response with the server's `{ message }` body unwrapped.
    #[error("API error (HTTP {status}): {message}")]
    Api { message: String, status: u16 },

    // ── Streaming ───────────────────────────────────────────────────
    /// WebSocket connection failed or broke mid-stream.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// SSE connection failed or broke mid-stream.
    #[error("SSE connection failed: {0}")]
    SseConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::SseConnect(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if no network path could even be attempted --
    /// the request never reached a server.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::MissingCredential => true,
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
