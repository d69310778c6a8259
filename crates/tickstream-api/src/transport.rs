// Shared transport configuration for building reqwest::Client instances.
//
// The REST client and the SSE transport share timeout and user-agent
// settings through this module, avoiding duplicated builder logic.

use std::time::Duration;

/// Shared configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// The request timeout applies to one-shot REST calls only; the SSE
    /// transport builds its own client without one, since an event
    /// stream is expected to outlive any fixed deadline.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("tickstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(crate::error::Error::Transport)
    }

    /// Build a client suitable for long-lived streaming responses:
    /// connect timeout only, no overall request deadline.
    pub fn build_streaming_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .user_agent(concat!("tickstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(crate::error::Error::Transport)
    }
}
