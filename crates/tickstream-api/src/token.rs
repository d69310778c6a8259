// Pluggable access-token source.
//
// The synchronizer never reads ambient storage for credentials; it is
// handed a TokenProvider at construction time. REST requests attach the
// token as a bearer header, streaming connections as an `access_token`
// query parameter (the backend's handshake filter converts it back into
// an Authorization header).

use arc_swap::ArcSwapOption;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Source of the current access token.
///
/// Implementations own storage and refresh; the transport layer only
/// ever asks "what is the token right now?". Returning `None` means
/// requests go out unauthenticated.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Option<SecretString>;
}

/// Provider with no token -- for public endpoints and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoToken;

impl TokenProvider for NoToken {
    fn access_token(&self) -> Option<SecretString> {
        None
    }
}

/// A fixed token, set once at construction.
pub struct StaticToken(SecretString);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Option<SecretString> {
        Some(self.0.clone())
    }
}

/// In-memory token store with lock-free replacement.
///
/// Mirrors the login/refresh/logout lifecycle: `set` after a login or a
/// refresh, `clear` on logout or a terminal 401. Reads are wait-free so
/// every in-flight request sees a consistent token.
#[derive(Default)]
pub struct MemoryTokenStore {
    current: ArcSwapOption<SecretString>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(token);
        store
    }

    /// Replace the current token.
    pub fn set(&self, token: impl Into<String>) {
        self.current
            .store(Some(std::sync::Arc::new(SecretString::from(token.into()))));
    }

    /// Drop the current token; subsequent requests go out unauthenticated.
    pub fn clear(&self) {
        self.current.store(None);
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }
}

impl TokenProvider for MemoryTokenStore {
    fn access_token(&self) -> Option<SecretString> {
        self.current.load_full().map(|t| t.as_ref().clone())
    }
}

/// Append `access_token=<token>` to a streaming connection URL, if a
/// token is available. Leaves the URL untouched otherwise.
pub fn append_access_token(url: &mut Url, tokens: &dyn TokenProvider) {
    if let Some(token) = tokens.access_token() {
        url.query_pairs_mut()
            .append_pair("access_token", token.expose_secret());
    }
}
