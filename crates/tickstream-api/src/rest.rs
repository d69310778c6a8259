// REST client for the trading backend.
//
// Wraps `reqwest::Client` with base-URL joining, bearer-token injection
// from the TokenProvider, and `{ message }` error-body unwrapping. All
// methods return decoded payloads -- callers never see raw responses.

use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::token::TokenProvider;
use crate::transport::TransportConfig;

/// Shape of the backend's error responses: `{ "message": "..." }`.
#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// HTTP client for the backend's REST surface.
///
/// The base URL is the server origin (e.g. `http://localhost:8080`);
/// endpoint paths are absolute (`/api/orders`). Every request carries
/// `Authorization: Bearer <token>` when the token provider yields one.
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl RestClient {
    /// Create a new client from a `TransportConfig`.
    pub fn new(
        base: Url,
        transport: &TransportConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base, tokens })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn from_reqwest(base: Url, http: reqwest::Client, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { http, base, tokens }
    }

    /// The server origin this client talks to.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// The token provider backing this client.
    pub fn tokens(&self) -> &Arc<dyn TokenProvider> {
        &self.tokens
    }

    // ── URL construction ─────────────────────────────────────────────

    /// Build a full URL for an absolute endpoint path plus query pairs.
    pub fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Url {
        let mut url = join_path(&self.base, path);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        url
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// GET an endpoint and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        let body = self.get_text(path, query).await?;
        decode_body(&body)
    }

    /// GET an endpoint and return the raw response body.
    ///
    /// Used by the polling transport and snapshot fetches, which hand
    /// the body to a resource-specific envelope decoder instead of a
    /// fixed type.
    pub async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<String, Error> {
        let url = self.endpoint(path, query);
        debug!("GET {url}");

        let req = self.authorize(self.http.get(url));
        let resp = req.send().await.map_err(Error::Transport)?;
        Self::read_body(resp).await
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.endpoint(path, &[]);
        debug!("POST {url}");

        let req = self.authorize(self.http.post(url)).json(body);
        let resp = req.send().await.map_err(Error::Transport)?;
        let text = Self::read_body(resp).await?;
        decode_body(&text)
    }

    /// DELETE an endpoint, discarding any response body.
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        let url = self.endpoint(path, &[]);
        debug!("DELETE {url}");

        let req = self.authorize(self.http.delete(url));
        let resp = req.send().await.map_err(Error::Transport)?;
        Self::read_body(resp).await.map(|_| ())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.access_token() {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }

    /// Check the status and return the body text, unwrapping the
    /// backend's `{ message }` error shape on non-2xx responses.
    async fn read_body(resp: reqwest::Response) -> Result<String, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: error_message(&body)
                    .unwrap_or_else(|| "token expired or invalid".to_owned()),
            });
        }

        if !status.is_success() {
            return Err(Error::Api {
                message: error_message(&body).unwrap_or_else(|| status.to_string()),
                status: status.as_u16(),
            });
        }

        Ok(body)
    }
}

/// Join an absolute endpoint path onto a base URL, preserving any path
/// prefix the base carries.
pub fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    url
}

fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    serde_json::from_str(body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: body.to_owned(),
    })
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn join_preserves_base_prefix() {
        let base: Url = "http://localhost:8080".parse().unwrap();
        let url = join_path(&base, "/api/orders");
        assert_eq!(url.as_str(), "http://localhost:8080/api/orders");

        let prefixed: Url = "http://example.com/backend".parse().unwrap();
        let url = join_path(&prefixed, "/api/quotes");
        assert_eq!(url.as_str(), "http://example.com/backend/api/quotes");
    }

    #[test]
    fn error_message_extraction() {
        assert_eq!(
            error_message(r#"{"message":"qty must be positive"}"#).as_deref(),
            Some("qty must be positive")
        );
        assert!(error_message("not json").is_none());
        assert!(error_message(r#"{"code":42}"#).is_none());
    }
}
