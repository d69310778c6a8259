// WebSocket transport.
//
// Opens one connection to the quotes WebSocket endpoint with the
// subscription filter and bearer credential encoded into the URL, and
// yields text frames until the socket drops. Reconnection is the
// engine's job.

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use url::Url;

use crate::error::Error;
use crate::frames::{Frame, FrameStream, Transport, TransportKind};
use crate::token::{TokenProvider, append_access_token};

/// One-connection WebSocket source.
pub struct WsTransport {
    url: Url,
    query: Vec<(String, String)>,
    tokens: Arc<dyn TokenProvider>,
}

impl WsTransport {
    /// `url` is the full endpoint (e.g. `ws://host/ws/quotes`); `query`
    /// carries the subscription filter (e.g. `symbols=AAPL,TSLA`). The
    /// access token is appended at connect time so refreshed tokens are
    /// picked up between attempts.
    pub fn new(url: Url, query: Vec<(String, String)>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { url, query, tokens }
    }

    /// The connection URL for the next attempt.
    fn connect_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
        }
        append_access_token(&mut url, self.tokens.as_ref());
        url
    }
}

impl Transport for WsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn connect(&self) -> BoxFuture<'static, Result<FrameStream, Error>> {
        let url = self.connect_url();

        Box::pin(async move {
            tracing::debug!(url = %redacted(&url), "connecting WebSocket");

            let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
                |e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()),
            )?;
            let request = ClientRequestBuilder::new(uri);

            let (mut ws, _response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

            let stream: FrameStream = Box::pin(try_stream! {
                loop {
                    match ws.next().await {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            yield Frame::Text(text.to_string());
                        }
                        Some(Ok(tungstenite::Message::Ping(_)))
                        | Some(Ok(tungstenite::Message::Pong(_))) => {
                            // tungstenite answers pings itself; surface
                            // them only as liveness.
                            yield Frame::KeepAlive;
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            if let Some(ref cf) = frame {
                                tracing::debug!(code = %cf.code, reason = %cf.reason, "WebSocket close frame");
                            }
                            break;
                        }
                        Some(Ok(_)) => {
                            // Binary and raw frames are not part of the protocol.
                        }
                        Some(Err(e)) => {
                            Err(Error::WebSocketConnect(e.to_string()))?;
                        }
                        None => break,
                    }
                }
            });

            Ok(stream)
        })
    }
}

/// Strip the access token from a URL for logging.
fn redacted(url: &Url) -> Url {
    let mut clean = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "access_token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    clean.set_query(None);
    if !pairs.is_empty() {
        let mut qp = clean.query_pairs_mut();
        for (k, v) in &pairs {
            qp.append_pair(k, v);
        }
    }
    clean
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::token::MemoryTokenStore;

    #[test]
    fn connect_url_carries_filter_and_token() {
        let tokens = Arc::new(MemoryTokenStore::with_token("tok"));
        let transport = WsTransport::new(
            "ws://localhost:8080/ws/quotes".parse().unwrap(),
            vec![("symbols".into(), "AAPL,TSLA".into())],
            tokens,
        );

        let url = transport.connect_url();
        let query = url.query().unwrap();
        assert!(query.contains("symbols=AAPL%2CTSLA"));
        assert!(query.contains("access_token=tok"));
    }

    #[test]
    fn refreshed_token_is_used_on_next_connect() {
        let store = Arc::new(MemoryTokenStore::with_token("old"));
        let transport = WsTransport::new(
            "ws://localhost:8080/ws/quotes".parse().unwrap(),
            Vec::new(),
            Arc::clone(&store) as Arc<dyn TokenProvider>,
        );

        assert!(transport.connect_url().query().unwrap().contains("old"));
        store.set("new");
        assert!(transport.connect_url().query().unwrap().contains("new"));
    }

    #[test]
    fn redaction_drops_only_the_token() {
        let url: Url = "ws://h/ws/quotes?symbols=AAPL&access_token=secret"
            .parse()
            .unwrap();
        let clean = redacted(&url);
        assert!(clean.query().unwrap().contains("symbols=AAPL"));
        assert!(!clean.as_str().contains("secret"));
    }
}
