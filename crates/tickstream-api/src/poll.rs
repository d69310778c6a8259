// Polling transport.
//
// The fallback of last resort: a periodic GET of the resource's list
// endpoint, each body surfaced as one text frame for the resource
// decoder to fold into the cache. The first fetch happens inside
// `connect`, so "open" means the endpoint actually answered -- a dead
// server fails the connect attempt instead of producing a silently
// idle stream.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures_util::future::BoxFuture;

use crate::error::Error;
use crate::frames::{Frame, FrameStream, Transport, TransportKind};
use crate::rest::RestClient;

/// Periodic-GET frame source.
pub struct PollTransport {
    rest: Arc<RestClient>,
    path: String,
    query: Vec<(String, String)>,
    interval: Duration,
}

impl PollTransport {
    pub fn new(
        rest: Arc<RestClient>,
        path: impl Into<String>,
        query: Vec<(String, String)>,
        interval: Duration,
    ) -> Self {
        Self {
            rest,
            path: path.into(),
            query,
            interval,
        }
    }

    async fn fetch(rest: &RestClient, path: &str, query: &[(String, String)]) -> Result<String, Error> {
        let pairs: Vec<(&str, String)> =
            query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        rest.get_text(path, &pairs).await
    }
}

impl Transport for PollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn connect(&self) -> BoxFuture<'static, Result<FrameStream, Error>> {
        let rest = Arc::clone(&self.rest);
        let path = self.path.clone();
        let query = self.query.clone();
        let interval = self.interval;

        Box::pin(async move {
            // Eager first fetch: this is the "open" of the poll loop.
            let first = Self::fetch(&rest, &path, &query).await?;
            tracing::debug!(path = %path, "polling transport started");

            let stream: FrameStream = Box::pin(try_stream! {
                yield Frame::Text(first);

                loop {
                    tokio::time::sleep(interval).await;
                    let body = Self::fetch(&rest, &path, &query).await?;
                    yield Frame::Text(body);
                }
            });

            Ok(stream)
        })
    }
}
