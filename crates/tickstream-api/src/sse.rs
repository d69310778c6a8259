// Server-sent events transport.
//
// One streaming GET with `Accept: text/event-stream`, parsed
// incrementally into frames. `ping` events and comment lines surface
// as keep-alives; everything else is handed to the resource decoder.

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use url::Url;

use crate::error::Error;
use crate::frames::{Frame, FrameStream, Transport, TransportKind};
use crate::token::{TokenProvider, append_access_token};

/// One-connection SSE source over a shared streaming `reqwest::Client`.
pub struct SseTransport {
    http: reqwest::Client,
    url: Url,
    query: Vec<(String, String)>,
    tokens: Arc<dyn TokenProvider>,
}

impl SseTransport {
    pub fn new(
        http: reqwest::Client,
        url: Url,
        query: Vec<(String, String)>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http,
            url,
            query,
            tokens,
        }
    }

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

impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn connect(&self) -> BoxFuture<'static, Result<FrameStream, Error>> {
        let http = self.http.clone();
        let url = self.connect_url();

        Box::pin(async move {
            tracing::debug!(path = url.path(), "connecting SSE");

            let resp = http
                .get(url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await
                .map_err(|e| Error::SseConnect(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(Error::SseConnect(format!("HTTP {status}")));
            }

            let mut body = Box::pin(resp.bytes_stream());

            let stream: FrameStream = Box::pin(try_stream! {
                let mut parser = EventParser::default();

                while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(|e| Error::SseConnect(e.to_string()))?;
                    for frame in parser.push(&chunk) {
                        yield frame;
                    }
                }
            });

            Ok(stream)
        })
    }
}

/// Incremental `text/event-stream` parser.
///
/// Handles the subset the backend emits: `data:` lines (possibly
/// multi-line), `event:` names, and `:` comments. An empty line
/// dispatches the accumulated event.
#[derive(Default)]
struct EventParser {
    buffer: String,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl EventParser {
    /// Feed a chunk of the response body; returns completed frames.
    fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim_start().to_owned());
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event_name = Some(rest.trim().to_owned());
            } else if line.starts_with(':') {
                // Comment line: many servers use these as keep-alives.
                frames.push(Frame::KeepAlive);
            }
            // `id:` and `retry:` fields are ignored.
        }
        frames
    }

    /// Finish the current event, if it accumulated anything.
    fn dispatch(&mut self) -> Option<Frame> {
        let name = self.event_name.take();
        let data = std::mem::take(&mut self.data_lines).join("\n");

        if data.is_empty() {
            return None;
        }
        if name.as_deref() == Some("ping") {
            return Some(Frame::KeepAlive);
        }
        Some(Frame::Text(data))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn single_event() {
        let mut parser = EventParser::default();
        let frames = parser.push(b"data: {\"type\":\"UPSERT\"}\n\n");
        assert_eq!(frames, vec![Frame::Text("{\"type\":\"UPSERT\"}".into())]);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut parser = EventParser::default();
        assert!(parser.push(b"data: {\"sym").is_empty());
        assert!(parser.push(b"bol\":\"AAPL\"}").is_empty());
        let frames = parser.push(b"\n\n");
        assert_eq!(frames, vec![Frame::Text("{\"symbol\":\"AAPL\"}".into())]);
    }

    #[test]
    fn multi_line_data_joined() {
        let mut parser = EventParser::default();
        let frames = parser.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(frames, vec![Frame::Text("line1\nline2".into())]);
    }

    #[test]
    fn ping_event_is_keepalive() {
        let mut parser = EventParser::default();
        let frames = parser.push(b"event: ping\ndata: ok\n\n");
        assert_eq!(frames, vec![Frame::KeepAlive]);
    }

    #[test]
    fn comment_is_keepalive() {
        let mut parser = EventParser::default();
        let frames = parser.push(b": keep-alive\n");
        assert_eq!(frames, vec![Frame::KeepAlive]);
    }

    #[test]
    fn crlf_lines_are_handled() {
        let mut parser = EventParser::default();
        let frames = parser.push(b"data: x\r\n\r\n");
        assert_eq!(frames, vec![Frame::Text("x".into())]);
    }

    #[test]
    fn empty_line_without_data_is_silent() {
        let mut parser = EventParser::default();
        assert!(parser.push(b"\n\n\n").is_empty());
    }
}
