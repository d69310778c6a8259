// Wire-envelope decoding.
//
// Every streaming endpoint ultimately emits the same thing: an
// instruction to upsert or delete one cache entry. The frame shapes
// differ per resource (`QUOTE` ticks, `UPSERT`/`DELETE` order events,
// bare snapshot arrays from the polling endpoints), so each resource
// supplies a decoder and the engine stays format-agnostic.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// What to do with one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Upsert,
    Delete,
}

/// A decoded update instruction for one keyed entry.
///
/// For `Upsert`, `payload` is a JSON object whose fields are merged
/// over the existing entry (absent fields are preserved). For
/// `Delete`, `payload` is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub key: String,
    pub payload: Value,
}

impl Envelope {
    pub fn upsert(key: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: EnvelopeKind::Upsert,
            key: key.into(),
            payload,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Delete,
            key: key.into(),
            payload: Value::Null,
        }
    }
}

/// A frame that could not be interpreted. Never fatal: the engine logs
/// it at debug level and drops the frame.
#[derive(Debug, Error)]
#[error("malformed frame: {message}")]
pub struct DecodeError {
    pub message: String,
}

impl DecodeError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Resource-specific frame decoder. An empty result is valid -- the
/// frame was a recognized keep-alive and only refreshes liveness.
pub type Decoder = Arc<dyn Fn(&str) -> Result<Vec<Envelope>, DecodeError> + Send + Sync>;

// ── Quote frames ─────────────────────────────────────────────────────

/// Decode a quotes-stream frame.
///
/// Accepts every shape the backend produces for quotes:
/// - `{ "type": "QUOTE", "symbol": "AAPL", ... }` (WS/SSE tick)
/// - `{ "type": "DELETE", "symbol": "AAPL" }` (symbol dropped)
/// - `{ "AAPL": {...}, "TSLA": {...} }` (initial snapshot object)
/// - `[ { "symbol": "AAPL", ... }, ... ]` (polling endpoint array)
/// - `{ "type": "PING" }` / `{ "type": "PONG" }` (keep-alive, empty)
pub fn decode_quote_frame(text: &str) -> Result<Vec<Envelope>, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::new(e.to_string()))?;

    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| {
                let symbol = item.get("symbol")?.as_str()?.to_owned();
                Some(Envelope::upsert(symbol, item))
            })
            .collect()),

        Value::Object(map) => {
            let frame_type = map.get("type").and_then(Value::as_str).map(str::to_owned);
            match frame_type.as_deref() {
                Some("PING" | "PONG") => return Ok(Vec::new()),
                Some("QUOTE" | "UPSERT") => {
                    let symbol = map
                        .get("symbol")
                        .and_then(Value::as_str)
                        .ok_or_else(|| DecodeError::new("quote frame without symbol"))?
                        .to_owned();
                    return Ok(vec![Envelope::upsert(symbol, Value::Object(map))]);
                }
                Some("DELETE") => {
                    let symbol = map
                        .get("symbol")
                        .and_then(Value::as_str)
                        .ok_or_else(|| DecodeError::new("delete frame without symbol"))?
                        .to_owned();
                    return Ok(vec![Envelope::delete(symbol)]);
                }
                Some(other) => {
                    return Err(DecodeError::new(format!("unknown frame type {other:?}")));
                }
                None => {}
            }

            // No discriminator: a snapshot object of symbol -> quote.
            Ok(map
                .into_iter()
                .filter(|(_, quote)| quote.is_object())
                .map(|(symbol, mut quote)| {
                    // Snapshot values omit the symbol field; fill it in
                    // so the merged entry deserializes on its own.
                    if let Some(obj) = quote.as_object_mut() {
                        obj.entry("symbol".to_owned())
                            .or_insert_with(|| Value::String(symbol.clone()));
                    }
                    Envelope::upsert(symbol, quote)
                })
                .collect())
        }

        _ => Err(DecodeError::new("expected a JSON object or array")),
    }
}

// ── Order frames ─────────────────────────────────────────────────────

/// Decode an orders-stream frame.
///
/// Accepts:
/// - `{ "type": "UPSERT", "order": {...} }` (SSE event)
/// - `{ "type": "DELETE", "id": 7 }` (cancellation)
/// - `[ {...}, ... ]` (polling/snapshot array, keyed by id)
/// - `{ "id": 7, ... }` (a bare entity)
/// - `ok` heartbeat payloads and `PING` frames (keep-alive, empty)
pub fn decode_order_frame(text: &str) -> Result<Vec<Envelope>, DecodeError> {
    // The orders SSE endpoint sends `data: ok` pings.
    if text.trim() == "ok" {
        return Ok(Vec::new());
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::new(e.to_string()))?;

    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| {
                let key = entity_key(item.get("id")?)?;
                Some(Envelope::upsert(key, item))
            })
            .collect()),

        Value::Object(map) => {
            let frame_type = map.get("type").and_then(Value::as_str).map(str::to_owned);
            match frame_type.as_deref() {
                Some("PING" | "PONG") => Ok(Vec::new()),
                Some("UPSERT") => {
                    let order = map
                        .get("order")
                        .cloned()
                        .ok_or_else(|| DecodeError::new("UPSERT frame without order"))?;
                    let key = order
                        .get("id")
                        .and_then(entity_key)
                        .ok_or_else(|| DecodeError::new("order without id"))?;
                    Ok(vec![Envelope::upsert(key, order)])
                }
                Some("DELETE") => {
                    let key = map
                        .get("id")
                        .and_then(entity_key)
                        .ok_or_else(|| DecodeError::new("DELETE frame without id"))?;
                    Ok(vec![Envelope::delete(key)])
                }
                Some(other) => {
                    Err(DecodeError::new(format!("unknown frame type {other:?}")))
                }
                None => {
                    let key = map
                        .get("id")
                        .and_then(entity_key)
                        .ok_or_else(|| DecodeError::new("order without id"))?;
                    Ok(vec![Envelope::upsert(key, Value::Object(map))])
                }
            }
        }

        _ => Err(DecodeError::new("expected a JSON object or array")),
    }
}

// ── Position / watchlist frames ──────────────────────────────────────

/// Decode a positions snapshot: an array of holdings keyed by symbol.
pub fn decode_position_frame(text: &str) -> Result<Vec<Envelope>, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::new(e.to_string()))?;

    let Value::Array(items) = value else {
        return Err(DecodeError::new("expected a positions array"));
    };

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let symbol = item.get("symbol")?.as_str()?.to_owned();
            Some(Envelope::upsert(symbol, item))
        })
        .collect())
}

/// Fixed cache key for the watchlist scalar resource.
pub const WATCHLIST_KEY: &str = "watchlist";

/// Decode the watchlist: either a bare `["AAPL", ...]` array or a
/// `{ "symbols": [...] }` object, normalized into a single scalar entry.
pub fn decode_watchlist_frame(text: &str) -> Result<Vec<Envelope>, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::new(e.to_string()))?;

    let symbols = match value {
        Value::Array(_) => value,
        Value::Object(ref map) => map
            .get("symbols")
            .cloned()
            .ok_or_else(|| DecodeError::new("watchlist object without symbols"))?,
        _ => return Err(DecodeError::new("expected a watchlist array or object")),
    };

    Ok(vec![Envelope::upsert(
        WATCHLIST_KEY,
        serde_json::json!({ "symbols": symbols }),
    )])
}

/// Stringify an entity id that may arrive as a JSON number or string.
fn entity_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn quote_tick_frame() {
        let frame = r#"{"type":"QUOTE","symbol":"AAPL","price":101.23,"changePct":1.2,"ts":1000}"#;
        let envelopes = decode_quote_frame(frame).unwrap();

        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind, EnvelopeKind::Upsert);
        assert_eq!(envelopes[0].key, "AAPL");
        assert_eq!(envelopes[0].payload["price"], json!(101.23));
    }

    #[test]
    fn quote_snapshot_object() {
        let frame = r#"{"AAPL":{"price":100.0,"changePct":0.0,"ts":1000},"TSLA":{"price":250.0,"changePct":-0.5,"ts":1000}}"#;
        let mut envelopes = decode_quote_frame(frame).unwrap();
        envelopes.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].key, "AAPL");
        // Symbol is filled in from the map key.
        assert_eq!(envelopes[0].payload["symbol"], json!("AAPL"));
        assert_eq!(envelopes[1].key, "TSLA");
    }

    #[test]
    fn quote_polling_array() {
        let frame = r#"[{"symbol":"AAPL","price":99.5},{"symbol":"MSFT","price":410.0}]"#;
        let envelopes = decode_quote_frame(frame).unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[1].key, "MSFT");
    }

    #[test]
    fn quote_ping_is_empty() {
        assert!(decode_quote_frame(r#"{"type":"PING"}"#).unwrap().is_empty());
    }

    #[test]
    fn quote_malformed_is_error() {
        assert!(decode_quote_frame("not json at all").is_err());
        assert!(decode_quote_frame(r#"{"type":"QUOTE"}"#).is_err());
        assert!(decode_quote_frame("42").is_err());
    }

    #[test]
    fn order_upsert_and_delete() {
        let upsert = r#"{"type":"UPSERT","order":{"id":7,"symbol":"AAPL","side":"BUY","type":"MARKET","qty":10,"status":"OPEN"}}"#;
        let envelopes = decode_order_frame(upsert).unwrap();
        assert_eq!(envelopes[0].kind, EnvelopeKind::Upsert);
        assert_eq!(envelopes[0].key, "7");

        let delete = r#"{"type":"DELETE","id":7}"#;
        let envelopes = decode_order_frame(delete).unwrap();
        assert_eq!(envelopes[0].kind, EnvelopeKind::Delete);
        assert_eq!(envelopes[0].key, "7");
    }

    #[test]
    fn order_snapshot_array_keys_by_id() {
        let frame = r#"[{"id":1,"symbol":"AAPL"},{"id":"local-x","symbol":"TSLA"}]"#;
        let envelopes = decode_order_frame(frame).unwrap();
        assert_eq!(envelopes[0].key, "1");
        assert_eq!(envelopes[1].key, "local-x");
    }

    #[test]
    fn order_sse_ping_payload_is_empty() {
        assert!(decode_order_frame("ok").unwrap().is_empty());
    }

    #[test]
    fn positions_keyed_by_symbol() {
        let frame = r#"[{"symbol":"AAPL","qty":10,"avg":150.0},{"symbol":"TSLA","qty":2,"avg":250.0}]"#;
        let envelopes = decode_position_frame(frame).unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].key, "AAPL");
    }

    #[test]
    fn watchlist_array_and_object_normalize() {
        let from_array = decode_watchlist_frame(r#"["AAPL","TSLA"]"#).unwrap();
        let from_object = decode_watchlist_frame(r#"{"symbols":["AAPL","TSLA"]}"#).unwrap();

        assert_eq!(from_array, from_object);
        assert_eq!(from_array[0].key, WATCHLIST_KEY);
        assert_eq!(from_array[0].payload["symbols"], json!(["AAPL", "TSLA"]));
    }
}
