// ── Domain model ──
//
// Entities mirrored from the backend DTOs. Field names follow the wire
// format (camelCase) via serde renames; ids and timestamps are lenient
// on input because the backend mixes numeric and string encodings.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// An entity that knows its cache key.
pub trait Keyed {
    fn key(&self) -> String;
}

// ── Quote ────────────────────────────────────────────────────────────

/// A live price tick for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub change_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    /// Tick timestamp; the backend sends epoch millis on the stream
    /// and RFC 3339 on some snapshots.
    #[serde(default, deserialize_with = "de_flexible_ts")]
    pub ts: Option<DateTime<Utc>>,
}

impl Keyed for Quote {
    fn key(&self) -> String {
        self.symbol.clone()
    }
}

// ── Order ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Optimistic local entry awaiting server confirmation.
    Pending,
    Accepted,
    Open,
    Filled,
    Rejected,
    Cancelled,
}

/// An order as the backend reports it.
///
/// `id` is a string: the server assigns numeric ids (stringified on
/// decode), optimistic local entries use `local-<uuid>` until the
/// server's entity replaces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(deserialize_with = "de_flexible_id")]
    pub id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub qty: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Keyed for Order {
    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Draft of an order to place. Serializes to the POST body shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub qty: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
}

impl OrderDraft {
    pub fn market(symbol: impl Into<String>, side: Side, qty: u32) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            qty,
            limit_price: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, qty: u32, limit_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Limit,
            qty,
            limit_price: Some(limit_price),
        }
    }
}

// ── Position ─────────────────────────────────────────────────────────

/// A portfolio holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    #[serde(rename = "avg")]
    pub avg_price: f64,
    #[serde(default, rename = "price", skip_serializing_if = "Option::is_none")]
    pub last_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
}

impl Keyed for Position {
    fn key(&self) -> String {
        self.symbol.clone()
    }
}

// ── Watchlist ────────────────────────────────────────────────────────

/// The user's watchlist: a scalar resource holding the symbol set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watchlist {
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Watchlist {
    /// Normalized insert: uppercase, trimmed, deduplicated, new
    /// symbols first (matching the product's add-to-top behavior).
    pub fn with_symbol(&self, symbol: &str) -> Self {
        let sym = symbol.trim().to_uppercase();
        if sym.is_empty() || self.symbols.contains(&sym) {
            return self.clone();
        }
        let mut symbols = Vec::with_capacity(self.symbols.len() + 1);
        symbols.push(sym);
        symbols.extend(self.symbols.iter().cloned());
        Self { symbols }
    }

    pub fn without_symbol(&self, symbol: &str) -> Self {
        let sym = symbol.trim().to_uppercase();
        Self {
            symbols: self
                .symbols
                .iter()
                .filter(|s| **s != sym)
                .cloned()
                .collect(),
        }
    }
}

impl Keyed for Watchlist {
    fn key(&self) -> String {
        tickstream_api::envelope::WATCHLIST_KEY.to_owned()
    }
}

// ── Lenient deserializers ────────────────────────────────────────────

/// Accept an id as either a JSON number or a string.
fn de_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "id must be a string or number, got {other}"
        ))),
    }
}

/// Accept a timestamp as epoch millis, an RFC 3339 string, or null.
fn de_flexible_ts<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))?;
            Ok(Utc.timestamp_millis_opt(millis).single())
        }
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "timestamp must be millis or RFC 3339, got {other}"
        ))),
    }
}
