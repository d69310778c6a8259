// ── TradeClient ──
//
// The typed wiring layer: binds each resource family (quotes, orders,
// positions, watchlist) to its backend endpoints, decoders, transports,
// and mutators, and hands out refcounted handles. This is the single
// replacement for the product's four ad-hoc live-sync implementations.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;

use tickstream_api::envelope::{
    Decoder, WATCHLIST_KEY, decode_order_frame, decode_position_frame, decode_quote_frame,
    decode_watchlist_frame,
};
use tickstream_api::frames::{Transport, TransportKind};
use tickstream_api::poll::PollTransport;
use tickstream_api::rest::{RestClient, join_path};
use tickstream_api::sse::SseTransport;
use tickstream_api::token::TokenProvider;
use tickstream_api::transport::TransportConfig;
use tickstream_api::ws::WsTransport;

use crate::config::{
    ClientConfig, POSITION_POLL_INTERVAL, SyncParams, WATCHLIST_POLL_INTERVAL,
};
use crate::error::{SyncError, mutation_error};
use crate::model::{Order, OrderDraft, OrderKind, Position, Quote, Watchlist};
use crate::resource::{Mutator, Registry, ResourceBuilder, ResourceHandle, SnapshotFn};

/// The main entry point for consumers.
///
/// Cheaply cloneable. Owns the REST client, the token provider, the
/// shared visibility signal, and one registry per resource family so
/// repeated opens with identical parameters share a transport.
#[derive(Clone)]
pub struct TradeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    rest: Arc<RestClient>,
    streaming_http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    visibility: watch::Sender<bool>,
    quotes: Registry<Quote>,
    orders: Registry<Order>,
    positions: Registry<Position>,
    watchlist: Registry<Watchlist>,
}

/// Where one resource family's streams live on the backend.
struct StreamEndpoints {
    /// Stream name under the WebSocket base (`quotes` -> `/ws/quotes`).
    ws_path: Option<&'static str>,
    /// Absolute SSE path on the HTTP origin.
    sse_path: Option<&'static str>,
    /// Absolute list endpoint for the polling transport.
    poll_path: &'static str,
    /// Subscription filter, encoded into every connection target.
    query: Vec<(String, String)>,
}

impl TradeClient {
    /// Build a client. Does not connect anything -- resources go live
    /// when first opened.
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, SyncError> {
        let transport = TransportConfig {
            timeout: config.timeout,
        };
        let rest = Arc::new(
            RestClient::new(config.http_base.clone(), &transport, Arc::clone(&tokens))
                .map_err(SyncError::from)?,
        );
        let streaming_http = transport
            .build_streaming_client()
            .map_err(SyncError::from)?;
        let (visibility, _) = watch::channel(true);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                rest,
                streaming_http,
                tokens,
                visibility,
                quotes: Registry::new(),
                orders: Registry::new(),
                positions: Registry::new(),
                watchlist: Registry::new(),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The underlying REST client, for endpoints outside the
    /// synchronizer's scope (auth, news, symbol search).
    pub fn rest(&self) -> &Arc<RestClient> {
        &self.inner.rest
    }

    // ── Visibility ───────────────────────────────────────────────────

    /// Report the hosting environment's visibility. While hidden,
    /// every resource closes its transport and schedules no
    /// reconnects; on becoming visible each restarts from its first
    /// preferred transport with a fresh retry budget.
    pub fn set_visible(&self, visible: bool) {
        let _ = self.inner.visibility.send(visible);
    }

    pub fn is_visible(&self) -> bool {
        *self.inner.visibility.borrow()
    }

    // ── Quotes ───────────────────────────────────────────────────────

    /// Open (or attach to) the live quotes resource for a symbol set.
    pub fn quotes(&self, symbols: &[&str]) -> Result<ResourceHandle<Quote>, SyncError> {
        self.quotes_with(symbols, SyncParams::default())
    }

    pub fn quotes_with(
        &self,
        symbols: &[&str],
        params: SyncParams,
    ) -> Result<ResourceHandle<Quote>, SyncError> {
        let symbols = normalize_symbols(symbols)?;
        let joined = symbols.join(",");
        let name = format!("quotes:{joined}");

        Ok(self.inner.quotes.open_or_attach(&name, &params, || {
            let endpoints = StreamEndpoints {
                ws_path: Some("quotes"),
                sse_path: Some("/api/stream/quotes"),
                poll_path: "/api/quotes",
                query: vec![("symbols".to_owned(), joined.clone())],
            };
            let decoder: Decoder = Arc::new(decode_quote_frame);

            ResourceBuilder::new(
                name.clone(),
                Arc::clone(&decoder),
                self.inner.visibility.subscribe(),
            )
            .params(params.clone())
            .transports(self.build_transports(&params, &endpoints))
            .snapshot(self.snapshot_fn("/api/quotes/initial", endpoints.query.clone(), decoder))
            .open()
        }))
    }

    // ── Orders ───────────────────────────────────────────────────────

    /// Open (or attach to) the live order book.
    pub fn orders(&self) -> ResourceHandle<Order> {
        self.orders_with(SyncParams::orders())
    }

    pub fn orders_with(&self, params: SyncParams) -> ResourceHandle<Order> {
        self.inner.orders.open_or_attach("orders", &params, || {
            let endpoints = StreamEndpoints {
                ws_path: None,
                sse_path: Some("/api/orders/stream"),
                poll_path: "/api/orders",
                query: Vec::new(),
            };
            let decoder: Decoder = Arc::new(decode_order_frame);

            let rest = Arc::clone(&self.inner.rest);
            let mutator: Mutator<Order> = Mutator {
                submit: Arc::new(move |draft: Value| {
                    let rest = Arc::clone(&rest);
                    Box::pin(async move { rest.post_json::<Order, _>("/api/orders", &draft).await })
                }),
                pending: Arc::new(pending_order),
            };

            ResourceBuilder::new(
                "orders",
                Arc::clone(&decoder),
                self.inner.visibility.subscribe(),
            )
            .params(params.clone())
            .transports(self.build_transports(&params, &endpoints))
            .snapshot(self.snapshot_fn(
                "/api/orders",
                vec![("limit".to_owned(), "100".to_owned())],
                decoder,
            ))
            .mutator(mutator)
            .open()
        })
    }

    /// Place an order through the live order book: validated, then
    /// optimistically inserted as PENDING, then reconciled against the
    /// server's response.
    pub async fn place_order(
        &self,
        orders: &ResourceHandle<Order>,
        draft: &OrderDraft,
    ) -> Result<Order, SyncError> {
        let draft = validate_draft(draft)?;
        orders.mutate(&draft).await
    }

    /// Cancel an order. On success the cached entry is removed; a
    /// failed cancellation leaves the cache untouched and surfaces the
    /// error.
    pub async fn cancel_order(
        &self,
        orders: &ResourceHandle<Order>,
        id: &str,
    ) -> Result<(), SyncError> {
        self.inner
            .rest
            .delete(&format!("/api/orders/{id}"))
            .await
            .map_err(mutation_error)?;
        orders.cache().remove(id);
        Ok(())
    }

    // ── Positions ────────────────────────────────────────────────────

    /// Open (or attach to) the portfolio positions resource. The
    /// backend has no positions push stream, so this is poll-only.
    pub fn positions(&self) -> ResourceHandle<Position> {
        self.positions_with(SyncParams::poll_only(POSITION_POLL_INTERVAL))
    }

    pub fn positions_with(&self, params: SyncParams) -> ResourceHandle<Position> {
        self.inner
            .positions
            .open_or_attach("positions", &params, || {
                let endpoints = StreamEndpoints {
                    ws_path: None,
                    sse_path: None,
                    poll_path: "/api/positions",
                    query: Vec::new(),
                };
                let decoder: Decoder = Arc::new(decode_position_frame);

                ResourceBuilder::new(
                    "positions",
                    Arc::clone(&decoder),
                    self.inner.visibility.subscribe(),
                )
                .params(params.clone())
                .transports(self.build_transports(&params, &endpoints))
                .snapshot(self.snapshot_fn("/api/positions", Vec::new(), decoder))
                .open()
            })
    }

    // ── Watchlist ────────────────────────────────────────────────────

    /// Open (or attach to) the watchlist: a scalar resource holding
    /// the user's symbol set under a single fixed key.
    pub fn watchlist(&self) -> ResourceHandle<Watchlist> {
        self.watchlist_with(SyncParams::poll_only(WATCHLIST_POLL_INTERVAL))
    }

    pub fn watchlist_with(&self, params: SyncParams) -> ResourceHandle<Watchlist> {
        self.inner
            .watchlist
            .open_or_attach("watchlist", &params, || {
                let endpoints = StreamEndpoints {
                    ws_path: None,
                    sse_path: None,
                    poll_path: "/api/watchlist",
                    query: Vec::new(),
                };
                let decoder: Decoder = Arc::new(decode_watchlist_frame);

                ResourceBuilder::new(
                    "watchlist",
                    Arc::clone(&decoder),
                    self.inner.visibility.subscribe(),
                )
                .params(params.clone())
                .transports(self.build_transports(&params, &endpoints))
                .snapshot(self.snapshot_fn("/api/watchlist", Vec::new(), decoder))
                .open()
            })
    }

    /// Replace the watchlist: optimistic local update, write-through
    /// to the server, rolled back if the write fails.
    pub async fn set_watchlist(
        &self,
        watchlist: &ResourceHandle<Watchlist>,
        symbols: Vec<String>,
    ) -> Result<(), SyncError> {
        let mut normalized = Vec::new();
        for symbol in symbols {
            let sym = symbol.trim().to_uppercase();
            if !sym.is_empty() && !normalized.contains(&sym) {
                normalized.push(sym);
            }
        }

        let previous = watchlist.get(WATCHLIST_KEY);
        watchlist.cache().upsert_entity(Watchlist {
            symbols: normalized.clone(),
        });

        let body = serde_json::json!({ "symbols": normalized });
        match self
            .inner
            .rest
            .post_json::<Value, _>("/api/watchlist", &body)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                match previous {
                    Some(prev) => watchlist.cache().upsert_entity((*prev).clone()),
                    None => {
                        watchlist.cache().remove(WATCHLIST_KEY);
                    }
                }
                Err(mutation_error(e))
            }
        }
    }

    pub async fn add_watch_symbol(
        &self,
        watchlist: &ResourceHandle<Watchlist>,
        symbol: &str,
    ) -> Result<(), SyncError> {
        let current = watchlist
            .get(WATCHLIST_KEY)
            .map(|w| (*w).clone())
            .unwrap_or_default();
        let updated = current.with_symbol(symbol);
        if updated == current {
            return Ok(());
        }
        self.set_watchlist(watchlist, updated.symbols).await
    }

    pub async fn remove_watch_symbol(
        &self,
        watchlist: &ResourceHandle<Watchlist>,
        symbol: &str,
    ) -> Result<(), SyncError> {
        let current = watchlist
            .get(WATCHLIST_KEY)
            .map(|w| (*w).clone())
            .unwrap_or_default();
        self.set_watchlist(watchlist, current.without_symbol(symbol).symbols)
            .await
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Tear down every live resource, regardless of outstanding
    /// handles. Existing handles keep serving their (now frozen)
    /// caches.
    pub fn close(&self) {
        self.inner.quotes.close_all();
        self.inner.orders.close_all();
        self.inner.positions.close_all();
        self.inner.watchlist.close_all();
    }

    // ── Wiring helpers ───────────────────────────────────────────────

    /// Instantiate the preference list against this family's
    /// endpoints. Kinds the family has no endpoint for are skipped.
    fn build_transports(
        &self,
        params: &SyncParams,
        endpoints: &StreamEndpoints,
    ) -> Vec<Arc<dyn Transport>> {
        let inner = &self.inner;
        params
            .transport_preference
            .iter()
            .filter_map(|kind| match kind {
                TransportKind::WebSocket => endpoints.ws_path.map(|stream| {
                    let url = join_path(&inner.config.ws_base, stream);
                    Arc::new(WsTransport::new(
                        url,
                        endpoints.query.clone(),
                        Arc::clone(&inner.tokens),
                    )) as Arc<dyn Transport>
                }),
                TransportKind::Sse => endpoints.sse_path.map(|path| {
                    let url = join_path(&inner.config.http_base, path);
                    Arc::new(SseTransport::new(
                        inner.streaming_http.clone(),
                        url,
                        endpoints.query.clone(),
                        Arc::clone(&inner.tokens),
                    )) as Arc<dyn Transport>
                }),
                TransportKind::Polling => Some(Arc::new(PollTransport::new(
                    Arc::clone(&inner.rest),
                    endpoints.poll_path,
                    endpoints.query.clone(),
                    params.poll_interval,
                )) as Arc<dyn Transport>),
            })
            .collect()
    }

    /// One-shot GET + decode, packaged for `fetch_snapshot`.
    fn snapshot_fn(
        &self,
        path: &'static str,
        query: Vec<(String, String)>,
        decoder: Decoder,
    ) -> SnapshotFn {
        let rest = Arc::clone(&self.inner.rest);
        Arc::new(move || {
            let rest = Arc::clone(&rest);
            let query = query.clone();
            let decoder = Arc::clone(&decoder);
            Box::pin(async move {
                let pairs: Vec<(&str, String)> =
                    query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
                let body = rest.get_text(path, &pairs).await?;
                decoder(&body).map_err(|e| tickstream_api::Error::Deserialization {
                    message: e.to_string(),
                    body,
                })
            })
        })
    }
}

// ── Free helpers ─────────────────────────────────────────────────────

/// Uppercase, trim, and deduplicate a symbol filter. An empty result
/// is an `InvalidParameters` error: the quotes stream requires at
/// least one filter key.
fn normalize_symbols(symbols: &[&str]) -> Result<Vec<String>, SyncError> {
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let sym = symbol.trim().to_uppercase();
        if !sym.is_empty() && !out.contains(&sym) {
            out.push(sym);
        }
    }
    if out.is_empty() {
        return Err(SyncError::invalid(
            "quotes subscription requires at least one symbol",
        ));
    }
    Ok(out)
}

/// Local validation before any network attempt.
fn validate_draft(draft: &OrderDraft) -> Result<OrderDraft, SyncError> {
    let symbol = draft.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(SyncError::invalid("order draft requires a symbol"));
    }
    if draft.qty == 0 {
        return Err(SyncError::invalid("order qty must be positive"));
    }
    match (draft.kind, draft.limit_price) {
        (OrderKind::Limit, None) => Err(SyncError::invalid("limit order requires a limit price")),
        (OrderKind::Limit, Some(price)) if price <= 0.0 => {
            Err(SyncError::invalid("limit price must be positive"))
        }
        _ => Ok(OrderDraft {
            symbol,
            ..draft.clone()
        }),
    }
}

/// Build the optimistic PENDING order from a draft.
fn pending_order(draft: &Value, local_id: &str) -> Option<Order> {
    let mut obj = draft.as_object()?.clone();
    obj.insert("id".to_owned(), Value::String(local_id.to_owned()));
    obj.insert("status".to_owned(), Value::String("PENDING".to_owned()));
    obj.insert(
        "createdAt".to_owned(),
        serde_json::to_value(Utc::now()).ok()?,
    );
    serde_json::from_value(Value::Object(obj)).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Side;

    #[test]
    fn symbols_are_normalized_and_deduped() {
        let symbols = normalize_symbols(&["aapl", " TSLA ", "AAPL", ""]).unwrap();
        assert_eq!(symbols, vec!["AAPL".to_owned(), "TSLA".to_owned()]);
    }

    #[test]
    fn empty_symbol_filter_is_invalid() {
        let err = normalize_symbols(&[]).unwrap_err();
        assert!(matches!(err, SyncError::InvalidParameters { .. }));

        let err = normalize_symbols(&["", "  "]).unwrap_err();
        assert!(matches!(err, SyncError::InvalidParameters { .. }));
    }

    #[test]
    fn draft_validation() {
        let ok = validate_draft(&OrderDraft::market("aapl", Side::Buy, 10)).unwrap();
        assert_eq!(ok.symbol, "AAPL");

        assert!(validate_draft(&OrderDraft::market("", Side::Buy, 10)).is_err());
        assert!(validate_draft(&OrderDraft::market("AAPL", Side::Buy, 0)).is_err());

        let mut limit_without_price = OrderDraft::limit("AAPL", Side::Sell, 5, 100.0);
        limit_without_price.limit_price = None;
        assert!(validate_draft(&limit_without_price).is_err());
    }

    #[test]
    fn pending_order_from_draft() {
        let draft = serde_json::to_value(OrderDraft::limit("AAPL", Side::Buy, 5, 170.0)).unwrap();
        let order = pending_order(&draft, "local-123").unwrap();

        assert_eq!(order.id, "local-123");
        assert_eq!(order.status, crate::model::OrderStatus::Pending);
        assert_eq!(order.qty, 5);
        assert_eq!(order.limit_price, Some(170.0));
        assert!(order.created_at.is_some());
    }
}
