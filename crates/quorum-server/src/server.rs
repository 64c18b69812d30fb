//! HTTP server implementation using axum.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use quorum_core::Symbol;
use quorum_router::{RouteDecision, RouterError};
use quorum_telemetry::Metrics;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::publisher::PublishedFrame;
use crate::state::ServerState;
use crate::types::{
    ApiError, ClientMessage, PriceMap, PriceView, PricesResponse, RouteRequest, StreamMessage,
    TwapResponse,
};

/// Caps concurrent streaming connections.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    limiter: self.clone(),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

/// Holds one connection slot until dropped.
pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

#[derive(Clone)]
struct AppState {
    inner: ServerState,
    limiter: Arc<ConnectionLimiter>,
}

/// JSON error response with a stable code.
struct ApiFailure(StatusCode, ApiError);

impl ApiFailure {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self(
            status,
            ApiError {
                code: code.to_string(),
                message: message.into(),
            },
        )
    }

    fn unknown_symbol(raw: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "unknown_symbol",
            format!("symbol {raw} is not tracked"),
        )
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

impl From<RouterError> for ApiFailure {
    fn from(e: RouterError) -> Self {
        let status = match e {
            RouterError::NoLiquidity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RouterError::InvalidSize(_) => StatusCode::BAD_REQUEST,
            RouterError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.code(), e.to_string())
    }
}

/// Create the axum router.
pub fn create_router(state: ServerState, config: &ServerConfig) -> axum::Router {
    let state = AppState {
        inner: state,
        limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
    };
    axum::Router::new()
        .route("/prices", get(get_prices))
        .route("/prices/{symbol}", get(get_price))
        .route("/prices/{symbol}/twap", get(get_twap))
        .route("/route", post(post_route))
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn tracked_symbol(state: &AppState, raw: &str) -> Result<Symbol, ApiFailure> {
    Symbol::new(raw)
        .ok()
        .filter(|s| state.inner.aggregator.is_tracked(s))
        .ok_or_else(|| ApiFailure::unknown_symbol(raw))
}

async fn get_prices(State(state): State<AppState>) -> Json<PricesResponse> {
    Json(state.inner.prices())
}

async fn get_price(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<PriceView>, ApiFailure> {
    let symbol = tracked_symbol(&state, &raw)?;
    state
        .inner
        .price(&symbol)
        .map(Json)
        .ok_or_else(|| ApiFailure::unknown_symbol(&raw))
}

#[derive(Debug, Deserialize)]
struct TwapQuery {
    #[serde(default = "default_twap_period_ms")]
    period_ms: u64,
}

fn default_twap_period_ms() -> u64 {
    60_000
}

async fn get_twap(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Query(query): Query<TwapQuery>,
) -> Result<Json<TwapResponse>, ApiFailure> {
    let symbol = tracked_symbol(&state, &raw)?;
    let now = quorum_core::now_ms();
    let twap = state.inner.aggregator.twap_at(&symbol, query.period_ms, now);
    Ok(Json(TwapResponse {
        symbol,
        period_ms: query.period_ms,
        twap,
        timestamp: now,
    }))
}

async fn post_route(
    State(state): State<AppState>,
    body: Result<Json<RouteRequest>, JsonRejection>,
) -> Result<Json<RouteDecision>, ApiFailure> {
    let Json(req) = body.map_err(|e| {
        Metrics::route_request("bad_request");
        ApiFailure::new(StatusCode::BAD_REQUEST, "invalid_request", e.body_text())
    })?;
    let decision = state
        .inner
        .router
        .route(&req.symbol, req.side, req.size, req.liquidity)?;
    Ok(Json(decision))
}

async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.inner.health_report())
}

async fn get_metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let Some(guard) = state.limiter.try_acquire() else {
        warn!(
            current = state.limiter.current_count(),
            max = state.limiter.max,
            "Streaming connection limit reached"
        );
        return ApiFailure::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "too_many_connections",
            "connection limit reached",
        )
        .into_response();
    };

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state.inner, guard))
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send_frame(
    sender: &mut WsSender,
    frame: &PublishedFrame,
    filter: &Option<HashSet<Symbol>>,
    snapshot: bool,
) -> bool {
    let prices = filtered(&frame.prices, filter);
    let msg = if snapshot {
        StreamMessage::Snapshot {
            cycle: frame.cycle,
            timestamp: frame.timestamp,
            prices,
        }
    } else {
        StreamMessage::Update {
            cycle: frame.cycle,
            timestamp: frame.timestamp,
            prices,
        }
    };
    match serde_json::to_string(&msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            debug!(error = %e, "Failed to serialize stream frame");
            true
        }
    }
}

fn filtered(prices: &PriceMap, filter: &Option<HashSet<Symbol>>) -> PriceMap {
    match filter {
        None => prices.clone(),
        Some(symbols) => prices
            .iter()
            .filter(|(s, _)| symbols.contains(*s))
            .map(|(s, v)| (s.clone(), v.clone()))
            .collect(),
    }
}

/// Handle a streaming connection.
async fn handle_ws_connection(socket: WebSocket, state: ServerState, _guard: ConnectionGuard) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let mut sub = state.publisher.subscribe();
    let mut filter: Option<HashSet<Symbol>> = None;
    let mut last_cycle = sub.initial.cycle;
    info!(%conn_id, subscriber = sub.id, "Streaming connection opened");

    if !send_frame(&mut sender, &sub.initial, &filter, true).await {
        debug!(%conn_id, "Failed to send initial snapshot, client disconnected");
        state.publisher.unsubscribe(sub.id);
        return;
    }

    loop {
        tokio::select! {
            frame = sub.frames.recv() => {
                let Some(frame) = frame else {
                    info!(%conn_id, "Subscriber dropped by publisher, closing");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                last_cycle = frame.cycle;
                if !send_frame(&mut sender, &frame, &filter, false).await {
                    debug!(%conn_id, "Failed to send update, client disconnected");
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(ClientMessage::Subscribe { symbols }) => {
                                filter = parse_filter(&symbols);
                                debug!(%conn_id, ?filter, "Subscription updated");
                                let frame = state.publisher.frame_at(last_cycle, quorum_core::now_ms());
                                if !send_frame(&mut sender, &frame, &filter, true).await {
                                    break;
                                }
                            }
                            Err(e) => debug!(%conn_id, error = %e, "Ignoring client message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%conn_id, "Client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(%conn_id, error = %e, "WebSocket receive error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.publisher.unsubscribe(sub.id);
    info!(%conn_id, "Streaming connection closed");
}

fn parse_filter(symbols: &[String]) -> Option<HashSet<Symbol>> {
    let set: HashSet<Symbol> = symbols.iter().filter_map(|s| Symbol::new(s).ok()).collect();
    (!set.is_empty()).then_some(set)
}

/// Bind the configured address.
pub async fn bind(config: &ServerConfig) -> ServerResult<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", config.bind, config.port)))?;
    Ok(TcpListener::bind(addr).await?)
}

/// Serve the API on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    config: &ServerConfig,
    cancel: CancellationToken,
) -> ServerResult<()> {
    let app = create_router(state, config);
    info!(addr = ?listener.local_addr().ok(), "Starting API server");
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    info!("API server stopped");
    Ok(())
}

/// Bind and serve.
pub async fn run_server(
    state: ServerState,
    config: ServerConfig,
    cancel: CancellationToken,
) -> ServerResult<()> {
    let listener = bind(&config).await?;
    serve(listener, state, &config, cancel).await
}
