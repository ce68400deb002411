//! HTTP transport: JSON API with bearer auth, permissive CORS, and /health.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::HeaderMap,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use radiance::loop_state::DEFAULT_STALE_AFTER_MINS;
use radiance::{DedupPolicy, LoopSnapshot, LoopTracker, NoDedup, TrendLimit, TrendRange};

use crate::dashboard;
use crate::phases::{act, learn, reason, sense, LogNotifier, Notifier};
use crate::store::MetricStore;
use crate::types::{
    AckResponse, AlertsResponse, ApiError, ApiResult, DispatchResponse, EventsResponse,
    IngestRequest, IngestResponse, ListQuery, LoopStatusResponse, ScoreResponse, TrendingQuery,
    TrendingResponse,
};

/// Shared server state passed to all handlers via axum State.
pub struct AppState {
    pub store: Arc<Mutex<MetricStore>>,
    pub tracker: Arc<LoopTracker>,
    pub dedup: Arc<dyn DedupPolicy>,
    pub notifier: Arc<dyn Notifier>,
    pub token: Option<String>,
    pub stale_after: Duration,
}

impl AppState {
    pub fn new(store: MetricStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            tracker: Arc::new(LoopTracker::new()),
            dedup: Arc::new(NoDedup),
            notifier: Arc::new(LogNotifier),
            token: None,
            stale_after: Duration::minutes(DEFAULT_STALE_AFTER_MINS),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_dedup(mut self, dedup: Arc<dyn DedupPolicy>) -> Self {
        self.dedup = dedup;
        self
    }
}

/// Build the application router. `/health` bypasses auth.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sense/ingest", post(handle_ingest))
        .route("/reason/score", post(handle_score))
        .route("/act/dispatch", post(handle_dispatch))
        .route("/alerts/:id/ack", post(handle_ack))
        .route("/alerts", get(handle_alerts))
        .route("/events", get(handle_events))
        .route("/entities/trending", get(handle_trending))
        .route("/loop", get(handle_loop))
        .route("/loop/status", get(handle_loop_status))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .route("/health", get(handle_health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// HTTP server bound to one address.
pub struct HttpTransport {
    state: Arc<AppState>,
}

impl HttpTransport {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Run the HTTP server on the given address.
    pub async fn run(&self, addr: &str) -> ApiResult<()> {
        let app = router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!(
            auth = self.state.token.is_some(),
            "HTTP transport listening on {addr}"
        );

        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Auth middleware, checks the bearer token if one is configured.
async fn auth_layer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    if let Some(expected) = &state.token {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);

        if !authorized {
            return ApiError::Unauthorized.into_response();
        }
    }

    next.run(request).await
}

fn rejected(e: impl std::fmt::Display) -> ApiError {
    ApiError::Validation(e.to_string())
}

async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> ApiResult<Json<IngestResponse>> {
    let Json(req) = body.map_err(rejected)?;
    let mut store = state.store.lock().await;
    let resp = sense::run(&mut store, &state.tracker, &req, Utc::now())?;
    Ok(Json(resp))
}

async fn handle_score(State(state): State<Arc<AppState>>) -> ApiResult<Json<ScoreResponse>> {
    let mut store = state.store.lock().await;
    let outcome = reason::run(&mut store, &state.tracker, state.dedup.as_ref(), Utc::now())?;
    Ok(Json(ScoreResponse {
        ok: true,
        alerts_raised: outcome.alerts_raised,
    }))
}

async fn handle_dispatch(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DispatchResponse>> {
    let mut store = state.store.lock().await;
    let resp = act::run(
        &mut store,
        &state.tracker,
        state.notifier.as_ref(),
        Utc::now(),
    )?;
    Ok(Json(resp))
}

async fn handle_ack(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<AckResponse>> {
    let Path(id) = id.map_err(rejected)?;
    let mut store = state.store.lock().await;
    let alert = learn::acknowledge(&mut store, &state.tracker, id, Utc::now())?;
    Ok(Json(AckResponse {
        ok: true,
        id: alert.id,
        acknowledged_at: alert.acknowledged_at,
    }))
}

async fn handle_alerts(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<AlertsResponse>> {
    let Query(q) = query.map_err(rejected)?;
    let limit = dashboard::list_limit(q.limit.as_deref())?;
    let store = state.store.lock().await;
    let alerts = store.alerts(limit, q.unacknowledged.unwrap_or(false))?;
    Ok(Json(AlertsResponse { alerts }))
}

async fn handle_events(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<EventsResponse>> {
    let Query(q) = query.map_err(rejected)?;
    let limit = dashboard::list_limit(q.limit.as_deref())?;
    let store = state.store.lock().await;
    let events = store.events(limit)?;
    Ok(Json(EventsResponse { events }))
}

async fn handle_trending(
    State(state): State<Arc<AppState>>,
    query: Result<Query<TrendingQuery>, QueryRejection>,
) -> ApiResult<Json<TrendingResponse>> {
    let Query(q) = query.map_err(rejected)?;
    let range = TrendRange::parse(q.range.as_deref())?;
    let limit = TrendLimit::parse(q.limit.as_deref())?;
    let store = state.store.lock().await;
    let resp = dashboard::trending(&store, range, limit, Utc::now())?;
    Ok(Json(resp))
}

async fn handle_loop(State(state): State<Arc<AppState>>) -> Json<LoopSnapshot> {
    Json(state.tracker.snapshot())
}

async fn handle_loop_status(State(state): State<Arc<AppState>>) -> Json<LoopStatusResponse> {
    Json(dashboard::loop_status(
        state.tracker.snapshot(),
        Utc::now(),
        state.stale_after,
    ))
}

/// Health check endpoint, no auth required.
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
