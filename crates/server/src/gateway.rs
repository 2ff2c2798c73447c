//! HTTP gateway exposing one webhook per registered platform.
//!
//! Every mounted pair is the same generic handler: GET answers the
//! platform's subscribe handshake, POST runs verification and hands each
//! extracted event to the dispatcher. Processing failures never surface as
//! HTTP failures (platforms retry-storm on non-200); only verification
//! (401/403) and unparseable JSON (400) reject.

use crate::dispatch::Dispatcher;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use omnirelay_core::metrics::MetricsStore;
use omnirelay_core::platform::{ChallengeOutcome, ChallengeQuery, PlatformAdapter, WebhookRequest};
use omnirelay_core::verify::VerifyError;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Clone)]
struct PlatformState {
    adapter: Arc<dyn PlatformAdapter>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsStore>,
}

#[derive(Clone)]
struct HealthState {
    metrics: Arc<MetricsStore>,
    platforms: Vec<(&'static str, &'static str)>,
}

pub struct Gateway {
    bind: String,
    port: u16,
    metrics: Arc<MetricsStore>,
    platforms: Vec<(Arc<dyn PlatformAdapter>, Arc<Dispatcher>)>,
}

impl Gateway {
    pub fn new(bind: String, port: u16, metrics: Arc<MetricsStore>) -> Self {
        Self {
            bind,
            port,
            metrics,
            platforms: Vec::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>, dispatcher: Arc<Dispatcher>) {
        info!(
            platform = adapter.platform_name(),
            path = adapter.webhook_path(),
            "registered webhook platform"
        );
        self.platforms.push((adapter, dispatcher));
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let mut app = Router::new();

        for (adapter, dispatcher) in &self.platforms {
            let state = PlatformState {
                adapter: adapter.clone(),
                dispatcher: dispatcher.clone(),
                metrics: self.metrics.clone(),
            };
            let routes = Router::new()
                .route(adapter.webhook_path(), get(verify_webhook).post(receive_webhook))
                .with_state(state);
            app = app.merge(routes);
        }

        let health_state = HealthState {
            metrics: self.metrics.clone(),
            platforms: self
                .platforms
                .iter()
                .map(|(a, _)| (a.platform_name(), a.webhook_path()))
                .collect(),
        };
        app = app.merge(Router::new().route("/", get(health)).with_state(health_state));

        let addr: SocketAddr = format!("{}:{}", self.bind, self.port).parse()?;
        info!("gateway listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn health(State(state): State<HealthState>) -> Json<Value> {
    let platforms: Vec<Value> = state
        .platforms
        .iter()
        .map(|(name, path)| json!({ "platform": name, "webhook_path": path }))
        .collect();
    Json(json!({
        "status": "ok",
        "service": "omnirelay",
        "platforms": platforms,
        "metrics": state.metrics.snapshot(),
    }))
}

/// GET handshake (Meta-style subscribe verification).
async fn verify_webhook(
    State(state): State<PlatformState>,
    Query(query): Query<ChallengeQuery>,
) -> Response {
    match state.adapter.subscribe_challenge(&query) {
        ChallengeOutcome::Unsupported => StatusCode::NOT_FOUND.into_response(),
        ChallengeOutcome::Accepted(challenge) => challenge.into_response(),
        ChallengeOutcome::Rejected(e) => {
            state.metrics.inc_verify_failures();
            let status = match e {
                VerifyError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::FORBIDDEN,
            };
            (status, e.to_string()).into_response()
        }
    }
}

/// POST event delivery.
async fn receive_webhook(
    State(state): State<PlatformState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let platform = state.adapter.platform_name();

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(platform, error = %e, "failed to parse webhook JSON");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": "invalid JSON" })),
            )
                .into_response();
        }
    };

    // In-band handshakes are answered before signature verification; the
    // platform's verification call is not signed.
    if let Some(response) = state.adapter.handshake_response(&payload) {
        return Json(response).into_response();
    }

    let request = webhook_request(&headers, &body);
    if let Err(e) = state.adapter.verify(&request, now_epoch_secs()) {
        warn!(platform, error = %e, "webhook verification failed");
        state.metrics.inc_verify_failures();
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": e.to_string() })),
        )
            .into_response();
    }

    for event in state.adapter.extract_events(&payload) {
        state
            .dispatcher
            .handle_event(state.adapter.as_ref(), &event)
            .await;
    }

    Json(json!({ "ok": true })).into_response()
}

fn webhook_request(headers: &HeaderMap, body: &Bytes) -> WebhookRequest {
    let mut request = WebhookRequest::new(body.to_vec());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    request
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
