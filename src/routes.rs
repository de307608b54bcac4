//! HTTP routing
//!
//! Wires the rendezvous endpoints, the signaling WebSocket, and the
//! operational routes (health, readiness, metrics, info) into one router.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::Config;
use crate::error::RendezvousError;
use crate::handler;
use crate::hub::Hub;
use crate::metrics::Metrics;
use crate::ratelimit::{Limiter, client_key};
use crate::rendezvous::Store;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub hub: Arc<Hub>,
    pub metrics: Arc<Metrics>,
    pub ws_limiter: Option<Arc<Limiter>>,
    pub http_limiter: Option<Arc<Limiter>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<Store>, hub: Arc<Hub>, metrics: Arc<Metrics>) -> Self {
        let ws_limiter = (config.ws_rate_per_min > 0)
            .then(|| Arc::new(Limiter::per_minute(config.ws_rate_per_min)));
        let http_limiter = (config.http_rate_per_min > 0)
            .then(|| Arc::new(Limiter::per_minute(config.http_rate_per_min)));
        Self {
            config: Arc::new(config),
            store,
            hub,
            metrics,
            ws_limiter,
            http_limiter,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let rendezvous = Router::new()
        .route("/code", post(create_code))
        .route("/redeem", post(redeem_code))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            http_rate_limit,
        ));

    Router::new()
        .route("/", get(info))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_text))
        .nest("/rendezvous", rendezvous)
        .route("/ws", get(handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn info() -> impl IntoResponse {
    Json(json!({"name": "pairlink", "ok": true}))
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// `POST /rendezvous/code` — mint a code and a fresh session ID.
async fn create_code(State(state): State<AppState>) -> Response {
    match state.store.create_code() {
        Ok(minted) => {
            state.metrics.codes_created.inc();
            (
                StatusCode::OK,
                Json(json!({
                    "code": minted.code,
                    "sessionID": minted.session_id,
                    "expiresAt": rfc3339(minted.expires_at),
                })),
            )
                .into_response()
        }
        Err(err) => {
            error!("create code failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RedeemRequest {
    #[serde(default)]
    code: String,
}

/// `POST /rendezvous/redeem` — consume a code once for its session ID.
/// The `Json` extractor already answers 415 for non-JSON content types and
/// 400 for unparseable bodies.
async fn redeem_code(
    State(state): State<AppState>,
    Json(request): Json<RedeemRequest>,
) -> Response {
    match state.store.redeem(&request.code) {
        Ok((session_id, expires_at)) => {
            state.metrics.codes_redeemed.inc();
            (
                StatusCode::OK,
                Json(json!({
                    "sessionID": session_id,
                    "expiresAt": rfc3339(expires_at),
                })),
            )
                .into_response()
        }
        Err(RendezvousError::Gone) => (StatusCode::GONE, "gone").into_response(),
        Err(RendezvousError::MissingCode | RendezvousError::InvalidCode) => {
            (StatusCode::BAD_REQUEST, "bad request").into_response()
        }
        Err(err @ RendezvousError::Exhausted) => {
            error!("redeem failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal").into_response()
        }
    }
}

/// Fixed-window rate limit over the rendezvous endpoints; a no-op unless
/// `HTTP_RATE_PER_MIN` is set.
async fn http_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(limiter) = &state.http_limiter {
        let addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        if !limiter.allow(&client_key(request.headers(), addr)) {
            return (StatusCode::TOO_MANY_REQUESTS, "rate limit").into_response();
        }
    }
    next.run(request).await
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_renders_as_utc_rfc3339() {
        let ts = DateTime::parse_from_rfc3339("2026-08-06T12:00:00+02:00")
            .expect("parse")
            .with_timezone(&Utc);
        assert_eq!(rfc3339(ts), "2026-08-06T10:00:00Z");
    }
}
