//! Prometheus metrics
//!
//! All collectors live on one owned registry, rendered at `/metrics`.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    /// Total accepted WebSocket connections.
    pub ws_connections: IntCounter,
    /// Inbound WS frames by dispatched type.
    pub ws_messages: IntCounterVec,
    /// WS transport/read errors.
    pub ws_errors: IntCounter,
    /// Live sessions in the hub.
    pub sessions_active: IntGauge,
    /// Live bound connections across all sessions.
    pub peers_active: IntGauge,
    /// Rendezvous codes minted / redeemed.
    pub codes_created: IntCounter,
    pub codes_redeemed: IntCounter,
    /// Sessions whose ICE connectivity was reported established.
    pub established: IntCounter,
    /// ICE failures reported via telemetry.
    pub ice_failures: IntCounter,
    /// Session creation to first ice-connected report.
    pub establish_seconds: Histogram,
    /// Heartbeat round-trip latency from echoed ping timestamps.
    pub heartbeat_rtt_seconds: Histogram,

    registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ws_connections = IntCounter::with_opts(Opts::new(
            "pairlink_ws_connections_total",
            "Total WebSocket connections accepted",
        ))?;
        let ws_messages = IntCounterVec::new(
            Opts::new("pairlink_ws_messages_total", "Inbound WS frames by type"),
            &["type"],
        )?;
        let ws_errors = IntCounter::with_opts(Opts::new(
            "pairlink_ws_errors_total",
            "WebSocket read/transport errors",
        ))?;
        let sessions_active = IntGauge::new("pairlink_sessions_active", "Active sessions")?;
        let peers_active = IntGauge::new("pairlink_peers_active", "Active bound connections")?;
        let codes_created = IntCounter::with_opts(Opts::new(
            "pairlink_rendezvous_codes_created_total",
            "Rendezvous codes minted",
        ))?;
        let codes_redeemed = IntCounter::with_opts(Opts::new(
            "pairlink_rendezvous_codes_redeemed_total",
            "Rendezvous codes redeemed",
        ))?;
        let established = IntCounter::with_opts(Opts::new(
            "pairlink_sessions_established_total",
            "Sessions reaching ICE connectivity",
        ))?;
        let ice_failures = IntCounter::with_opts(Opts::new(
            "pairlink_ice_failures_total",
            "ICE failures reported by clients",
        ))?;
        let establish_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pairlink_session_establish_seconds",
                "Time from session creation to first ice-connected report",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        let heartbeat_rtt_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pairlink_heartbeat_rtt_seconds",
                "Round-trip latency derived from heartbeat pongs",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;

        registry.register(Box::new(ws_connections.clone()))?;
        registry.register(Box::new(ws_messages.clone()))?;
        registry.register(Box::new(ws_errors.clone()))?;
        registry.register(Box::new(sessions_active.clone()))?;
        registry.register(Box::new(peers_active.clone()))?;
        registry.register(Box::new(codes_created.clone()))?;
        registry.register(Box::new(codes_redeemed.clone()))?;
        registry.register(Box::new(established.clone()))?;
        registry.register(Box::new(ice_failures.clone()))?;
        registry.register(Box::new(establish_seconds.clone()))?;
        registry.register(Box::new(heartbeat_rtt_seconds.clone()))?;

        Ok(Self {
            ws_connections,
            ws_messages,
            ws_errors,
            sessions_active,
            peers_active,
            codes_created,
            codes_redeemed,
            established,
            ice_failures,
            establish_seconds,
            heartbeat_rtt_seconds,
            registry,
        })
    }

    /// Text exposition for the `/metrics` endpoint.
    pub fn render(&self) -> String {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}
