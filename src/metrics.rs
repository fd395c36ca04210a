// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the hsyncd agent.
//!
//! All metrics live in a global registry exposed on the management
//! listener's `/metrics` endpoint with the namespace prefix `hsyncd_`.
//!
//! # Metrics Categories
//!
//! - **Peer Metrics** - per-peer state and heartbeat counters
//! - **Discovery Metrics** - DNS lookups and locator retries
//! - **Combiner Metrics** - accepted/rejected contributions
//! - **Engine Metrics** - dropped channel sends
//! - **API Metrics** - sync endpoint requests

use crate::agent::AgentState;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;

/// Namespace prefix for all hsyncd metrics
const METRICS_NAMESPACE: &str = "hsyncd";

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via the
/// `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Peer Metrics
// ============================================================================

/// Current state of each tracked peer, as the state machine ordinal
///
/// Labels:
/// - `identity`: the peer's identity
pub static AGENT_STATE: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_agent_state"),
        "Peer state machine position (0=NEEDED .. 5=INTERRUPTED, 6=ERROR)",
    );
    let gauge = GaugeVec::new(opts, &["identity"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Heartbeats sent, by peer and outcome
pub static BEATS_SENT_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_beats_sent_total"),
        "Heartbeats sent by peer and outcome",
    );
    let counter = CounterVec::new(opts, &["identity", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Heartbeats received, by peer
pub static BEATS_RECEIVED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_beats_received_total"),
        "Heartbeats received by peer",
    );
    let counter = CounterVec::new(opts, &["identity"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// HELLO attempts, by peer and outcome
pub static HELLO_ATTEMPTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_hello_attempts_total"),
        "HELLO handshake attempts by peer and outcome",
    );
    let counter = CounterVec::new(opts, &["identity", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Discovery Metrics
// ============================================================================

/// Discovery DNS lookups, by query type and outcome
pub static DISCOVERY_LOOKUPS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_discovery_lookups_total"),
        "Discovery DNS lookups by query type and outcome",
    );
    let counter = CounterVec::new(opts, &["qtype", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Locator retry ticks, by peer
pub static DISCOVERY_RETRIES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_discovery_retries_total"),
        "Locator retry ticks by peer",
    );
    let counter = CounterVec::new(opts, &["identity"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Combiner Metrics
// ============================================================================

/// Combiner updates, by zone and outcome
pub static COMBINER_UPDATES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_combiner_updates_total"),
        "Combiner updates by zone and outcome",
    );
    let counter = CounterVec::new(opts, &["zone", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Engine Metrics
// ============================================================================

/// Requests dropped because an engine channel was full
pub static ENGINE_DROPPED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_engine_dropped_total"),
        "Requests dropped on a full engine channel",
    );
    let counter = CounterVec::new(opts, &["channel"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// API Metrics
// ============================================================================

/// Sync API requests, by endpoint and outcome
pub static API_REQUESTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_api_requests_total"),
        "Sync API requests by endpoint and outcome",
    );
    let counter = CounterVec::new(opts, &["endpoint", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Recording Helpers
// ============================================================================

/// Record a peer's state transition.
pub fn set_agent_state(identity: &str, state: AgentState) {
    let ordinal = match state {
        AgentState::Needed => 0.0,
        AgentState::Known => 1.0,
        AgentState::Introduced => 2.0,
        AgentState::Operational => 3.0,
        AgentState::Degraded => 4.0,
        AgentState::Interrupted => 5.0,
        AgentState::Error => 6.0,
    };
    AGENT_STATE.with_label_values(&[identity]).set(ordinal);
}

/// Drop a removed peer's state series.
pub fn clear_agent_state(identity: &str) {
    let _ = AGENT_STATE.remove_label_values(&[identity]);
}

/// Record a heartbeat send attempt.
pub fn record_beat_sent(identity: &str, outcome: &str) {
    BEATS_SENT_TOTAL
        .with_label_values(&[identity, outcome])
        .inc();
}

/// Record an inbound heartbeat.
pub fn record_beat_received(identity: &str) {
    BEATS_RECEIVED_TOTAL.with_label_values(&[identity]).inc();
}

/// Record a HELLO attempt.
pub fn record_hello_attempt(identity: &str, outcome: &str) {
    HELLO_ATTEMPTS_TOTAL
        .with_label_values(&[identity, outcome])
        .inc();
}

/// Record a discovery lookup.
pub fn record_discovery_lookup(qtype: &str, outcome: &str) {
    DISCOVERY_LOOKUPS_TOTAL
        .with_label_values(&[qtype, outcome])
        .inc();
}

/// Record a locator retry tick.
pub fn record_discovery_retry(identity: &str) {
    DISCOVERY_RETRIES_TOTAL.with_label_values(&[identity]).inc();
}

/// Record a combiner verdict.
pub fn record_combiner_update(zone: &str, outcome: &str) {
    COMBINER_UPDATES_TOTAL
        .with_label_values(&[zone, outcome])
        .inc();
}

/// Record a dropped engine send.
pub fn record_engine_drop(channel: &str) {
    ENGINE_DROPPED_TOTAL.with_label_values(&[channel]).inc();
}

/// Record a sync API request.
pub fn record_api_request(endpoint: &str, outcome: &str) {
    API_REQUESTS_TOTAL
        .with_label_values(&[endpoint, outcome])
        .inc();
}

/// Render the registry in Prometheus text exposition format.
///
/// # Errors
///
/// Encoding failures from the Prometheus encoder.
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
