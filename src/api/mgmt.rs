// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Management API: local operator endpoints.
//!
//! `/ping`, `/agent`, `/zone`, `/config`, `/command`, `/debug`, and
//! the Prometheus `/metrics` endpoint. All endpoints terminate
//! locally and authenticate with the shared secret in the
//! `X-API-Key` header.

use crate::agent::registry::AgentRegistry;
use crate::combiner::Combiner;
use crate::constants::{ENGINE_RESPONSE_TIMEOUT_SECS, MGMT_API_KEY_HEADER, METRICS_SERVER_PATH};
use crate::engine::{Command, EngineHandles, SyncStatus};
use crate::zonestore::ZoneStore;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::info;

/// Shared state for the management handlers.
#[derive(Clone)]
pub struct MgmtApiState {
    /// The agent registry
    pub registry: Arc<AgentRegistry>,
    /// The combiner repository
    pub combiner: Arc<Combiner>,
    /// The hosted zones
    pub zonestore: Arc<dyn ZoneStore>,
    /// Channels into the engine
    pub engine: EngineHandles,
    /// Shared secret expected in `X-API-Key`
    pub api_key: Arc<String>,
    /// Redacted running configuration
    pub config_view: Arc<serde_json::Value>,
    /// Process start time, for `/ping` uptime
    pub started_at: Instant,
}

/// Build the management router, including `/metrics`.
pub fn mgmt_router(state: MgmtApiState) -> Router {
    Router::new()
        .route("/ping", get(handle_ping))
        .route("/agent", get(handle_agents))
        .route("/zone", get(handle_zones))
        .route("/config", get(handle_config))
        .route("/command", post(handle_command))
        .route("/debug", post(handle_debug))
        .route(METRICS_SERVER_PATH, get(handle_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

/// Reject requests without the shared secret.
async fn require_api_key(
    State(state): State<MgmtApiState>,
    request: Request,
    next: Next,
) -> Response {
    // The metrics endpoint stays scrapeable without the secret.
    if request.uri().path() == METRICS_SERVER_PATH {
        return next.run(request).await;
    }
    let presented = request
        .headers()
        .get(MGMT_API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing or wrong API key"})),
        )
            .into_response();
    }
    next.run(request).await
}

async fn handle_ping(State(state): State<MgmtApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "identity": state.registry.local_identity().to_string(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn handle_agents(State(state): State<MgmtApiState>) -> Json<serde_json::Value> {
    let agents: Vec<serde_json::Value> = state
        .registry
        .all_agents()
        .await
        .iter()
        .map(|agent| {
            json!({
                "identity": agent.identity.to_string(),
                "state": agent.state.to_string(),
                "zones": agent.zones.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "api": {
                    "supported": agent.api_supported,
                    "contact_info": agent.api_details.contact_info,
                    "sent_beats": agent.api_details.sent_beats,
                    "received_beats": agent.api_details.received_beats,
                    "latest_error": agent.api_details.latest_error,
                },
                "dns": {
                    "supported": agent.dns_supported,
                    "contact_info": agent.dns_details.contact_info,
                    "sig0_key": agent
                        .dns_details
                        .key
                        .as_ref()
                        .map(|k| BASE64.encode(&k.public_key)),
                },
                "error_msg": agent.error_msg,
            })
        })
        .collect();
    Json(json!({ "agents": agents }))
}

async fn handle_zones(State(state): State<MgmtApiState>) -> Json<serde_json::Value> {
    let mut zones = Vec::new();
    for zone in state.zonestore.zone_names() {
        let hsync: Vec<String> = state
            .zonestore
            .hsync_rrset(&zone)
            .unwrap_or_default()
            .iter()
            .map(ToString::to_string)
            .collect();
        let contributions: Vec<serde_json::Value> = state
            .combiner
            .zone_view(&zone)
            .unwrap_or_default()
            .iter()
            .map(|(agent, data)| {
                json!({
                    "agent": agent.to_string(),
                    "rrtypes": data
                        .rrtypes
                        .iter()
                        .map(|(rtype, entries)| json!({
                            "type": rtype.to_string(),
                            "records": entries.len(),
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        zones.push(json!({
            "zone": zone.to_string(),
            "hsync": hsync,
            "contributions": contributions,
        }));
    }
    Json(json!({ "zones": zones }))
}

async fn handle_config(State(state): State<MgmtApiState>) -> Json<serde_json::Value> {
    Json(state.config_view.as_ref().clone())
}

/// Operator command body.
#[derive(Debug, Deserialize)]
pub struct CommandBody {
    /// One of `status`, `locate`, `reset-agent`
    pub command: String,
    /// Agent identity, for `locate` and `reset-agent`
    #[serde(default)]
    pub identity: Option<String>,
    /// Zone name, for `locate`
    #[serde(default)]
    pub zone: Option<String>,
}

/// Command outcome.
#[derive(Debug, Serialize)]
pub struct CommandReply {
    /// Whether the command was accepted
    pub ok: bool,
    /// Error or informational text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Status snapshot, for the `status` command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SyncStatus>,
}

async fn handle_command(
    State(state): State<MgmtApiState>,
    Json(body): Json<CommandBody>,
) -> (StatusCode, Json<CommandReply>) {
    dispatch_command(&state, body, false).await
}

/// Same command surface, reserved for synthesized test events.
async fn handle_debug(
    State(state): State<MgmtApiState>,
    Json(body): Json<CommandBody>,
) -> (StatusCode, Json<CommandReply>) {
    dispatch_command(&state, body, true).await
}

async fn dispatch_command(
    state: &MgmtApiState,
    body: CommandBody,
    debug: bool,
) -> (StatusCode, Json<CommandReply>) {
    let tx = if debug {
        &state.engine.debug_tx
    } else {
        &state.engine.cmd_tx
    };
    let fail = |code: StatusCode, msg: String| {
        (
            code,
            Json(CommandReply {
                ok: false,
                msg: Some(msg),
                status: None,
            }),
        )
    };

    let is_debug = debug;
    info!(command = %body.command, debug = is_debug, "Management command");
    match body.command.as_str() {
        "status" => {
            let (respond_to, response) = oneshot::channel();
            if tx.try_send(Command::Status { respond_to }).is_err() {
                return fail(StatusCode::SERVICE_UNAVAILABLE, "engine busy".to_string());
            }
            let timeout = Duration::from_secs(ENGINE_RESPONSE_TIMEOUT_SECS);
            match tokio::time::timeout(timeout, response).await {
                Ok(Ok(status)) => (
                    StatusCode::OK,
                    Json(CommandReply {
                        ok: true,
                        msg: None,
                        status: Some(status),
                    }),
                ),
                _ => fail(
                    StatusCode::GATEWAY_TIMEOUT,
                    "no status from engine".to_string(),
                ),
            }
        }
        "locate" => {
            let (Some(identity), Some(zone)) = (&body.identity, &body.zone) else {
                return fail(
                    StatusCode::BAD_REQUEST,
                    "locate needs identity and zone".to_string(),
                );
            };
            let (Ok(id), Ok(zone)) = (identity.parse(), zone.parse()) else {
                return fail(StatusCode::BAD_REQUEST, "unparsable name".to_string());
            };
            if tx.try_send(Command::LocateAgent { id, zone }).is_err() {
                return fail(StatusCode::SERVICE_UNAVAILABLE, "engine busy".to_string());
            }
            (
                StatusCode::OK,
                Json(CommandReply {
                    ok: true,
                    msg: Some("locate enqueued".to_string()),
                    status: None,
                }),
            )
        }
        "reset-agent" => {
            let Some(identity) = &body.identity else {
                return fail(
                    StatusCode::BAD_REQUEST,
                    "reset-agent needs identity".to_string(),
                );
            };
            let Ok(id) = identity.parse() else {
                return fail(StatusCode::BAD_REQUEST, "unparsable identity".to_string());
            };
            if tx.try_send(Command::ResetAgent { id }).is_err() {
                return fail(StatusCode::SERVICE_UNAVAILABLE, "engine busy".to_string());
            }
            (
                StatusCode::OK,
                Json(CommandReply {
                    ok: true,
                    msg: Some("reset enqueued".to_string()),
                    status: None,
                }),
            )
        }
        other => fail(
            StatusCode::BAD_REQUEST,
            format!("unknown command '{other}'"),
        ),
    }
}

async fn handle_metrics() -> Response {
    match crate::metrics::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
