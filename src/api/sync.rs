// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Agent-to-agent sync API: `/hello`, `/beat`, `/msg`.
//!
//! `/hello` is the bootstrap endpoint and is validated against the
//! zone's HSYNC RRset only — at that point the caller's certificate
//! cannot be checked against TLSA yet, because the caller may not be
//! located. `/beat` and `/msg` require a client certificate whose CN
//! names a tracked agent and which matches that agent's TLSA record;
//! anything less is a 401.

use super::server::PeerCertificate;
use super::tls;
use crate::agent::registry::AgentRegistry;
use crate::agent::AgentId;
use crate::engine::{BeatReport, EngineHandles, HelloReport};
use crate::errors::AuthError;
use crate::msg::{AgentMsg, AgentResponse, BeatMsg, HelloMsg};
use crate::zonestore::ZoneStore;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared state for the sync API handlers.
#[derive(Clone)]
pub struct SyncApiState {
    /// The agent registry
    pub registry: Arc<AgentRegistry>,
    /// The hosted zones
    pub zonestore: Arc<dyn ZoneStore>,
    /// Channels into the engine
    pub engine: EngineHandles,
}

/// Build the sync API router.
pub fn sync_router(state: SyncApiState) -> Router {
    Router::new()
        .route("/hello", post(handle_hello))
        .route("/beat", post(handle_beat))
        .route("/msg", post(handle_msg))
        .with_state(state)
}

/// Authenticate the caller from its client certificate.
///
/// The CN must name a tracked agent and the certificate must match
/// that agent's TLSA record.
async fn authenticate(
    registry: &Arc<AgentRegistry>,
    cert: Option<&PeerCertificate>,
) -> Result<AgentId, AuthError> {
    let der = cert
        .and_then(|c| c.0.as_deref())
        .ok_or(AuthError::MissingCertificate)?;
    let cn = tls::extract_common_name(der)?;
    let id = AgentId::from_str(&tls::normalize_fqdn(&cn))
        .map_err(|_| AuthError::UnknownPeer { cn: cn.clone() })?;
    let agent = registry
        .get_agent_info(&id)
        .await
        .map_err(|_| AuthError::UnknownPeer { cn: cn.clone() })?;
    let tlsa = agent
        .api_details
        .tlsa
        .ok_or_else(|| AuthError::NoTlsaOnFile {
            identity: id.to_string(),
        })?;
    tls::verify_peer_identity(der, &id, &tlsa)?;
    Ok(id)
}

fn unauthorized(
    state: &SyncApiState,
    caller: &str,
    err: &AuthError,
) -> (StatusCode, Json<AgentResponse>) {
    warn!(caller = caller, error = %err, "Sync API authentication failed");
    (
        StatusCode::UNAUTHORIZED,
        Json(AgentResponse::error(
            &state.registry.local_identity().to_string(),
            caller,
            err.to_string(),
        )),
    )
}

/// `POST /hello`: the bootstrap handshake.
async fn handle_hello(
    State(state): State<SyncApiState>,
    Json(body): Json<HelloMsg>,
) -> (StatusCode, Json<AgentResponse>) {
    let me = state.registry.local_identity().to_string();
    let reject = |msg: String| {
        crate::metrics::record_api_request("hello", "rejected");
        (
            StatusCode::OK,
            Json(AgentResponse::error(&me, &body.my_identity, msg)),
        )
    };

    if body.zone.is_empty() {
        return reject("Error: HELLO without a zone".to_string());
    }
    let Ok(zone) = body.zone.parse::<crate::agent::ZoneName>() else {
        return reject(format!("Error: Zone \"{}\" is not a valid name", body.zone));
    };
    if !state.zonestore.is_zone_known(&zone) {
        return reject(format!("Error: Zone \"{}\" is not known here", body.zone));
    }
    let Some(hsync) = state.zonestore.hsync_rrset(&zone).filter(|set| !set.is_empty()) else {
        return reject(format!(
            "Error: Zone \"{}\" has no HSYNC RRset",
            body.zone
        ));
    };

    let Ok(sender) = AgentId::from_str(&body.my_identity) else {
        return reject(format!(
            "Error: identity \"{}\" is not a valid name",
            body.my_identity
        ));
    };
    let local = state.registry.local_identity().clone();
    let sender_listed = hsync
        .iter()
        .any(|r| AgentId::from(r.identity.clone()) == sender);
    let local_listed = hsync
        .iter()
        .any(|r| AgentId::from(r.identity.clone()) == local);
    if !sender_listed || !local_listed {
        return reject(format!(
            "Error: Zone \"{}\" HSYNC RRset does not include both our identities",
            body.zone
        ));
    }

    if let Err(e) = state.engine.report_hello(HelloReport {
        from: sender,
        zone,
    }) {
        debug!(error = %e, "HELLO accepted but not enqueued");
    }
    crate::metrics::record_api_request("hello", "ok");
    (
        StatusCode::OK,
        Json(AgentResponse::ok(&me, &body.my_identity, None)),
    )
}

/// `POST /beat`: a peer heartbeat. Requires an authenticated peer.
async fn handle_beat(
    State(state): State<SyncApiState>,
    cert: Option<Extension<PeerCertificate>>,
    Json(body): Json<BeatMsg>,
) -> (StatusCode, Json<AgentResponse>) {
    let me = state.registry.local_identity().to_string();
    let from = match authenticate(&state.registry, cert.as_deref()).await {
        Ok(id) => id,
        Err(e) => {
            crate::metrics::record_api_request("beat", "unauthorized");
            return unauthorized(&state, &body.my_identity, &e);
        }
    };
    if body.my_identity.parse::<AgentId>().ok() != Some(from.clone()) {
        crate::metrics::record_api_request("beat", "unauthorized");
        return unauthorized(
            &state,
            &body.my_identity,
            &AuthError::CnMismatch {
                cn: from.to_string(),
                expected: body.my_identity.clone(),
            },
        );
    }

    let zones = body
        .zones
        .iter()
        .filter_map(|z| z.parse().ok())
        .collect::<Vec<_>>();
    let report = BeatReport {
        from,
        beat_interval: body.my_beat_interval,
        zones,
        time: body.time,
    };
    match state.engine.report_beat(report) {
        Ok(()) => {
            crate::metrics::record_api_request("beat", "ok");
            (
                StatusCode::OK,
                Json(AgentResponse::ok(&me, &body.my_identity, None)),
            )
        }
        Err(e) => {
            crate::metrics::record_api_request("beat", "dropped");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(AgentResponse::error(&me, &body.my_identity, e.to_string())),
            )
        }
    }
}

/// `POST /msg`: NOTIFY / UPDATE / QUERY / STATUS / RFI. Requires an
/// authenticated peer; the engine judges the payload.
async fn handle_msg(
    State(state): State<SyncApiState>,
    cert: Option<Extension<PeerCertificate>>,
    Json(body): Json<AgentMsg>,
) -> (StatusCode, Json<AgentResponse>) {
    let me = state.registry.local_identity().to_string();
    let from = match authenticate(&state.registry, cert.as_deref()).await {
        Ok(id) => id,
        Err(e) => {
            crate::metrics::record_api_request("msg", "unauthorized");
            return unauthorized(&state, &body.my_identity, &e);
        }
    };

    let caller = body.my_identity.clone();
    match state.engine.forward_msg(from, body).await {
        Ok(()) => {
            crate::metrics::record_api_request("msg", "ok");
            (StatusCode::OK, Json(AgentResponse::ok(&me, &caller, None)))
        }
        Err(e) => {
            crate::metrics::record_api_request("msg", "rejected");
            (
                StatusCode::OK,
                Json(AgentResponse::error(&me, &caller, e.to_string())),
            )
        }
    }
}
