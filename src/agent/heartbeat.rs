// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Heartbeat emission and peer liveness computation.
//!
//! On every engine tick the driver sends a BEAT to each peer whose
//! HTTPS transport has reached INTRODUCED or beyond, then recomputes
//! the peer's state from the staleness of the last heartbeats in both
//! directions:
//!
//! | Condition                          | New state   |
//! |------------------------------------|-------------|
//! | `r > 10R` or `s > 10L`             | INTERRUPTED |
//! | `2R < r <= 10R` or `2L < s <= 10L` | DEGRADED    |
//! | otherwise                          | OPERATIONAL |
//!
//! with `r`/`s` the age of the last received/sent beat and `R`/`L`
//! the remote/local beat intervals. Counter updates and the state
//! recomputation happen in the same critical section.
//!
//! After each successful beat the peer's deferred tasks are scanned;
//! see [`super::tasks`].

use super::registry::AgentRegistry;
use super::tasks::{DeferredAgentTask, TaskAction};
use super::{Agent, AgentId, AgentState};
use crate::constants::{
    BEAT_DEGRADED_MULTIPLIER, BEAT_INTERRUPTED_MULTIPLIER, BEAT_REQUEST_TIMEOUT_SECS,
    SYNC_BEAT_PATH, SYNC_MSG_PATH,
};
use crate::msg::{AgentMsg, AgentResponse, BeatMsg, MsgKind};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// States whose peers receive heartbeats.
fn wants_beat(state: Option<AgentState>) -> bool {
    matches!(
        state,
        Some(
            AgentState::Introduced
                | AgentState::Operational
                | AgentState::Degraded
                | AgentState::Interrupted
        )
    )
}

/// Pure liveness computation from beat staleness.
///
/// `r_secs`/`s_secs` are the ages of the latest received/sent beats;
/// `remote_secs`/`local_secs` the respective beat intervals.
#[must_use]
pub fn compute_state(r_secs: u64, s_secs: u64, remote_secs: u64, local_secs: u64) -> AgentState {
    let r_interrupted = u64::from(BEAT_INTERRUPTED_MULTIPLIER) * remote_secs;
    let s_interrupted = u64::from(BEAT_INTERRUPTED_MULTIPLIER) * local_secs;
    if r_secs > r_interrupted || s_secs > s_interrupted {
        return AgentState::Interrupted;
    }
    let r_degraded = u64::from(BEAT_DEGRADED_MULTIPLIER) * remote_secs;
    let s_degraded = u64::from(BEAT_DEGRADED_MULTIPLIER) * local_secs;
    if r_secs > r_degraded || s_secs > s_degraded {
        return AgentState::Degraded;
    }
    AgentState::Operational
}

/// Recompute and apply a peer's state from its beat timestamps.
///
/// Must be called with the agent write lock held, after the counters
/// for the triggering event were updated.
pub fn recompute_state(agent: &mut Agent, local_secs: u64) {
    if agent.api_details.latest_s_beat.is_none() && agent.api_details.latest_r_beat.is_none() {
        // No heartbeat has ever flowed; the peer stays INTRODUCED
        // until the first successful exchange.
        return;
    }
    let now = Utc::now();
    let age = |ts: Option<chrono::DateTime<Utc>>| {
        ts.map_or(0, |t| now.signed_duration_since(t).num_seconds().max(0) as u64)
    };
    let r_secs = age(agent.api_details.latest_r_beat);
    let s_secs = age(agent.api_details.latest_s_beat);
    let remote_secs = agent.api_details.beat_interval.unwrap_or(local_secs);

    let new = compute_state(r_secs, s_secs, remote_secs, local_secs);
    agent.api_details.state = Some(new);
    agent.set_state(new);
}

/// Send one round of heartbeats; one concurrent task per peer.
pub async fn run_beat_sweep(registry: &Arc<AgentRegistry>) {
    for agent in registry.all_agents().await {
        if !wants_beat(agent.api_details.state) {
            continue;
        }
        let registry = Arc::clone(registry);
        let id = agent.identity.clone();
        tokio::spawn(async move {
            send_beat(&registry, &id).await;
        });
    }
}

/// Send a single BEAT to one peer and update its state.
pub async fn send_beat(registry: &Arc<AgentRegistry>, id: &AgentId) {
    let Some(handle) = registry.agent_handle(id) else {
        return;
    };

    let (client, endpoint, zones, previous_state) = {
        let agent = handle.read().await;
        (
            agent.api_details.client.clone(),
            agent.api_details.endpoint(SYNC_BEAT_PATH),
            agent
                .zones
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            agent.api_details.state,
        )
    };
    let (Some(client), Some(endpoint)) = (client, endpoint) else {
        return;
    };

    let local_secs = registry.local_beat_interval();
    let body = BeatMsg {
        message_type: MsgKind::Beat,
        my_identity: registry.local_identity().to_string(),
        your_identity: id.to_string(),
        my_beat_interval: local_secs,
        zones,
        time: Utc::now(),
    };

    let result = client
        .post(&endpoint)
        .timeout(Duration::from_secs(BEAT_REQUEST_TIMEOUT_SECS))
        .json(&body)
        .send()
        .await;

    let mut first_success = false;
    match result {
        Ok(response) if response.status().is_success() => {
            match response.json::<AgentResponse>().await {
                Ok(envelope) if !envelope.error => {
                    crate::metrics::record_beat_sent(&id.to_string(), "ok");
                    let mut agent = handle.write().await;
                    agent.api_details.sent_beats += 1;
                    agent.api_details.latest_s_beat = Some(Utc::now());
                    agent.api_details.latest_error = None;
                    first_success = previous_state < Some(AgentState::Operational);
                    recompute_state(&mut agent, local_secs);
                }
                Ok(envelope) => {
                    crate::metrics::record_beat_sent(&id.to_string(), "error");
                    let mut agent = handle.write().await;
                    agent.api_details.latest_error = Some(format!(
                        "BEAT rejected: {}",
                        envelope.error_msg.unwrap_or_else(|| envelope.status.clone())
                    ));
                    recompute_state(&mut agent, local_secs);
                }
                Err(e) => {
                    crate::metrics::record_beat_sent(&id.to_string(), "error");
                    let mut agent = handle.write().await;
                    agent.api_details.latest_error =
                        Some(format!("malformed BEAT response: {e}"));
                    recompute_state(&mut agent, local_secs);
                }
            }
        }
        Ok(response) => {
            crate::metrics::record_beat_sent(&id.to_string(), "error");
            let mut agent = handle.write().await;
            agent.api_details.latest_error = Some(format!("BEAT returned HTTP {}", response.status()));
            recompute_state(&mut agent, local_secs);
        }
        Err(e) => {
            crate::metrics::record_beat_sent(&id.to_string(), "error");
            let mut agent = handle.write().await;
            agent.api_details.latest_error = Some(format!("BEAT transport error: {e}"));
            recompute_state(&mut agent, local_secs);
        }
    }

    if first_success {
        info!(identity = %id, "First heartbeat answered, peer operational");
    }

    // Every successful heartbeat re-evaluates the peer's parked tasks.
    if handle.read().await.api_details.latest_error.is_none() {
        run_deferred_tasks(registry, id).await;
    }
}

/// Record an inbound BEAT from a peer.
pub async fn record_inbound_beat(
    registry: &Arc<AgentRegistry>,
    from: &AgentId,
    beat_interval: u64,
    local_secs: u64,
) {
    let Some(handle) = registry.agent_handle(from) else {
        debug!(identity = %from, "BEAT from unknown agent ignored");
        return;
    };
    crate::metrics::record_beat_received(&from.to_string());

    let mut agent = handle.write().await;
    agent.api_details.received_beats += 1;
    agent.api_details.latest_r_beat = Some(Utc::now());
    agent.api_details.beat_interval = Some(beat_interval);
    if wants_beat(agent.api_details.state) {
        recompute_state(&mut agent, local_secs);
    }
}

/// Evaluate a peer's deferred tasks; keep the ones that are not done.
pub async fn run_deferred_tasks(registry: &Arc<AgentRegistry>, owner: &AgentId) {
    let Some(handle) = registry.agent_handle(owner) else {
        return;
    };
    let pending: Vec<DeferredAgentTask> = {
        let mut agent = handle.write().await;
        std::mem::take(&mut agent.deferred_tasks)
    };
    if pending.is_empty() {
        return;
    }

    let mut retained = Vec::new();
    for task in pending {
        let observed = match registry.get_agent_info(task.condition.subject()).await {
            Ok(agent) => Some(agent.state),
            Err(_) => None,
        };
        if !task.condition.is_met(observed) {
            retained.push(task);
            continue;
        }
        match execute_action(registry, &task.action).await {
            Ok(true) => {
                debug!(owner = %owner, task = %task, "Deferred task completed");
            }
            Ok(false) => retained.push(task),
            Err(e) => {
                warn!(owner = %owner, task = %task, error = %e, "Deferred task failed, retained");
                retained.push(task);
            }
        }
    }

    if !retained.is_empty() {
        handle.write().await.deferred_tasks.extend(retained);
    }
}

async fn execute_action(
    registry: &Arc<AgentRegistry>,
    action: &TaskAction,
) -> anyhow::Result<bool> {
    match action {
        TaskAction::SendRfi {
            peer,
            zone,
            direction,
        } => {
            let peer_agent = registry.get_agent_info(peer).await?;
            let (Some(client), Some(endpoint)) = (
                peer_agent.api_details.client.clone(),
                peer_agent.api_details.endpoint(SYNC_MSG_PATH),
            ) else {
                return Ok(false);
            };

            let body = AgentMsg {
                message_type: MsgKind::Rfi,
                my_identity: registry.local_identity().to_string(),
                zone: zone.to_string(),
                rrs: Vec::new(),
                rfi_type: Some(*direction),
                time: Utc::now(),
            };
            let response = client
                .post(&endpoint)
                .timeout(Duration::from_secs(BEAT_REQUEST_TIMEOUT_SECS))
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() {
                anyhow::bail!("RFI returned HTTP {}", response.status());
            }
            let envelope: AgentResponse = response.json().await?;
            Ok(!envelope.error)
        }
    }
}
