// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The per-peer HELLO retrier.
//!
//! Once a peer reaches KNOWN, a cancelable retrier periodically posts
//! a HELLO to its `/hello` endpoint until the peer answers `ok`, at
//! which point the peer transitions to INTRODUCED and the retrier
//! finishes. Starting a new retrier for the same peer cancels the
//! previous one; the registry owns the handles.

use super::registry::AgentRegistry;
use super::{AgentId, AgentState, ZoneName};
use crate::constants::{HELLO_REQUEST_TIMEOUT_SECS, SYNC_HELLO_PATH};
use crate::msg::{AgentResponse, HelloMsg, MsgKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Retry HELLO against one peer until it succeeds or is cancelled.
pub async fn run_hello_retrier(
    registry: Arc<AgentRegistry>,
    id: AgentId,
    zone: ZoneName,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let interval = registry.hello_retry_interval();
    let mut stop = registry.stop_signal();

    loop {
        match try_hello(&registry, &id, &zone).await {
            HelloOutcome::Introduced => {
                registry.clear_hello_retrier(&id).await;
                return;
            }
            HelloOutcome::AgentGone => return,
            HelloOutcome::Retry => {}
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = cancel_rx.changed() => {
                debug!(identity = %id, "HELLO retrier cancelled");
                return;
            }
            _ = stop.changed() => return,
        }
    }
}

enum HelloOutcome {
    Introduced,
    Retry,
    AgentGone,
}

async fn try_hello(registry: &Arc<AgentRegistry>, id: &AgentId, zone: &ZoneName) -> HelloOutcome {
    let Some(handle) = registry.agent_handle(id) else {
        return HelloOutcome::AgentGone;
    };

    let (client, endpoint, state) = {
        let agent = handle.read().await;
        (
            agent.api_details.client.clone(),
            agent.api_details.endpoint(SYNC_HELLO_PATH),
            agent.state,
        )
    };

    if state >= AgentState::Introduced {
        // Someone else (an inbound HELLO, a debug command) got there
        // first; nothing left for the retrier to do.
        return HelloOutcome::Introduced;
    }
    if state != AgentState::Known {
        return HelloOutcome::Retry;
    }
    let (Some(client), Some(endpoint)) = (client, endpoint) else {
        return HelloOutcome::Retry;
    };

    let body = HelloMsg {
        message_type: MsgKind::Hello,
        my_identity: registry.local_identity().to_string(),
        your_identity: id.to_string(),
        zone: zone.to_string(),
    };

    let result = client
        .post(&endpoint)
        .timeout(Duration::from_secs(HELLO_REQUEST_TIMEOUT_SECS))
        .json(&body)
        .send()
        .await;

    let failure = match result {
        Ok(response) if response.status().is_success() => {
            match response.json::<AgentResponse>().await {
                Ok(envelope) if envelope.status == "ok" => {
                    info!(identity = %id, zone = %zone, "HELLO accepted, peer introduced");
                    crate::metrics::record_hello_attempt(&id.to_string(), "ok");
                    let mut agent = handle.write().await;
                    agent.api_details.state = Some(AgentState::Introduced);
                    agent.api_details.latest_error = None;
                    if agent.state < AgentState::Introduced {
                        agent.set_state(AgentState::Introduced);
                    }
                    return HelloOutcome::Introduced;
                }
                Ok(envelope) => format!(
                    "peer rejected HELLO: {}",
                    envelope.error_msg.unwrap_or_else(|| envelope.status.clone())
                ),
                Err(e) => format!("malformed HELLO response: {e}"),
            }
        }
        Ok(response) => format!("HELLO returned HTTP {}", response.status()),
        Err(e) => format!("HELLO transport error: {e}"),
    };

    warn!(identity = %id, zone = %zone, error = %failure, "HELLO attempt failed");
    crate::metrics::record_hello_attempt(&id.to_string(), "error");
    handle.write().await.api_details.latest_error = Some(failure);
    HelloOutcome::Retry
}
