// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Wire messages exchanged between agents over the sync API.
//!
//! All bodies are JSON with PascalCase field names. Every endpoint
//! replies with the shared [`AgentResponse`] envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator carried in every request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MsgKind {
    /// Bootstrap handshake
    Hello,
    /// Periodic heartbeat
    Beat,
    /// Unsolicited zone data push
    Notify,
    /// Zone data replacement
    Update,
    /// Data query
    Query,
    /// Status probe
    Status,
    /// Request for initial data
    Rfi,
}

/// Direction of a request-for-initial-data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RfiDirection {
    /// Asking our upstream for the zone's data
    Upstream,
    /// Asking a downstream to send its contribution
    Downstream,
}

/// `POST /hello` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HelloMsg {
    /// Always [`MsgKind::Hello`]
    pub message_type: MsgKind,
    /// Sender identity
    pub my_identity: String,
    /// Intended receiver identity
    pub your_identity: String,
    /// The zone motivating the handshake
    pub zone: String,
}

/// `POST /beat` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BeatMsg {
    /// Always [`MsgKind::Beat`]
    pub message_type: MsgKind,
    /// Sender identity
    pub my_identity: String,
    /// Intended receiver identity
    pub your_identity: String,
    /// Sender's heartbeat cadence, seconds
    pub my_beat_interval: u64,
    /// Zones the sender currently shares with the receiver
    pub zones: Vec<String>,
    /// Sender timestamp
    pub time: DateTime<Utc>,
}

/// `POST /msg` request body: NOTIFY / UPDATE / QUERY / STATUS / RFI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentMsg {
    /// Which operation this is
    pub message_type: MsgKind,
    /// Sender identity
    pub my_identity: String,
    /// The zone the message concerns
    pub zone: String,
    /// Records in presentation form, one per string
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rrs: Vec<String>,
    /// RFI direction, only for [`MsgKind::Rfi`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfi_type: Option<RfiDirection>,
    /// Sender timestamp
    pub time: DateTime<Utc>,
}

/// Shared response envelope for every sync endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentResponse {
    /// `"ok"` or `"error"`
    pub status: String,
    /// Responder identity
    pub my_identity: String,
    /// The requester, as the responder understood it
    pub your_identity: String,
    /// Responder timestamp
    pub time: DateTime<Utc>,
    /// Informational message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Whether the request was rejected
    pub error: bool,
    /// Human-readable rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl AgentResponse {
    /// Successful envelope.
    #[must_use]
    pub fn ok(my_identity: &str, your_identity: &str, msg: Option<String>) -> Self {
        Self {
            status: "ok".to_string(),
            my_identity: my_identity.to_string(),
            your_identity: your_identity.to_string(),
            time: Utc::now(),
            msg,
            error: false,
            error_msg: None,
        }
    }

    /// Rejection envelope.
    #[must_use]
    pub fn error(my_identity: &str, your_identity: &str, error_msg: String) -> Self {
        Self {
            status: "error".to_string(),
            my_identity: my_identity.to_string(),
            your_identity: your_identity.to_string(),
            time: Utc::now(),
            msg: None,
            error: true,
            error_msg: Some(error_msg),
        }
    }
}
