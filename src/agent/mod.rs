// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Agent identity, state machine, and per-peer bookkeeping.
//!
//! An **agent** is an autonomous process authoritative for one or more
//! DNS zones, discovered purely through DNS and tracked by the
//! [`registry::AgentRegistry`]. Each peer progresses through the
//! discovery state machine:
//!
//! ```text
//! NEEDED -> KNOWN -> INTRODUCED -> OPERATIONAL
//!                                   |  ^
//!                          DEGRADED / INTERRUPTED
//! ```
//!
//! with a terminal `ERROR` state for unrecoverable discovery failures.
//! State only advances during bring-up; heartbeat loss steps sideways
//! to DEGRADED/INTERRUPTED, and only an explicit peer reset drops a
//! peer back to KNOWN.

pub mod heartbeat;
pub mod hello;
pub mod locator;
pub mod registry;
pub mod tasks;

use crate::resolver::{KeyInfo, SvcbInfo, TlsaInfo, UriInfo};
use chrono::{DateTime, Utc};
use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use tasks::DeferredAgentTask;

/// A fully-qualified, lowercased domain name identifying an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(Name);

/// A fully-qualified, lowercased zone name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneName(Name);

macro_rules! fqdn_newtype {
    ($ty:ident) => {
        impl $ty {
            /// Wrap a name, canonicalizing to lowercase FQDN form.
            #[must_use]
            pub fn new(name: Name) -> Self {
                let mut name = name.to_lowercase();
                name.set_fqdn(true);
                Self(name)
            }

            /// The underlying DNS name.
            #[must_use]
            pub fn name(&self) -> &Name {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $ty {
            type Err = hickory_proto::error::ProtoError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self::new(Name::from_str(s)?))
            }
        }

        impl From<Name> for $ty {
            fn from(name: Name) -> Self {
                Self::new(name)
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fqdn_newtype!(AgentId);
fqdn_newtype!(ZoneName);

/// The discovery/liveness state of a peer (or one of its transports).
///
/// The ordering is meaningful: bring-up advances monotonically from
/// `Needed` toward `Operational`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    /// Referenced by an HSYNC record, nothing discovered yet
    Needed,
    /// Transport and key material located in DNS
    Known,
    /// HELLO handshake completed
    Introduced,
    /// Heartbeats flowing in both directions
    Operational,
    /// Heartbeats stale beyond twice the beat interval
    Degraded,
    /// Heartbeats stale beyond ten times the beat interval
    Interrupted,
    /// Unrecoverable discovery failure, terminal
    Error,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Needed => "NEEDED",
            Self::Known => "KNOWN",
            Self::Introduced => "INTRODUCED",
            Self::Operational => "OPERATIONAL",
            Self::Degraded => "DEGRADED",
            Self::Interrupted => "INTERRUPTED",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// The two transports an agent may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// HTTPS JSON API, authenticated by TLSA
    Api,
    /// DNS message transport, authenticated by SIG(0) KEY
    Dns,
}

/// How much of a transport's contact information has been discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactInfo {
    /// Nothing discovered yet
    #[default]
    None,
    /// Some records found, transport not yet usable
    Partial,
    /// URI, authentication material, and at least one address on file
    Complete,
}

/// Discovered transport details and liveness counters for one peer
/// transport.
#[derive(Debug, Clone, Default)]
pub struct AgentDetails {
    /// Per-transport discovery/liveness state
    pub state: Option<AgentState>,
    /// Discovery progress
    pub contact_info: ContactInfo,
    /// Base URI from the `_https._tcp` / `_dns._tcp` URI record
    pub uri: Option<UriInfo>,
    /// SVCB target host
    pub host: Option<Name>,
    /// Effective port (SVCB port, URI port, or default)
    pub port: Option<u16>,
    /// Discovered address set
    pub addrs: Vec<IpAddr>,
    /// TLSA certificate association (HTTPS transport)
    pub tlsa: Option<TlsaInfo>,
    /// SIG(0) public key (DNS transport)
    pub key: Option<KeyInfo>,
    /// HTTPS client pinned to the peer's TLSA record
    pub client: Option<reqwest::Client>,
    /// Heartbeats sent to this peer
    pub sent_beats: u64,
    /// Heartbeats received from this peer
    pub received_beats: u64,
    /// Timestamp of the last heartbeat we sent successfully
    pub latest_s_beat: Option<DateTime<Utc>>,
    /// Timestamp of the last heartbeat we received
    pub latest_r_beat: Option<DateTime<Utc>>,
    /// The peer's announced beat interval, seconds
    pub beat_interval: Option<u64>,
    /// Most recent transport error, cleared on success
    pub latest_error: Option<String>,
}

impl AgentDetails {
    /// Record the SVCB-derived endpoint pieces.
    pub fn apply_svcb(&mut self, svcb: &SvcbInfo, default_port: u16) {
        self.host = Some(svcb.target.clone());
        self.port = Some(svcb.port.unwrap_or(default_port));
        self.addrs = svcb.addrs.clone();
    }

    /// Resolve an endpoint path against the transport's base URI.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let uri = self.uri.as_ref()?;
        let base = url::Url::parse(&uri.target).ok()?;
        base.join(path).ok().map(String::from)
    }
}

/// Everything the local node knows about one peer agent.
///
/// Solely owned by the registry; all mutation happens under the
/// agent's own `RwLock`.
#[derive(Debug, Clone)]
pub struct Agent {
    /// The peer's identity
    pub identity: AgentId,
    /// The zone whose HSYNC set first referenced this peer
    pub initial_zone: ZoneName,
    /// HTTPS transport details
    pub api_details: AgentDetails,
    /// DNS transport details
    pub dns_details: AgentDetails,
    /// All zones currently binding this peer
    pub zones: BTreeSet<ZoneName>,
    /// The HTTPS transport is fully discovered
    pub api_supported: bool,
    /// The DNS transport is fully discovered
    pub dns_supported: bool,
    /// Overall state
    pub state: AgentState,
    /// The state before the most recent transition
    pub last_state: Option<AgentState>,
    /// When the most recent transition happened
    pub last_state_change: Option<DateTime<Utc>>,
    /// Message accompanying the `Error` state
    pub error_msg: Option<String>,
    /// Actions parked until their precondition holds
    pub deferred_tasks: Vec<DeferredAgentTask>,
}

impl Agent {
    /// Create a freshly-referenced peer in state `Needed`.
    #[must_use]
    pub fn new(identity: AgentId, initial_zone: ZoneName) -> Self {
        let mut zones = BTreeSet::new();
        zones.insert(initial_zone.clone());
        Self {
            identity,
            initial_zone,
            api_details: AgentDetails::default(),
            dns_details: AgentDetails::default(),
            zones,
            api_supported: false,
            dns_supported: false,
            state: AgentState::Needed,
            last_state: None,
            last_state_change: None,
            error_msg: None,
            deferred_tasks: Vec::new(),
        }
    }

    /// Transition the overall state, recording the previous state and
    /// the transition timestamp.
    pub fn set_state(&mut self, new: AgentState) {
        if self.state == new {
            return;
        }
        self.last_state = Some(self.state);
        self.state = new;
        self.last_state_change = Some(Utc::now());
        crate::metrics::set_agent_state(&self.identity.to_string(), new);
    }

    /// Mutable access to one transport's details.
    pub fn details_mut(&mut self, transport: Transport) -> &mut AgentDetails {
        match transport {
            Transport::Api => &mut self.api_details,
            Transport::Dns => &mut self.dns_details,
        }
    }

    /// Mark the peer as failed beyond recovery.
    pub fn set_error(&mut self, msg: impl Into<String>) {
        self.error_msg = Some(msg.into());
        self.set_state(AgentState::Error);
    }
}
