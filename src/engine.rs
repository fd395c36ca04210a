// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The synchronization engine.
//!
//! A single task multiplexing every synchronization-related event:
//! HSYNC RRset deltas from the zone store, inbound HELLO/BEAT/MSG
//! reports from the API handlers, operator commands, synthesized
//! debug commands, the heartbeat and HELLO-retry ticks, status
//! requests, and shutdown.
//!
//! Handlers either finish quickly or spawn; the engine itself never
//! blocks on network I/O, and no error terminates the loop. Request
//! channels are shallow (capacity 10): non-essential senders get an
//! immediate `ChannelFull` error, essential senders block briefly.

use crate::agent::heartbeat;
use crate::agent::registry::AgentRegistry;
use crate::agent::tasks::DeferredAgentTask;
use crate::agent::{Agent, AgentId, AgentState, ZoneName};
use crate::combiner::{Combiner, CombinerHandle, SynchedDataUpdate};
use crate::constants::{ENGINE_CHANNEL_CAPACITY, ENGINE_RESPONSE_TIMEOUT_SECS, SYNC_MSG_PATH};
use crate::errors::{EngineError, UpdateError};
use crate::hsync::HsyncDelta;
use crate::msg::{AgentMsg, MsgKind, RfiDirection};
use crate::records::{RrEntry, ZoneUpdate};
use crate::zonestore::ZoneStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// A request from the zone store.
pub enum SyncRequest {
    /// The apex HSYNC RRset of a zone changed
    HsyncUpdate {
        /// The zone whose HSYNC set changed
        zone: ZoneName,
        /// Adds and removes relative to the previous set
        delta: HsyncDelta,
        /// Optional completion notification
        respond_to: Option<oneshot::Sender<anyhow::Result<()>>>,
    },
    /// The apex DNSKEY RRset of a local zone changed
    DnskeyRrset {
        /// The zone whose DNSKEY set changed
        zone: ZoneName,
        /// The new RRset
        rrset: Vec<RrEntry>,
    },
}

/// A validated inbound HELLO, forwarded by the API handler.
#[derive(Debug)]
pub struct HelloReport {
    /// The peer that said hello
    pub from: AgentId,
    /// The zone motivating the handshake
    pub zone: ZoneName,
}

/// A validated inbound BEAT.
#[derive(Debug)]
pub struct BeatReport {
    /// The peer that beat
    pub from: AgentId,
    /// The peer's announced cadence, seconds
    pub beat_interval: u64,
    /// Zones the peer believes it shares with us
    pub zones: Vec<ZoneName>,
    /// The peer's send timestamp
    pub time: DateTime<Utc>,
}

/// A validated inbound generic message.
pub struct MsgReport {
    /// The authenticated sender
    pub from: AgentId,
    /// The message body
    pub msg: AgentMsg,
    /// Where to report acceptance or rejection
    pub respond_to: Option<oneshot::Sender<Result<(), UpdateError>>>,
}

/// An operator (or debug) command.
pub enum Command {
    /// Snapshot the sync state
    Status {
        /// Where to send the snapshot
        respond_to: oneshot::Sender<SyncStatus>,
    },
    /// Start discovery for an identity
    LocateAgent {
        /// The identity to locate
        id: AgentId,
        /// The zone motivating discovery
        zone: ZoneName,
    },
    /// Drop a peer back to KNOWN and restart its handshake
    ResetAgent {
        /// The peer to reset
        id: AgentId,
    },
}

/// Introspection request.
pub struct StatusRequest {
    /// Where to send the snapshot
    pub respond_to: oneshot::Sender<SyncStatus>,
}

/// One peer's condensed state for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    /// Peer identity
    pub identity: String,
    /// Overall state
    pub state: AgentState,
    /// Zones bound to the peer
    pub zones: Vec<String>,
    /// Heartbeats sent
    pub sent_beats: u64,
    /// Heartbeats received
    pub received_beats: u64,
    /// Whether the HTTPS transport is usable
    pub api_supported: bool,
    /// Whether the DNS transport is usable
    pub dns_supported: bool,
    /// Most recent transport error, if any
    pub latest_error: Option<String>,
}

impl From<&Agent> for AgentStatus {
    fn from(agent: &Agent) -> Self {
        Self {
            identity: agent.identity.to_string(),
            state: agent.state,
            zones: agent.zones.iter().map(ToString::to_string).collect(),
            sent_beats: agent.api_details.sent_beats,
            received_beats: agent.api_details.received_beats,
            api_supported: agent.api_supported,
            dns_supported: agent.dns_supported,
            latest_error: agent.api_details.latest_error.clone(),
        }
    }
}

/// Full engine state snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// The local identity
    pub identity: String,
    /// Hosted zones
    pub zones: Vec<String>,
    /// Every tracked peer
    pub agents: Vec<AgentStatus>,
}

/// Cloneable senders into the engine.
#[derive(Clone)]
pub struct EngineHandles {
    /// Zone store requests (essential path)
    pub sync_tx: mpsc::Sender<SyncRequest>,
    /// Inbound HELLO reports
    pub hello_tx: mpsc::Sender<HelloReport>,
    /// Inbound BEAT reports
    pub beat_tx: mpsc::Sender<BeatReport>,
    /// Inbound generic messages
    pub msg_tx: mpsc::Sender<MsgReport>,
    /// Operator commands
    pub cmd_tx: mpsc::Sender<Command>,
    /// Synthesized test commands, same shape as `cmd_tx`
    pub debug_tx: mpsc::Sender<Command>,
    /// Introspection requests
    pub status_tx: mpsc::Sender<StatusRequest>,
    /// Flips to `true` on shutdown
    pub stop_tx: Arc<watch::Sender<bool>>,
}

impl EngineHandles {
    /// Enqueue an inbound HELLO without blocking.
    ///
    /// # Errors
    ///
    /// [`EngineError::ChannelFull`] when the channel has no room.
    pub fn report_hello(&self, report: HelloReport) -> Result<(), EngineError> {
        self.hello_tx.try_send(report).map_err(|_| {
            crate::metrics::record_engine_drop("hello");
            EngineError::ChannelFull { channel: "hello" }
        })
    }

    /// Enqueue an inbound BEAT without blocking.
    ///
    /// # Errors
    ///
    /// [`EngineError::ChannelFull`] when the channel has no room.
    pub fn report_beat(&self, report: BeatReport) -> Result<(), EngineError> {
        self.beat_tx.try_send(report).map_err(|_| {
            crate::metrics::record_engine_drop("beat");
            EngineError::ChannelFull { channel: "beat" }
        })
    }

    /// Forward an inbound message and wait for the verdict.
    ///
    /// # Errors
    ///
    /// The handler's rejection, or an engine plumbing error mapped to
    /// an `InvalidUpdate`-style rejection for the response envelope.
    pub async fn forward_msg(
        &self,
        from: AgentId,
        msg: AgentMsg,
    ) -> Result<(), UpdateError> {
        let zone = msg.zone.clone();
        let (respond_to, response) = oneshot::channel();
        let report = MsgReport {
            from,
            msg,
            respond_to: Some(respond_to),
        };
        if self.msg_tx.try_send(report).is_err() {
            crate::metrics::record_engine_drop("msg");
            return Err(UpdateError::InvalidUpdate {
                zone,
                reason: "engine busy, retry later".to_string(),
            });
        }
        let timeout = Duration::from_secs(ENGINE_RESPONSE_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_)) | Err(_) => Err(UpdateError::InvalidUpdate {
                zone,
                reason: "no verdict from engine".to_string(),
            }),
        }
    }

    /// Ask the engine for a status snapshot.
    pub async fn status(&self) -> Result<SyncStatus, EngineError> {
        let (respond_to, response) = oneshot::channel();
        self.status_tx
            .try_send(StatusRequest { respond_to })
            .map_err(|_| EngineError::ChannelFull { channel: "status" })?;
        let timeout = Duration::from_secs(ENGINE_RESPONSE_TIMEOUT_SECS);
        tokio::time::timeout(timeout, response)
            .await
            .map_err(|_| EngineError::ResponseTimeout {
                what: "status snapshot",
                timeout_secs: ENGINE_RESPONSE_TIMEOUT_SECS,
            })?
            .map_err(|_| EngineError::Shutdown)
    }

    /// Signal shutdown to the engine and every per-peer task.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Receiver halves owned by the engine task.
pub struct EngineReceivers {
    sync_rx: mpsc::Receiver<SyncRequest>,
    hello_rx: mpsc::Receiver<HelloReport>,
    beat_rx: mpsc::Receiver<BeatReport>,
    msg_rx: mpsc::Receiver<MsgReport>,
    cmd_rx: mpsc::Receiver<Command>,
    debug_rx: mpsc::Receiver<Command>,
    status_rx: mpsc::Receiver<StatusRequest>,
    stop_rx: watch::Receiver<bool>,
}

/// Create the engine's channel set.
#[must_use]
pub fn engine_channels() -> (EngineHandles, EngineReceivers) {
    let (sync_tx, sync_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
    let (hello_tx, hello_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
    let (beat_tx, beat_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
    let (msg_tx, msg_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
    let (cmd_tx, cmd_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
    let (debug_tx, debug_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
    let (status_tx, status_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
    let (stop_tx, stop_rx) = watch::channel(false);

    (
        EngineHandles {
            sync_tx,
            hello_tx,
            beat_tx,
            msg_tx,
            cmd_tx,
            debug_tx,
            status_tx,
            stop_tx: Arc::new(stop_tx),
        },
        EngineReceivers {
            sync_rx,
            hello_rx,
            beat_rx,
            msg_rx,
            cmd_rx,
            debug_rx,
            status_rx,
            stop_rx,
        },
    )
}

/// The engine task: state and collaborators.
pub struct HsyncEngine {
    registry: Arc<AgentRegistry>,
    combiner: Arc<Combiner>,
    combiner_handle: CombinerHandle,
    zonestore: Arc<dyn ZoneStore>,
    beat_interval: Duration,
    hello_interval: Duration,
}

impl HsyncEngine {
    /// Assemble the engine over its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<AgentRegistry>,
        combiner: Arc<Combiner>,
        combiner_handle: CombinerHandle,
        zonestore: Arc<dyn ZoneStore>,
        beat_interval: Duration,
        hello_interval: Duration,
    ) -> Self {
        Self {
            registry,
            combiner,
            combiner_handle,
            zonestore,
            beat_interval,
            hello_interval,
        }
    }

    /// Run the event loop until shutdown.
    pub async fn run(self, mut rx: EngineReceivers) {
        let mut beat_tick = tokio::time::interval(self.beat_interval);
        let mut hello_tick = tokio::time::interval(self.hello_interval);
        // The first tick of a tokio interval fires immediately; skip
        // it so startup isn't a heartbeat storm.
        beat_tick.tick().await;
        hello_tick.tick().await;

        info!("Sync engine started");
        loop {
            tokio::select! {
                Some(request) = rx.sync_rx.recv() => self.handle_sync(request).await,
                Some(report) = rx.hello_rx.recv() => self.handle_hello(report).await,
                Some(report) = rx.beat_rx.recv() => self.handle_beat(report).await,
                Some(report) = rx.msg_rx.recv() => self.handle_msg(report).await,
                Some(command) = rx.cmd_rx.recv() => self.handle_command(command, false).await,
                Some(command) = rx.debug_rx.recv() => self.handle_command(command, true).await,
                Some(request) = rx.status_rx.recv() => {
                    let _ = request.respond_to.send(self.build_status().await);
                }
                _ = beat_tick.tick() => {
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        heartbeat::run_beat_sweep(&registry).await;
                    });
                }
                _ = hello_tick.tick() => self.rearm_hello_retriers().await,
                _ = rx.stop_rx.changed() => {
                    info!("Sync engine stopping");
                    self.registry.shutdown().await;
                    return;
                }
                else => {
                    error!("All engine channels closed, stopping");
                    self.registry.shutdown().await;
                    return;
                }
            }
        }
    }

    /// Apply an HSYNC delta: start discovery for additions, unbind
    /// true removals. Adds are processed first so that a role change
    /// (same identity in both lists) never transiently deletes the
    /// peer.
    async fn handle_sync(&self, request: SyncRequest) {
        match request {
            SyncRequest::HsyncUpdate {
                zone,
                delta,
                respond_to,
            } => {
                info!(
                    zone = %zone,
                    adds = delta.adds.len(),
                    removes = delta.removes.len(),
                    "Processing HSYNC update"
                );
                let local = self.registry.local_identity().clone();

                for add in &delta.adds {
                    let identity = AgentId::from(add.identity.clone());
                    let upstream = AgentId::from(add.upstream.clone());

                    if identity == local && !add.has_no_upstream() {
                        // We are the declared agent and have an
                        // upstream: locate it and, once it is
                        // operational, ask it for the zone's data.
                        let task = DeferredAgentTask::rfi_when_operational(
                            upstream.clone(),
                            zone.clone(),
                            RfiDirection::Upstream,
                        );
                        self.registry
                            .locate_agent(&upstream, Some(&zone), Some(task))
                            .await;
                    } else if upstream == local {
                        let task = DeferredAgentTask::rfi_when_operational(
                            identity.clone(),
                            zone.clone(),
                            RfiDirection::Downstream,
                        );
                        self.registry
                            .locate_agent(&identity, Some(&zone), Some(task))
                            .await;
                    } else {
                        self.registry.locate_agent(&identity, Some(&zone), None).await;
                    }
                }

                for remove in &delta.removes {
                    let role_change = delta
                        .adds
                        .iter()
                        .any(|a| a.identity == remove.identity);
                    if role_change {
                        continue;
                    }
                    let identity = AgentId::from(remove.identity.clone());
                    if identity == local {
                        info!(zone = %zone, "Local identity left the HSYNC set, cleaning up zone");
                        self.registry.cleanup_zone(&zone).await;
                        self.combiner.forget_zone(&zone);
                    } else {
                        self.registry.remove_remote_agent(&zone, &identity).await;
                    }
                }

                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(Ok(()));
                }
            }
            SyncRequest::DnskeyRrset { zone, rrset } => {
                self.handle_dnskey_change(zone, rrset).await;
            }
        }
    }

    /// Store the local DNSKEY contribution and notify peers.
    async fn handle_dnskey_change(&self, zone: ZoneName, rrset: Vec<RrEntry>) {
        let update = SynchedDataUpdate {
            zone: zone.clone(),
            agent: self.registry.local_identity().clone(),
            update: ZoneUpdate::from_entries(rrset.clone()),
        };
        if let Err(e) = self.combiner.process(update) {
            warn!(zone = %zone, error = %e, "Local DNSKEY contribution rejected");
            return;
        }

        let registry = Arc::clone(&self.registry);
        let rrs: Vec<String> = rrset.iter().map(ToString::to_string).collect();
        tokio::spawn(async move {
            notify_peers(&registry, &zone, rrs).await;
        });
    }

    /// An inbound HELLO: make sure we track (and eventually locate)
    /// the greeting peer for that zone.
    async fn handle_hello(&self, report: HelloReport) {
        debug!(from = %report.from, zone = %report.zone, "Inbound HELLO");
        self.registry
            .locate_agent(&report.from, Some(&report.zone), None)
            .await;
    }

    async fn handle_beat(&self, report: BeatReport) {
        heartbeat::record_inbound_beat(
            &self.registry,
            &report.from,
            report.beat_interval,
            self.registry.local_beat_interval(),
        )
        .await;

        let skew = Utc::now()
            .signed_duration_since(report.time)
            .num_seconds()
            .abs();
        if skew > 60 {
            warn!(from = %report.from, skew_secs = skew, "Peer clock skew on BEAT");
        }
    }

    /// Dispatch a generic inbound message.
    async fn handle_msg(&self, report: MsgReport) {
        let verdict = self.dispatch_msg(&report).await;
        if let Some(respond_to) = report.respond_to {
            let _ = respond_to.send(verdict);
        }
    }

    async fn dispatch_msg(&self, report: &MsgReport) -> Result<(), UpdateError> {
        let zone: ZoneName =
            report
                .msg
                .zone
                .parse()
                .map_err(|_| UpdateError::InvalidUpdate {
                    zone: report.msg.zone.clone(),
                    reason: "unparsable zone name".to_string(),
                })?;

        match report.msg.message_type {
            MsgKind::Notify | MsgKind::Update => {
                if !self.zonestore.is_zone_known(&zone) {
                    return Err(UpdateError::UnknownZone {
                        zone: zone.to_string(),
                    });
                }
                let update = ZoneUpdate::parse(&report.msg.rrs)?;
                let data = SynchedDataUpdate {
                    zone,
                    agent: report.from.clone(),
                    update,
                };
                let timeout = Duration::from_secs(ENGINE_RESPONSE_TIMEOUT_SECS);
                match tokio::time::timeout(timeout, self.combiner_handle.apply(data)).await {
                    Ok(verdict) => verdict,
                    Err(_) => Err(UpdateError::InvalidUpdate {
                        zone: report.msg.zone.clone(),
                        reason: "combiner timed out".to_string(),
                    }),
                }
            }
            MsgKind::Rfi => {
                // Answer with our own apex data for the zone, out of
                // band; the envelope just acknowledges receipt.
                let registry = Arc::clone(&self.registry);
                let zonestore = Arc::clone(&self.zonestore);
                let peer = report.from.clone();
                tokio::spawn(async move {
                    answer_rfi(&registry, &zonestore, &peer, &zone).await;
                });
                Ok(())
            }
            MsgKind::Query | MsgKind::Status => Ok(()),
            MsgKind::Hello | MsgKind::Beat => Err(UpdateError::InvalidUpdate {
                zone: report.msg.zone.clone(),
                reason: "HELLO/BEAT do not travel on /msg".to_string(),
            }),
        }
    }

    async fn handle_command(&self, command: Command, debug: bool) {
        if debug {
            debug!("Processing debug command");
        }
        match command {
            Command::Status { respond_to } => {
                let _ = respond_to.send(self.build_status().await);
            }
            Command::LocateAgent { id, zone } => {
                self.registry.locate_agent(&id, Some(&zone), None).await;
            }
            Command::ResetAgent { id } => self.reset_agent(&id).await,
        }
    }

    /// Drop a peer back to KNOWN (the explicit peer-reset) and restart
    /// its handshake.
    async fn reset_agent(&self, id: &AgentId) {
        let Some(handle) = self.registry.agent_handle(id) else {
            warn!(identity = %id, "Reset requested for unknown agent");
            return;
        };
        let initial_zone = {
            let mut agent = handle.write().await;
            agent.api_details.state = Some(AgentState::Known);
            agent.api_details.sent_beats = 0;
            agent.api_details.received_beats = 0;
            agent.api_details.latest_s_beat = None;
            agent.api_details.latest_r_beat = None;
            agent.api_details.latest_error = None;
            agent.set_state(AgentState::Known);
            agent.initial_zone.clone()
        };
        info!(identity = %id, "Agent reset to KNOWN");
        self.registry.cancel_hello_retrier(id).await;
        self.registry.start_hello_retrier(id, &initial_zone).await;
    }

    /// Re-arm HELLO retriers for peers stuck in KNOWN without one.
    async fn rearm_hello_retriers(&self) {
        for agent in self.registry.all_agents().await {
            if agent.state != AgentState::Known || agent.api_details.client.is_none() {
                continue;
            }
            let id = agent.identity.clone();
            if self.registry.hello_retrier_active(&id).await {
                continue;
            }
            debug!(identity = %id, "Re-arming HELLO retrier");
            self.registry
                .start_hello_retrier(&id, &agent.initial_zone)
                .await;
        }
    }

    async fn build_status(&self) -> SyncStatus {
        let agents = self
            .registry
            .all_agents()
            .await
            .iter()
            .map(AgentStatus::from)
            .collect();
        SyncStatus {
            identity: self.registry.local_identity().to_string(),
            zones: self
                .zonestore
                .zone_names()
                .iter()
                .map(ToString::to_string)
                .collect(),
            agents,
        }
    }
}

/// Push an apex RRset to every reachable remote agent of a zone.
async fn notify_peers(registry: &Arc<AgentRegistry>, zone: &ZoneName, rrs: Vec<String>) {
    let mut posts = Vec::new();
    for agent in registry.remote_agents(zone).await {
        if agent.state < AgentState::Operational {
            continue;
        }
        let (Some(client), Some(endpoint)) = (
            agent.api_details.client.clone(),
            agent.api_details.endpoint(SYNC_MSG_PATH),
        ) else {
            continue;
        };
        let body = AgentMsg {
            message_type: MsgKind::Notify,
            my_identity: registry.local_identity().to_string(),
            zone: zone.to_string(),
            rrs: rrs.clone(),
            rfi_type: None,
            time: Utc::now(),
        };
        let peer = agent.identity.clone();
        let zone = zone.clone();
        posts.push(async move {
            if let Err(e) = client.post(&endpoint).json(&body).send().await {
                warn!(peer = %peer, zone = %zone, error = %e, "NOTIFY failed");
            }
        });
    }
    futures::future::join_all(posts).await;
}

/// Answer an RFI by pushing our apex sync RRsets to the asking peer.
async fn answer_rfi(
    registry: &Arc<AgentRegistry>,
    zonestore: &Arc<dyn ZoneStore>,
    peer: &AgentId,
    zone: &ZoneName,
) {
    let Some(data) = zonestore.get_zone(zone) else {
        warn!(zone = %zone, "RFI for a zone we do not host");
        return;
    };
    let rrs: Vec<String> = crate::combiner::ALLOWED_RR_TYPES
        .iter()
        .filter_map(|rtype| data.apex.get(rtype))
        .flatten()
        .map(ToString::to_string)
        .collect();
    if rrs.is_empty() {
        debug!(zone = %zone, peer = %peer, "No apex data to answer the RFI with");
        return;
    }

    let Ok(agent) = registry.get_agent_info(peer).await else {
        return;
    };
    let (Some(client), Some(endpoint)) = (
        agent.api_details.client.clone(),
        agent.api_details.endpoint(SYNC_MSG_PATH),
    ) else {
        return;
    };
    let body = AgentMsg {
        message_type: MsgKind::Update,
        my_identity: registry.local_identity().to_string(),
        zone: zone.to_string(),
        rrs,
        rfi_type: None,
        time: Utc::now(),
    };
    if let Err(e) = client.post(&endpoint).json(&body).send().await {
        warn!(peer = %peer, zone = %zone, error = %e, "RFI answer failed");
    }
}
