// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The combiner: per-zone, per-agent apex RRset storage.
//!
//! Every agent contributes apex RRsets (DNSKEY, CDS, CSYNC, NS) for
//! the zones it shares. The combiner stores each agent's latest
//! contribution separately; downstream consumers compose the combined
//! view. Updates replace whole RRsets per (zone, agent, type); empty
//! RRsets are ignored rather than treated as deletions.
//!
//! Policy: a contribution may only carry the four synchronization
//! types above, and every owner name must equal the zone apex. One
//! violating record rejects the entire update.

use crate::agent::{AgentId, ZoneName};
use crate::constants::ENGINE_CHANNEL_CAPACITY;
use crate::errors::UpdateError;
use crate::records::{RrEntry, ZoneUpdate};
use dashmap::DashMap;
use hickory_proto::rr::RecordType;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// RR types an agent is permitted to contribute.
pub const ALLOWED_RR_TYPES: [RecordType; 4] = [
    RecordType::DNSKEY,
    RecordType::CDS,
    RecordType::CSYNC,
    RecordType::NS,
];

/// One agent's latest contribution to one zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerData {
    /// The latest full RRset per record type
    pub rrtypes: HashMap<RecordType, Vec<RrEntry>>,
}

/// All agents' contributions to one zone.
pub type AgentRepo = HashMap<AgentId, OwnerData>;

/// A contribution from one agent for one zone.
#[derive(Debug, Clone)]
pub struct SynchedDataUpdate {
    /// The zone the contribution is for
    pub zone: ZoneName,
    /// The contributing agent
    pub agent: AgentId,
    /// The RRsets, grouped by type
    pub update: ZoneUpdate,
}

/// Per-zone, per-agent repository of contributed apex RRsets.
#[derive(Default)]
pub struct Combiner {
    repo: DashMap<ZoneName, AgentRepo>,
}

impl Combiner {
    /// Create an empty combiner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check an update against policy without applying it.
    ///
    /// # Errors
    ///
    /// [`UpdateError::InvalidUpdate`] naming the first violation: a
    /// record type outside the allowed set, or an owner name that is
    /// not the zone apex.
    pub fn evaluate(&self, update: &SynchedDataUpdate) -> Result<(), UpdateError> {
        let apex = update.zone.name();
        for (rtype, entries) in &update.update.rrsets {
            if !ALLOWED_RR_TYPES.contains(rtype) {
                return Err(UpdateError::InvalidUpdate {
                    zone: update.zone.to_string(),
                    reason: format!(
                        "Invalid RR type {rtype} (allowed: DNSKEY, CDS, CSYNC, NS)"
                    ),
                });
            }
            for entry in entries {
                if &entry.owner != apex {
                    return Err(UpdateError::InvalidUpdate {
                        zone: update.zone.to_string(),
                        reason: format!(
                            "owner {} outside apex {} for {rtype} record",
                            entry.owner, apex
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply an update, replacing each non-empty RRset wholesale.
    ///
    /// Zone and agent entries are created lazily on first
    /// contribution. Applying the same update twice leaves the
    /// repository unchanged.
    ///
    /// # Errors
    ///
    /// Policy violations per [`Combiner::evaluate`]; nothing is
    /// applied on rejection.
    pub fn process(&self, update: SynchedDataUpdate) -> Result<(), UpdateError> {
        if let Err(e) = self.evaluate(&update) {
            crate::metrics::record_combiner_update(&update.zone.to_string(), "rejected");
            return Err(e);
        }

        let mut repo = self.repo.entry(update.zone.clone()).or_default();
        let owner = repo.entry(update.agent.clone()).or_default();
        for (rtype, entries) in update.update.rrsets {
            if entries.is_empty() {
                debug!(zone = %update.zone, rtype = %rtype, "Ignoring empty RRset");
                continue;
            }
            owner.rrtypes.insert(rtype, entries);
        }
        drop(repo);

        crate::metrics::record_combiner_update(&update.zone.to_string(), "accepted");
        info!(
            zone = %update.zone,
            agent = %update.agent,
            "Stored agent contribution"
        );
        Ok(())
    }

    /// Snapshot of one agent's contribution to a zone.
    #[must_use]
    pub fn agent_view(&self, zone: &ZoneName, agent: &AgentId) -> Option<OwnerData> {
        self.repo.get(zone)?.get(agent).cloned()
    }

    /// Snapshot of every agent's contribution to a zone.
    #[must_use]
    pub fn zone_view(&self, zone: &ZoneName) -> Option<AgentRepo> {
        self.repo.get(zone).map(|repo| repo.clone())
    }

    /// The zones with at least one stored contribution.
    #[must_use]
    pub fn zones(&self) -> Vec<ZoneName> {
        self.repo.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop everything stored for a zone.
    pub fn forget_zone(&self, zone: &ZoneName) {
        self.repo.remove(zone);
    }
}

/// A request on the combiner's channel.
pub enum CombineRequest {
    /// Apply a contribution
    Apply {
        /// The contribution
        update: SynchedDataUpdate,
        /// Where to report the outcome
        respond_to: oneshot::Sender<Result<(), UpdateError>>,
    },
    /// Read back a zone's full repository
    ZoneView {
        /// The zone to read
        zone: ZoneName,
        /// Where to send the snapshot
        respond_to: oneshot::Sender<Option<AgentRepo>>,
    },
}

/// Cloneable sender half of the combiner channel.
#[derive(Clone)]
pub struct CombinerHandle {
    tx: mpsc::Sender<CombineRequest>,
}

impl CombinerHandle {
    /// Apply a contribution, waiting for the outcome.
    ///
    /// # Errors
    ///
    /// Policy violations from the combiner, or an `InvalidUpdate`
    /// shell when the combiner task is gone.
    pub async fn apply(&self, update: SynchedDataUpdate) -> Result<(), UpdateError> {
        let zone = update.zone.to_string();
        let (respond_to, response) = oneshot::channel();
        if self
            .tx
            .send(CombineRequest::Apply { update, respond_to })
            .await
            .is_err()
        {
            return Err(UpdateError::InvalidUpdate {
                zone,
                reason: "combiner unavailable".to_string(),
            });
        }
        response.await.unwrap_or(Err(UpdateError::InvalidUpdate {
            zone,
            reason: "combiner dropped the request".to_string(),
        }))
    }

    /// Read back a zone's repository.
    pub async fn zone_view(&self, zone: &ZoneName) -> Option<AgentRepo> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(CombineRequest::ZoneView {
                zone: zone.clone(),
                respond_to,
            })
            .await
            .ok()?;
        response.await.ok().flatten()
    }
}

/// Spawn the combiner task, returning its handle.
#[must_use]
pub fn spawn_combiner(combiner: Arc<Combiner>) -> CombinerHandle {
    let (tx, mut rx) = mpsc::channel::<CombineRequest>(ENGINE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match request {
                CombineRequest::Apply { update, respond_to } => {
                    let _ = respond_to.send(combiner.process(update));
                }
                CombineRequest::ZoneView { zone, respond_to } => {
                    let _ = respond_to.send(combiner.zone_view(&zone));
                }
            }
        }
    });
    CombinerHandle { tx }
}
