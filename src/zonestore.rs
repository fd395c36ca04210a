// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The authoritative zone store seam.
//!
//! The fabric core only needs a narrow view of the zone store: which
//! zones exist, their apex RRsets, and — crucially — their HSYNC
//! RRsets. The in-memory implementation doubles as the test fixture
//! and feeds HSYNC deltas straight into the engine's request channel,
//! playing the "zone store notifies the engine" role.

use crate::agent::ZoneName;
use crate::constants::ENGINE_ENQUEUE_TIMEOUT_SECS;
use crate::engine::SyncRequest;
use crate::hsync::{HsyncDelta, HsyncRecord};
use crate::records::RrEntry;
use dashmap::DashMap;
use hickory_proto::rr::RecordType;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A zone's synchronization-relevant content.
#[derive(Debug, Clone, Default)]
pub struct ZoneData {
    /// Apex RRsets by type
    pub apex: HashMap<RecordType, Vec<RrEntry>>,
    /// The apex HSYNC RRset
    pub hsync: Vec<HsyncRecord>,
}

/// Read access to the hosted zones.
pub trait ZoneStore: Send + Sync {
    /// Whether the zone is hosted here.
    fn is_zone_known(&self, zone: &ZoneName) -> bool;

    /// Snapshot of a zone's synchronization-relevant content.
    fn get_zone(&self, zone: &ZoneName) -> Option<ZoneData>;

    /// One apex RRset of a zone.
    fn apex_rrset(&self, zone: &ZoneName, rtype: RecordType) -> Option<Vec<RrEntry>>;

    /// A zone's HSYNC RRset.
    fn hsync_rrset(&self, zone: &ZoneName) -> Option<Vec<HsyncRecord>>;

    /// Names of all hosted zones.
    fn zone_names(&self) -> Vec<ZoneName>;
}

/// In-memory zone store that notifies the engine of HSYNC changes.
#[derive(Default)]
pub struct MemoryZoneStore {
    zones: DashMap<ZoneName, ZoneData>,
    engine_tx: Mutex<Option<mpsc::Sender<SyncRequest>>>,
}

impl MemoryZoneStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the engine's request channel; HSYNC and DNSKEY changes are
    /// pushed there from then on.
    pub fn attach_engine(&self, tx: mpsc::Sender<SyncRequest>) {
        *self.engine_tx.lock().expect("engine_tx lock poisoned") = Some(tx);
    }

    /// Create a zone (or reset an existing one) with no apex data.
    pub fn upsert_zone(&self, zone: ZoneName) {
        self.zones.entry(zone).or_default();
    }

    /// Replace a zone's apex RRset of one type.
    ///
    /// A DNSKEY replacement additionally notifies the engine.
    pub async fn set_apex_rrset(&self, zone: &ZoneName, rtype: RecordType, rrset: Vec<RrEntry>) {
        {
            let mut data = self.zones.entry(zone.clone()).or_default();
            data.apex.insert(rtype, rrset.clone());
        }
        if rtype == RecordType::DNSKEY {
            self.notify(SyncRequest::DnskeyRrset {
                zone: zone.clone(),
                rrset,
            })
            .await;
        }
    }

    /// Replace a zone's HSYNC RRset, pushing the delta to the engine.
    pub async fn set_hsync(&self, zone: &ZoneName, new: Vec<HsyncRecord>) {
        let delta = {
            let mut data = self.zones.entry(zone.clone()).or_default();
            let delta = HsyncDelta::between(&data.hsync, &new);
            data.hsync = new;
            delta
        };

        if delta.is_empty() {
            debug!(zone = %zone, "HSYNC RRset unchanged");
            return;
        }
        self.notify(SyncRequest::HsyncUpdate {
            zone: zone.clone(),
            delta,
            respond_to: None,
        })
        .await;
    }

    /// Drop a zone entirely.
    pub fn remove_zone(&self, zone: &ZoneName) {
        self.zones.remove(zone);
    }

    async fn notify(&self, request: SyncRequest) {
        let tx = self
            .engine_tx
            .lock()
            .expect("engine_tx lock poisoned")
            .clone();
        let Some(tx) = tx else {
            debug!("No engine attached, dropping zone store notification");
            return;
        };
        // HSYNC updates are an essential path: block briefly rather
        // than drop, then give up with a log line.
        let timeout = Duration::from_secs(ENGINE_ENQUEUE_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, tx.send(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!("Engine stopped, zone store notification dropped"),
            Err(_) => {
                warn!("Engine channel full, zone store notification dropped");
                crate::metrics::record_engine_drop("sync");
            }
        }
    }
}

impl ZoneStore for MemoryZoneStore {
    fn is_zone_known(&self, zone: &ZoneName) -> bool {
        self.zones.contains_key(zone)
    }

    fn get_zone(&self, zone: &ZoneName) -> Option<ZoneData> {
        self.zones.get(zone).map(|data| data.clone())
    }

    fn apex_rrset(&self, zone: &ZoneName, rtype: RecordType) -> Option<Vec<RrEntry>> {
        self.zones.get(zone)?.apex.get(&rtype).cloned()
    }

    fn hsync_rrset(&self, zone: &ZoneName) -> Option<Vec<HsyncRecord>> {
        self.zones.get(zone).map(|data| data.hsync.clone())
    }

    fn zone_names(&self) -> Vec<ZoneName> {
        self.zones.iter().map(|entry| entry.key().clone()).collect()
    }
}
