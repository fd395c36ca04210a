// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The agent registry: the process-wide map of peer agents.
//!
//! The registry owns every [`Agent`] and the zone ↔ agent bindings.
//! Individual agents sit behind their own `RwLock`; compound mutations
//! of the zone bindings are serialized under a registry-wide mutex.
//! Discovery (the locator) and the HELLO retriers are spawned from
//! here so that their lifecycles are tied to registry membership:
//!
//! - an identity appears in the agent map if and only if discovery has
//!   been started for it;
//! - an identity appears in a zone's remote-agent list if and only if
//!   that zone's HSYNC RRset currently lists it.
//!
//! Any operation that would track the local identity as a remote peer
//! is a no-op.

use super::locator;
use super::tasks::DeferredAgentTask;
use super::{Agent, AgentId, ZoneName};
use crate::api::tls::TlsMaterial;
use crate::errors::RegistryError;
use crate::resolver::Resolver;
use crate::validator::DnssecPolicy;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Cancellation handle for one peer's HELLO retrier.
pub struct HelloHandle {
    cancel: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl HelloHandle {
    fn cancel(&self) {
        let _ = self.cancel.send(true);
        self.join.abort();
    }
}

/// Shared construction parameters for the registry.
pub struct RegistryConfig {
    /// The local agent's identity
    pub local_identity: AgentId,
    /// Local heartbeat cadence, seconds (already clamped)
    pub local_beat_interval: u64,
    /// Locator retry interval (already clamped)
    pub locate_interval: Duration,
    /// HELLO retry interval (already clamped)
    pub hello_retry_interval: Duration,
    /// DNSSEC policy applied to discovered TLSA/KEY material
    pub dnssec_policy: DnssecPolicy,
}

/// Concurrent map of peers plus the zone ↔ agent bindings.
pub struct AgentRegistry {
    agents: DashMap<AgentId, Arc<RwLock<Agent>>>,
    remote_agents: Mutex<HashMap<ZoneName, Vec<AgentId>>>,
    hello_tasks: Mutex<HashMap<AgentId, HelloHandle>>,
    config: RegistryConfig,
    resolver: Arc<dyn Resolver>,
    tls: Arc<TlsMaterial>,
    stop_rx: watch::Receiver<bool>,
}

impl AgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        config: RegistryConfig,
        resolver: Arc<dyn Resolver>,
        tls: Arc<TlsMaterial>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            agents: DashMap::new(),
            remote_agents: Mutex::new(HashMap::new()),
            hello_tasks: Mutex::new(HashMap::new()),
            config,
            resolver,
            tls,
            stop_rx,
        }
    }

    /// The local agent's identity.
    #[must_use]
    pub fn local_identity(&self) -> &AgentId {
        &self.config.local_identity
    }

    /// Local heartbeat cadence, seconds.
    #[must_use]
    pub fn local_beat_interval(&self) -> u64 {
        self.config.local_beat_interval
    }

    /// Locator retry interval.
    #[must_use]
    pub fn locate_interval(&self) -> Duration {
        self.config.locate_interval
    }

    /// HELLO retry interval.
    #[must_use]
    pub fn hello_retry_interval(&self) -> Duration {
        self.config.hello_retry_interval
    }

    /// DNSSEC policy for discovered material.
    #[must_use]
    pub fn dnssec_policy(&self) -> DnssecPolicy {
        self.config.dnssec_policy
    }

    /// The discovery resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    /// Local TLS material used when building peer clients.
    #[must_use]
    pub fn tls_material(&self) -> &Arc<TlsMaterial> {
        &self.tls
    }

    /// A receiver that flips to `true` on engine shutdown.
    #[must_use]
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// The live handle for an agent, if it exists.
    #[must_use]
    pub fn agent_handle(&self, id: &AgentId) -> Option<Arc<RwLock<Agent>>> {
        self.agents.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Start (or extend) discovery of a peer.
    ///
    /// Returns immediately. For an unknown identity this creates the
    /// agent in state NEEDED and spawns the locator; for a known
    /// identity it merely binds the additional zone. A deferred task,
    /// when supplied, is attached to the peer either way.
    pub async fn locate_agent(
        self: &Arc<Self>,
        id: &AgentId,
        zone: Option<&ZoneName>,
        deferred: Option<DeferredAgentTask>,
    ) {
        if *id == self.config.local_identity {
            debug!(identity = %id, "Ignoring locate request for the local identity");
            return;
        }

        if let Some(handle) = self.agent_handle(id) {
            if let Some(zone) = zone {
                self.bind_zone(id, zone).await;
            }
            if let Some(task) = deferred {
                handle.write().await.deferred_tasks.push(task);
            }
            return;
        }

        let initial_zone = match zone {
            Some(z) => z.clone(),
            // An agent only ever enters the registry via some zone's
            // HSYNC set; a zoneless locate of a new identity is a bug
            // upstream, refuse it.
            None => {
                warn!(identity = %id, "Refusing to locate a new agent without a zone");
                return;
            }
        };

        let mut agent = Agent::new(id.clone(), initial_zone.clone());
        if let Some(task) = deferred {
            agent.deferred_tasks.push(task);
        }
        self.agents
            .insert(id.clone(), Arc::new(RwLock::new(agent)));
        self.bind_zone(id, &initial_zone).await;

        info!(identity = %id, zone = %initial_zone, "Starting discovery for new agent");
        let registry = Arc::clone(self);
        let id = id.clone();
        let zone = initial_zone;
        tokio::spawn(async move {
            locator::run_locator(registry, id, Some(zone)).await;
        });
    }

    /// Bind a zone to an already-tracked agent.
    pub async fn add_zone_to_agent(&self, id: &AgentId, zone: &ZoneName) {
        if *id == self.config.local_identity {
            return;
        }
        self.bind_zone(id, zone).await;
    }

    async fn bind_zone(&self, id: &AgentId, zone: &ZoneName) {
        if let Some(handle) = self.agent_handle(id) {
            handle.write().await.zones.insert(zone.clone());
        }
        let mut remotes = self.remote_agents.lock().await;
        let ids = remotes.entry(zone.clone()).or_default();
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }

    /// Snapshot of every agent whose `zones` set contains the zone.
    pub async fn agents_for_zone(&self, zone: &ZoneName) -> Vec<Agent> {
        let mut result = Vec::new();
        for entry in self.agents.iter() {
            let agent = entry.value().read().await;
            if agent.zones.contains(zone) {
                result.push(agent.clone());
            }
        }
        result
    }

    /// Snapshot of the agents bound to a zone via its HSYNC set.
    pub async fn remote_agents(&self, zone: &ZoneName) -> Vec<Agent> {
        let ids = {
            let remotes = self.remote_agents.lock().await;
            remotes.get(zone).cloned().unwrap_or_default()
        };
        let mut result = Vec::new();
        for id in ids {
            if let Some(handle) = self.agent_handle(&id) {
                result.push(handle.read().await.clone());
            }
        }
        result
    }

    /// Snapshot of a single agent.
    pub async fn get_agent_info(&self, id: &AgentId) -> Result<Agent, RegistryError> {
        match self.agent_handle(id) {
            Some(handle) => Ok(handle.read().await.clone()),
            None => Err(RegistryError::AgentNotFound {
                identity: id.to_string(),
            }),
        }
    }

    /// Snapshots of every tracked agent.
    pub async fn all_agents(&self) -> Vec<Agent> {
        let mut result = Vec::new();
        for entry in self.agents.iter() {
            result.push(entry.value().read().await.clone());
        }
        result
    }

    /// Append a deferred task to an agent.
    pub async fn attach_deferred_task(&self, id: &AgentId, task: DeferredAgentTask) {
        if let Some(handle) = self.agent_handle(id) {
            handle.write().await.deferred_tasks.push(task);
        }
    }

    /// Unbind a zone from an agent; drop the agent when that was its
    /// last zone.
    pub async fn remove_remote_agent(&self, zone: &ZoneName, id: &AgentId) {
        {
            let mut remotes = self.remote_agents.lock().await;
            if let Some(ids) = remotes.get_mut(zone) {
                ids.retain(|existing| existing != id);
                if ids.is_empty() {
                    remotes.remove(zone);
                }
            }
        }

        let now_empty = if let Some(handle) = self.agent_handle(id) {
            let mut agent = handle.write().await;
            agent.zones.remove(zone);
            agent.zones.is_empty()
        } else {
            false
        };

        if now_empty {
            info!(identity = %id, zone = %zone, "Last zone removed, dropping agent");
            self.drop_agent(id).await;
        }
    }

    /// Remove every binding for a zone the local agent no longer
    /// participates in.
    pub async fn cleanup_zone(&self, zone: &ZoneName) {
        let ids: Vec<AgentId> = {
            let mut remotes = self.remote_agents.lock().await;
            remotes.remove(zone).unwrap_or_default()
        };

        for id in ids {
            let now_empty = if let Some(handle) = self.agent_handle(&id) {
                let mut agent = handle.write().await;
                agent.zones.remove(zone);
                agent.zones.is_empty()
            } else {
                false
            };
            if now_empty {
                self.drop_agent(&id).await;
            }
        }
        info!(zone = %zone, "Zone cleaned up");
    }

    async fn drop_agent(&self, id: &AgentId) {
        self.cancel_hello_retrier(id).await;
        self.agents.remove(id);
        crate::metrics::clear_agent_state(&id.to_string());
    }

    /// Replace any running HELLO retrier for the peer with a new one.
    pub async fn start_hello_retrier(self: &Arc<Self>, id: &AgentId, zone: &ZoneName) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let task_id = id.clone();
        let task_zone = zone.clone();
        let join = tokio::spawn(async move {
            super::hello::run_hello_retrier(registry, task_id, task_zone, cancel_rx).await;
        });

        let mut tasks = self.hello_tasks.lock().await;
        if let Some(previous) = tasks.insert(
            id.clone(),
            HelloHandle {
                cancel: cancel_tx,
                join,
            },
        ) {
            debug!(identity = %id, "Replacing running HELLO retrier");
            previous.cancel();
        }
    }

    /// Whether a HELLO retrier is currently registered for the peer.
    pub async fn hello_retrier_active(&self, id: &AgentId) -> bool {
        self.hello_tasks.lock().await.contains_key(id)
    }

    /// Cancel the peer's HELLO retrier, if one is running.
    pub async fn cancel_hello_retrier(&self, id: &AgentId) {
        if let Some(handle) = self.hello_tasks.lock().await.remove(id) {
            handle.cancel();
        }
    }

    /// Forget a finished retrier without cancelling (called by the
    /// retrier itself on success).
    pub(crate) async fn clear_hello_retrier(&self, id: &AgentId) {
        self.hello_tasks.lock().await.remove(id);
    }

    /// Cancel every retrier; used on engine shutdown.
    pub async fn shutdown(&self) {
        let mut tasks = self.hello_tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.cancel();
        }
    }
}
