// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hickory_proto::rr::Name;
use hsyncd::agent::registry::{AgentRegistry, RegistryConfig};
use hsyncd::agent::{AgentId, ZoneName};
use hsyncd::api::tls::TlsMaterial;
use hsyncd::combiner::{spawn_combiner, Combiner};
use hsyncd::engine::{engine_channels, EngineHandles, HsyncEngine};
use hsyncd::errors::DiscoveryError;
use hsyncd::resolver::{KeyInfo, Resolver, SvcbInfo, TlsaInfo, UriInfo};
use hsyncd::validator::DnssecPolicy;
use hsyncd::zonestore::{MemoryZoneStore, ZoneStore};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Resolver that never finds anything: peers stay in NEEDED.
pub struct NeverResolver;

#[async_trait]
impl Resolver for NeverResolver {
    async fn lookup_uri(&self, owner: &Name) -> Result<UriInfo, DiscoveryError> {
        Err(not_found(owner, "URI"))
    }
    async fn lookup_svcb(&self, owner: &Name) -> Result<SvcbInfo, DiscoveryError> {
        Err(not_found(owner, "SVCB"))
    }
    async fn lookup_tlsa(&self, owner: &Name) -> Result<TlsaInfo, DiscoveryError> {
        Err(not_found(owner, "TLSA"))
    }
    async fn lookup_key(&self, owner: &Name) -> Result<KeyInfo, DiscoveryError> {
        Err(not_found(owner, "KEY"))
    }
}

fn not_found(owner: &Name, qtype: &str) -> DiscoveryError {
    DiscoveryError::NotFound {
        qname: owner.to_string(),
        qtype: qtype.to_string(),
    }
}

/// Mint a self-signed certificate with the given CN.
pub fn test_material(cn: &str) -> Arc<TlsMaterial> {
    let mut params = CertificateParams::new(vec!["agent.test.example".to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    Arc::new(TlsMaterial::from_der(
        vec![cert.der().clone()],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
    ))
}

/// A fully wired engine stack over in-memory collaborators.
pub struct TestStack {
    pub registry: Arc<AgentRegistry>,
    pub zonestore: Arc<MemoryZoneStore>,
    pub combiner: Arc<Combiner>,
    pub handles: EngineHandles,
}

/// Spawn the engine and every singleton it needs, with quiet tickers.
pub fn spawn_stack(local_identity: &str) -> TestStack {
    let (handles, receivers) = engine_channels();

    let zonestore = Arc::new(MemoryZoneStore::new());
    zonestore.attach_engine(handles.sync_tx.clone());
    let combiner = Arc::new(Combiner::new());
    let combiner_handle = spawn_combiner(Arc::clone(&combiner));

    let registry = Arc::new(AgentRegistry::new(
        RegistryConfig {
            local_identity: local_identity.parse().unwrap(),
            local_beat_interval: 30,
            locate_interval: Duration::from_secs(60),
            hello_retry_interval: Duration::from_secs(60),
            dnssec_policy: DnssecPolicy::Log,
        },
        Arc::new(NeverResolver),
        test_material(local_identity),
        handles.stop_tx.subscribe(),
    ));

    let zonestore_dyn: Arc<dyn ZoneStore> = Arc::clone(&zonestore) as Arc<dyn ZoneStore>;
    let engine = HsyncEngine::new(
        Arc::clone(&registry),
        Arc::clone(&combiner),
        combiner_handle,
        zonestore_dyn,
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    );
    tokio::spawn(engine.run(receivers));

    TestStack {
        registry,
        zonestore,
        combiner,
        handles,
    }
}

pub fn id(s: &str) -> AgentId {
    AgentId::from_str(s).unwrap()
}

pub fn zone(s: &str) -> ZoneName {
    ZoneName::from_str(s).unwrap()
}

/// Poll until `predicate` holds or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
