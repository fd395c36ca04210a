// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! DNS-driven discovery of one peer agent.
//!
//! The locator runs an unbounded retry loop for a single peer. Each
//! tick launches lookups for every piece of contact information still
//! missing:
//!
//! 1. URI `_https._tcp.<id>` and URI `_dns._tcp.<id>`
//! 2. SVCB on each base URI's host (addresses, port, target host)
//! 3. TLSA `_<port>._tcp.<target>` for the HTTPS transport
//! 4. KEY `<target>` for the DNS transport
//!
//! A transport is complete once it has a URI, its authentication
//! material, and at least one address. Completing the HTTPS transport
//! moves the agent to KNOWN, builds the TLSA-pinned HTTPS client, and
//! arms the HELLO retrier; only then does the loop exit. A failed
//! client construction is fatal and parks the agent in ERROR.

use super::registry::AgentRegistry;
use super::{AgentId, AgentState, ContactInfo, Transport, ZoneName};
use crate::api::tls;
use crate::constants::DEFAULT_API_PORT;
use crate::errors::DiscoveryError;
use crate::resolver::{self, SvcbInfo, UriInfo};
use crate::validator::DnssecPolicy;
use hickory_proto::rr::Name;
use rand::RngExt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Outcome of one discovery tick.
enum LocateOutcome {
    /// HTTPS transport complete, agent now KNOWN
    Known,
    /// Something is still missing; retry at the next tick
    Incomplete,
    /// Unrecoverable, agent parked in ERROR
    Fatal,
}

/// Drive discovery of `id` until it reaches KNOWN or fails fatally.
pub async fn run_locator(registry: Arc<AgentRegistry>, id: AgentId, zone: Option<ZoneName>) {
    let mut stop = registry.stop_signal();
    let interval = registry.locate_interval();

    loop {
        if *stop.borrow() {
            return;
        }

        match locate_tick(&registry, &id, zone.as_ref()).await {
            LocateOutcome::Known => {
                info!(identity = %id, "Agent discovery complete");
                return;
            }
            LocateOutcome::Fatal => {
                warn!(identity = %id, "Agent discovery failed fatally");
                return;
            }
            LocateOutcome::Incomplete => {
                crate::metrics::record_discovery_retry(&id.to_string());
            }
        }

        // Spread retries out a little so a fleet restart doesn't make
        // every agent hammer the resolver in lockstep.
        let jitter = rand::rng().random_range(0.9..=1.1);
        let sleep = interval.mul_f64(jitter);
        tokio::select! {
            () = tokio::time::sleep(sleep) => {}
            _ = stop.changed() => return,
        }
    }
}

/// One pass over the missing pieces for both transports.
async fn locate_tick(
    registry: &Arc<AgentRegistry>,
    id: &AgentId,
    zone: Option<&ZoneName>,
) -> LocateOutcome {
    let Some(handle) = registry.agent_handle(id) else {
        // Agent was removed while we slept; nothing left to do.
        return LocateOutcome::Fatal;
    };

    let resolver = Arc::clone(registry.resolver());
    let (api_snapshot, dns_snapshot) = {
        let agent = handle.read().await;
        (agent.api_details.clone(), agent.dns_details.clone())
    };

    // Step 1: base URIs, fetched concurrently when missing.
    let api_uri_owner = resolver::https_uri_owner(id.name());
    let dns_uri_owner = resolver::dns_uri_owner(id.name());
    let (api_uri, dns_uri) = tokio::join!(
        fetch_if_missing(api_snapshot.uri.clone(), resolver.lookup_uri(&api_uri_owner)),
        fetch_if_missing(dns_snapshot.uri.clone(), resolver.lookup_uri(&dns_uri_owner)),
    );

    // Step 2: SVCB per transport host, concurrently when needed.
    let api_host = api_uri.as_ref().and_then(|u| uri_host(u));
    let dns_host = dns_uri.as_ref().and_then(|u| uri_host(u));
    let (api_svcb, dns_svcb) = tokio::join!(
        fetch_svcb(&*resolver, api_host.as_ref(), &api_snapshot),
        fetch_svcb(&*resolver, dns_host.as_ref(), &dns_snapshot),
    );

    // Fold what we have so far into the agent before the auth lookups,
    // so a partially-discovered transport survives a later failure.
    {
        let mut agent = handle.write().await;
        apply_endpoint(
            agent.details_mut(Transport::Api),
            api_uri.clone(),
            api_svcb.clone(),
        );
        apply_endpoint(
            agent.details_mut(Transport::Dns),
            dns_uri.clone(),
            dns_svcb.clone(),
        );
    }

    // Step 3: authentication material.
    let tlsa_owner = {
        let agent = handle.read().await;
        match (&agent.api_details.host, agent.api_details.port) {
            (Some(host), Some(port)) if agent.api_details.tlsa.is_none() => {
                Some(resolver::tlsa_owner(host, port))
            }
            _ => None,
        }
    };
    let key_owner = {
        let agent = handle.read().await;
        match &agent.dns_details.host {
            Some(host) if agent.dns_details.key.is_none() => Some(host.clone()),
            _ => None,
        }
    };

    let (tlsa, key) = tokio::join!(
        async {
            match &tlsa_owner {
                Some(owner) => log_outcome("TLSA", resolver.lookup_tlsa(owner).await),
                None => None,
            }
        },
        async {
            match &key_owner {
                Some(owner) => log_outcome("KEY", resolver.lookup_key(owner).await),
                None => None,
            }
        },
    );

    let policy = registry.dnssec_policy();
    let mut agent = handle.write().await;

    if let Some(tlsa) = tlsa {
        if policy == DnssecPolicy::Require && !tlsa.validated {
            warn!(
                identity = %id,
                "TLSA RRset did not validate and policy is 'require', discarding"
            );
        } else {
            agent.api_details.tlsa = Some(tlsa);
        }
    }
    if let Some(key) = key {
        if policy == DnssecPolicy::Require && !key.validated {
            warn!(
                identity = %id,
                "KEY RRset did not validate and policy is 'require', discarding"
            );
        } else {
            agent.dns_details.key = Some(key);
        }
    }

    // DNS transport completeness is recorded but never gates KNOWN.
    if agent.dns_details.uri.is_some()
        && agent.dns_details.key.is_some()
        && !agent.dns_details.addrs.is_empty()
    {
        agent.dns_details.contact_info = ContactInfo::Complete;
        agent.dns_details.state = Some(AgentState::Known);
        if !agent.dns_supported {
            debug!(identity = %id, "DNS transport complete");
            agent.dns_supported = true;
        }
    }

    let api_complete = agent.api_details.uri.is_some() && !agent.api_details.addrs.is_empty();
    let Some(tlsa_info) = agent.api_details.tlsa.clone() else {
        return LocateOutcome::Incomplete;
    };
    if !api_complete {
        return LocateOutcome::Incomplete;
    }

    // HTTPS transport complete: pin a client to the TLSA record. The
    // system trust chain is intentionally bypassed; TLSA is the root
    // of trust for peer connections.
    match tls::build_peer_client(id, &tlsa_info, registry.tls_material()) {
        Ok(client) => {
            agent.api_details.client = Some(client);
            agent.api_details.contact_info = ContactInfo::Complete;
            agent.api_details.state = Some(AgentState::Known);
            agent.api_supported = true;
            agent.set_state(AgentState::Known);
        }
        Err(e) => {
            let err = DiscoveryError::ClientConstruction {
                identity: id.to_string(),
                reason: e.to_string(),
            };
            agent.set_error(err.to_string());
            return LocateOutcome::Fatal;
        }
    }
    drop(agent);

    if let Some(zone) = zone {
        registry.cancel_hello_retrier(id).await;
        registry.start_hello_retrier(id, zone).await;
    }

    LocateOutcome::Known
}

/// Run `lookup` only when `current` is missing; log failures and keep
/// going, the outer loop retries next tick.
async fn fetch_if_missing(
    current: Option<UriInfo>,
    lookup: impl std::future::Future<Output = Result<UriInfo, DiscoveryError>>,
) -> Option<UriInfo> {
    if current.is_some() {
        return current;
    }
    log_outcome("URI", lookup.await)
}

async fn fetch_svcb(
    resolver: &dyn crate::resolver::Resolver,
    host: Option<&Name>,
    details: &super::AgentDetails,
) -> Option<SvcbInfo> {
    if !details.addrs.is_empty() {
        return None;
    }
    let owner = host.or(details.host.as_ref())?;
    log_outcome("SVCB", resolver.lookup_svcb(owner).await)
}

fn log_outcome<T>(qtype: &str, result: Result<T, DiscoveryError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(qtype = qtype, error = %e, "Discovery lookup incomplete");
            None
        }
    }
}

fn apply_endpoint(
    details: &mut super::AgentDetails,
    uri: Option<UriInfo>,
    svcb: Option<SvcbInfo>,
) {
    if let Some(uri) = uri {
        if details.uri.is_none() {
            // The URI's own port stands in until SVCB says otherwise.
            if details.port.is_none() {
                details.port = uri_port(&uri);
            }
            if details.host.is_none() {
                details.host = uri_host(&uri);
            }
            details.uri = Some(uri);
            details.contact_info = ContactInfo::Partial;
        }
    }
    if let Some(svcb) = svcb {
        details.apply_svcb(&svcb, details.port.unwrap_or(DEFAULT_API_PORT));
        details.contact_info = ContactInfo::Partial;
    }
}

fn uri_host(uri: &UriInfo) -> Option<Name> {
    let url = Url::parse(&uri.target).ok()?;
    let host = url.host_str()?;
    Name::from_str(host).ok().map(|n| {
        let mut n = n.to_lowercase();
        n.set_fqdn(true);
        n
    })
}

fn uri_port(uri: &UriInfo) -> Option<u16> {
    let url = Url::parse(&uri.target).ok()?;
    url.port_or_known_default()
}
