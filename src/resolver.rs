// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Recursive DNS resolution for agent discovery.
//!
//! Discovery needs four record types per peer identity `I`:
//!
//! | Name                    | Type | Meaning                             |
//! |-------------------------|------|-------------------------------------|
//! | `_https._tcp.I`         | URI  | Base URI for the HTTPS API          |
//! | `_dns._tcp.I`           | URI  | Base URI for the DNS transport      |
//! | `<target>`              | SVCB | Address hints + port for a target   |
//! | `_<port>._tcp.<target>` | TLSA | Certificate association (HTTPS)     |
//! | `<target>`              | KEY  | SIG(0) public key (DNS transport)   |
//!
//! The [`Resolver`] trait is the seam the locator consumes; the
//! production implementation queries a recursive resolver with
//! hickory's synchronous client on the blocking pool, with a short
//! per-query timeout and a bounded retry count.

use crate::constants::{DNS_QUERY_RETRIES, DNS_QUERY_TIMEOUT_SECS};
use crate::errors::DiscoveryError;
use crate::validator::DnssecValidator;
use async_trait::async_trait;
use hickory_client::client::{Client, SyncClient};
use hickory_client::udp::UdpClientConnection;
use hickory_proto::rr::dnssec::rdata::DNSSECRData;
use hickory_proto::rr::rdata::svcb::SvcParamValue;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Type code of the URI record (RFC 7553); hickory has no native rdata
/// for it, so it travels as an unknown type.
pub const URI_RR_TYPE: u16 = 256;

/// A decoded URI record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriInfo {
    /// Record priority
    pub priority: u16,
    /// Record weight
    pub weight: u16,
    /// The target URI, e.g. `https://host.example.:8453/api/v1`
    pub target: String,
}

/// The endpoint pieces decoded from an SVCB RRset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SvcbInfo {
    /// The (possibly aliased) target host
    pub target: Name,
    /// Port parameter, when present
    pub port: Option<u16>,
    /// IPv4/IPv6 hints
    pub addrs: Vec<IpAddr>,
}

/// A TLSA certificate association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsaInfo {
    /// Certificate usage field
    pub usage: u8,
    /// Selector field (0 = full certificate, 1 = SPKI)
    pub selector: u8,
    /// Matching type (0 = exact, 1 = SHA-256, 2 = SHA-512)
    pub matching: u8,
    /// Association data
    pub data: Vec<u8>,
    /// Whether the RRset passed DNSSEC validation
    pub validated: bool,
}

/// A SIG(0) public key from a KEY record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// DNSSEC algorithm number
    pub algorithm: u8,
    /// Raw public key material
    pub public_key: Vec<u8>,
    /// Whether the RRset passed DNSSEC validation
    pub validated: bool,
}

/// The lookups discovery needs, typed.
///
/// `NotFound` is a distinct outcome from transport failure so the
/// locator can log the difference; both leave the peer in NEEDED.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Look up the URI record at `owner` (e.g. `_https._tcp.<id>`).
    async fn lookup_uri(&self, owner: &Name) -> Result<UriInfo, DiscoveryError>;

    /// Look up SVCB for a target host.
    async fn lookup_svcb(&self, owner: &Name) -> Result<SvcbInfo, DiscoveryError>;

    /// Look up TLSA at `_<port>._tcp.<target>`.
    async fn lookup_tlsa(&self, owner: &Name) -> Result<TlsaInfo, DiscoveryError>;

    /// Look up the SIG(0) KEY record at the target host.
    async fn lookup_key(&self, owner: &Name) -> Result<KeyInfo, DiscoveryError>;
}

/// Production resolver backed by hickory's synchronous UDP client.
///
/// Queries run on the blocking pool; each attempt carries a 2 s
/// timeout and each lookup makes up to three attempts, rotating
/// through the configured servers.
pub struct HickoryResolver {
    servers: Vec<SocketAddr>,
    timeout: Duration,
    retries: u32,
    validator: Arc<dyn DnssecValidator>,
}

impl HickoryResolver {
    /// Create a resolver over the given recursive servers.
    #[must_use]
    pub fn new(servers: Vec<SocketAddr>, validator: Arc<dyn DnssecValidator>) -> Self {
        Self {
            servers,
            timeout: Duration::from_secs(DNS_QUERY_TIMEOUT_SECS),
            retries: DNS_QUERY_RETRIES,
            validator,
        }
    }

    /// Raw lookup returning the answer records of the requested type.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::NotFound`] when the final attempt yields an
    /// empty answer section; [`DiscoveryError::LookupFailed`] when all
    /// attempts fail at the transport level.
    pub async fn query(
        &self,
        qname: &Name,
        qtype: RecordType,
    ) -> Result<Vec<Record>, DiscoveryError> {
        if self.servers.is_empty() {
            return Err(DiscoveryError::LookupFailed {
                qname: qname.to_string(),
                qtype: format!("{qtype}"),
                reason: "no resolver servers configured".to_string(),
            });
        }
        let mut last_err = String::new();

        for attempt in 0..self.retries {
            let server = self.servers[attempt as usize % self.servers.len()];
            let qname_task = qname.clone();
            let timeout = self.timeout;

            let result = tokio::task::spawn_blocking(move || {
                let conn = UdpClientConnection::with_timeout(server, timeout)
                    .map_err(|e| e.to_string())?;
                let client = SyncClient::new(conn);
                let response = client
                    .query(&qname_task, DNSClass::IN, qtype)
                    .map_err(|e| e.to_string())?;
                let answers: Vec<Record> = response
                    .answers()
                    .iter()
                    .filter(|r| r.record_type() == qtype)
                    .cloned()
                    .collect();
                Ok::<_, String>(answers)
            })
            .await
            .map_err(|e| DiscoveryError::LookupFailed {
                qname: qname.to_string(),
                qtype: format!("{qtype}"),
                reason: format!("query task failed: {e}"),
            })?;

            match result {
                Ok(answers) if !answers.is_empty() => {
                    crate::metrics::record_discovery_lookup(&format!("{qtype}"), "ok");
                    return Ok(answers);
                }
                Ok(_) => {
                    crate::metrics::record_discovery_lookup(&format!("{qtype}"), "notfound");
                    return Err(DiscoveryError::NotFound {
                        qname: qname.to_string(),
                        qtype: format!("{qtype}"),
                    });
                }
                Err(e) => {
                    debug!(
                        qname = %qname,
                        qtype = %qtype,
                        attempt = attempt + 1,
                        error = %e,
                        "DNS lookup attempt failed"
                    );
                    last_err = e;
                }
            }
        }

        crate::metrics::record_discovery_lookup(&format!("{qtype}"), "error");
        Err(DiscoveryError::LookupFailed {
            qname: qname.to_string(),
            qtype: format!("{qtype}"),
            reason: last_err,
        })
    }

    async fn validate(&self, rrset: &[Record]) -> bool {
        match self.validator.validate(rrset).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "DNSSEC validation errored, treating RRset as unvalidated");
                false
            }
        }
    }
}

#[async_trait]
impl Resolver for HickoryResolver {
    async fn lookup_uri(&self, owner: &Name) -> Result<UriInfo, DiscoveryError> {
        let answers = self.query(owner, RecordType::Unknown(URI_RR_TYPE)).await?;
        let mut uris: Vec<UriInfo> = answers
            .iter()
            .filter_map(decode_uri_rdata)
            .collect();
        if uris.is_empty() {
            return Err(DiscoveryError::UnusableRecord {
                qname: owner.to_string(),
                qtype: "URI".to_string(),
                reason: "no decodable URI rdata".to_string(),
            });
        }
        // Lowest priority wins; weight is a tiebreaker we don't spread over.
        uris.sort_by_key(|u| (u.priority, std::cmp::Reverse(u.weight)));
        Ok(uris.remove(0))
    }

    async fn lookup_svcb(&self, owner: &Name) -> Result<SvcbInfo, DiscoveryError> {
        let answers = self.query(owner, RecordType::SVCB).await?;
        let mut info = SvcbInfo::default();

        for record in &answers {
            let Some(RData::SVCB(svcb)) = record.data() else {
                continue;
            };
            info.target = if svcb.target_name().is_root() {
                // Per RFC 9460 a root target means "the owner itself".
                record.name().clone()
            } else {
                svcb.target_name().clone()
            };
            for (_key, value) in svcb.svc_params() {
                match value {
                    SvcParamValue::Port(port) => info.port = Some(*port),
                    SvcParamValue::Ipv4Hint(hints) => {
                        info.addrs
                            .extend(hints.0.iter().map(|a| IpAddr::V4(a.0)));
                    }
                    SvcParamValue::Ipv6Hint(hints) => {
                        info.addrs
                            .extend(hints.0.iter().map(|a| IpAddr::V6(a.0)));
                    }
                    _ => {}
                }
            }
        }

        if info.addrs.is_empty() {
            return Err(DiscoveryError::UnusableRecord {
                qname: owner.to_string(),
                qtype: "SVCB".to_string(),
                reason: "no address hints".to_string(),
            });
        }
        Ok(info)
    }

    async fn lookup_tlsa(&self, owner: &Name) -> Result<TlsaInfo, DiscoveryError> {
        let answers = self.query(owner, RecordType::TLSA).await?;
        let validated = self.validate(&answers).await;

        for record in &answers {
            if let Some(RData::TLSA(tlsa)) = record.data() {
                return Ok(TlsaInfo {
                    usage: tlsa.cert_usage().into(),
                    selector: tlsa.selector().into(),
                    matching: tlsa.matching().into(),
                    data: tlsa.cert_data().to_vec(),
                    validated,
                });
            }
        }
        Err(DiscoveryError::UnusableRecord {
            qname: owner.to_string(),
            qtype: "TLSA".to_string(),
            reason: "no decodable TLSA rdata".to_string(),
        })
    }

    async fn lookup_key(&self, owner: &Name) -> Result<KeyInfo, DiscoveryError> {
        let answers = self.query(owner, RecordType::KEY).await?;
        let validated = self.validate(&answers).await;

        for record in &answers {
            if let Some(RData::DNSSEC(DNSSECRData::KEY(key))) = record.data() {
                return Ok(KeyInfo {
                    algorithm: key.algorithm().into(),
                    public_key: key.public_key().to_vec(),
                    validated,
                });
            }
        }
        Err(DiscoveryError::UnusableRecord {
            qname: owner.to_string(),
            qtype: "KEY".to_string(),
            reason: "no decodable KEY rdata".to_string(),
        })
    }
}

/// Decode RFC 7553 URI rdata: priority, weight, then the target bytes.
fn decode_uri_rdata(record: &Record) -> Option<UriInfo> {
    let Some(RData::Unknown { code, rdata }) = record.data() else {
        return None;
    };
    if *code != RecordType::Unknown(URI_RR_TYPE) {
        return None;
    }
    let bytes = rdata.anything();
    if bytes.len() < 5 {
        return None;
    }
    let priority = u16::from_be_bytes([bytes[0], bytes[1]]);
    let weight = u16::from_be_bytes([bytes[2], bytes[3]]);
    let target = String::from_utf8(bytes[4..].to_vec()).ok()?;
    Some(UriInfo {
        priority,
        weight,
        target,
    })
}

/// Owner name of the HTTPS-API URI record for an identity.
#[must_use]
pub fn https_uri_owner(identity: &Name) -> Name {
    prefixed(identity, &["_https", "_tcp"])
}

/// Owner name of the DNS-transport URI record for an identity.
#[must_use]
pub fn dns_uri_owner(identity: &Name) -> Name {
    prefixed(identity, &["_dns", "_tcp"])
}

/// Owner name of the TLSA record for a target host and port.
#[must_use]
pub fn tlsa_owner(target: &Name, port: u16) -> Name {
    prefixed(target, &[&format!("_{port}"), "_tcp"])
}

fn prefixed(base: &Name, labels: &[&str]) -> Name {
    // Labels here are fixed underscore prefixes; they always parse.
    let prefix = Name::from_str(&labels.join(".")).expect("static labels");
    prefix.append_domain(base).expect("name within length limits")
}
