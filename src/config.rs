// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Configuration: CLI arguments layered over a YAML file.
//!
//! The three cadence options are clamped into their specified ranges
//! rather than rejected: `beatinterval` and `helloretry` to
//! [15, 1800] seconds, `locateinterval` to [10, 300] seconds.
//!
//! ```yaml
//! identity: agent1.example.
//! active: true
//! api:
//!   listen: 0.0.0.0:8453
//!   cert_file: /etc/hsyncd/tls/agent.crt
//!   key_file: /etc/hsyncd/tls/agent.key
//! mgmt:
//!   listen: 127.0.0.1:8454
//!   api_key: swordfish
//! intervals:
//!   beatinterval: 60
//!   locateinterval: 60
//!   helloretry: 60
//! resolver:
//!   servers: ["193.0.14.129:53"]
//! dnssec_policy: log
//! ```

use crate::agent::AgentId;
use crate::constants::{
    BEAT_INTERVAL_DEFAULT_SECS, BEAT_INTERVAL_MAX_SECS, BEAT_INTERVAL_MIN_SECS,
    HELLO_RETRY_DEFAULT_SECS, HELLO_RETRY_MAX_SECS, HELLO_RETRY_MIN_SECS,
    LOCATE_INTERVAL_DEFAULT_SECS, LOCATE_INTERVAL_MAX_SECS, LOCATE_INTERVAL_MIN_SECS,
};
use crate::validator::DnssecPolicy;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Distributed DNS zone synchronization agent.
#[derive(Debug, Parser)]
#[command(name = "hsyncd", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "/etc/hsyncd/hsyncd.yaml")]
    pub config: PathBuf,

    /// Override the agent identity from the config file
    #[arg(long)]
    pub identity: Option<String>,

    /// Override the sync API listen address
    #[arg(long)]
    pub api_listen: Option<SocketAddr>,

    /// Override the management API listen address
    #[arg(long)]
    pub mgmt_listen: Option<SocketAddr>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    identity: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    api: ApiSection,
    #[serde(default)]
    mgmt: MgmtSection,
    #[serde(default)]
    intervals: IntervalSection,
    #[serde(default)]
    resolver: ResolverSection,
    #[serde(default)]
    dnssec_policy: DnssecPolicy,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct ApiSection {
    listen: Option<SocketAddr>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct MgmtSection {
    listen: Option<SocketAddr>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IntervalSection {
    beatinterval: Option<u64>,
    locateinterval: Option<u64>,
    helloretry: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolverSection {
    #[serde(default)]
    servers: Vec<SocketAddr>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The local agent identity
    pub identity: AgentId,
    /// Whether synchronization is active
    pub active: bool,
    /// Sync API listen address
    pub api_listen: SocketAddr,
    /// PEM certificate chain path
    pub cert_file: PathBuf,
    /// PEM private key path
    pub key_file: PathBuf,
    /// Management API listen address
    pub mgmt_listen: SocketAddr,
    /// Management shared secret
    pub mgmt_api_key: String,
    /// Heartbeat cadence, seconds (clamped)
    pub beat_interval: u64,
    /// Locator retry cadence, seconds (clamped)
    pub locate_interval: u64,
    /// HELLO retry cadence, seconds (clamped)
    pub hello_retry: u64,
    /// Recursive resolver addresses
    pub resolver_servers: Vec<SocketAddr>,
    /// DNSSEC policy for discovered material
    pub dnssec_policy: DnssecPolicy,
}

/// Clamp a configured interval into its permitted range.
#[must_use]
pub fn clamp_interval(value: Option<u64>, default: u64, min: u64, max: u64) -> u64 {
    value.unwrap_or(default).clamp(min, max)
}

impl Config {
    /// Load the YAML file and apply CLI overrides.
    ///
    /// # Errors
    ///
    /// Unreadable or unparsable file, or missing required fields
    /// (identity, TLS material paths, management secret).
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = Self::read_file(&cli.config)?;

        let identity = cli
            .identity
            .clone()
            .or(file.identity)
            .context("no agent identity configured")?;
        let identity: AgentId = identity
            .parse()
            .with_context(|| format!("invalid agent identity '{identity}'"))?;

        let cert_file = file.api.cert_file.context("api.cert_file not configured")?;
        let key_file = file.api.key_file.context("api.key_file not configured")?;
        let mgmt_api_key = file.mgmt.api_key.context("mgmt.api_key not configured")?;

        Ok(Self {
            identity,
            active: file.active,
            api_listen: cli
                .api_listen
                .or(file.api.listen)
                .unwrap_or_else(|| "0.0.0.0:8453".parse().expect("static addr")),
            cert_file,
            key_file,
            mgmt_listen: cli
                .mgmt_listen
                .or(file.mgmt.listen)
                .unwrap_or_else(|| "127.0.0.1:8454".parse().expect("static addr")),
            mgmt_api_key,
            beat_interval: clamp_interval(
                file.intervals.beatinterval,
                BEAT_INTERVAL_DEFAULT_SECS,
                BEAT_INTERVAL_MIN_SECS,
                BEAT_INTERVAL_MAX_SECS,
            ),
            locate_interval: clamp_interval(
                file.intervals.locateinterval,
                LOCATE_INTERVAL_DEFAULT_SECS,
                LOCATE_INTERVAL_MIN_SECS,
                LOCATE_INTERVAL_MAX_SECS,
            ),
            hello_retry: clamp_interval(
                file.intervals.helloretry,
                HELLO_RETRY_DEFAULT_SECS,
                HELLO_RETRY_MIN_SECS,
                HELLO_RETRY_MAX_SECS,
            ),
            resolver_servers: if file.resolver.servers.is_empty() {
                vec!["127.0.0.1:53".parse().expect("static addr")]
            } else {
                file.resolver.servers
            },
            dnssec_policy: file.dnssec_policy,
        })
    }

    fn read_file(path: &Path) -> Result<FileConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Redacted view for the `/config` endpoint; the shared secret
    /// never leaves the process.
    #[must_use]
    pub fn redacted_view(&self) -> serde_json::Value {
        json!({
            "identity": self.identity.to_string(),
            "active": self.active,
            "api": {
                "listen": self.api_listen.to_string(),
                "cert_file": self.cert_file.display().to_string(),
            },
            "mgmt": {
                "listen": self.mgmt_listen.to_string(),
                "api_key": "<redacted>",
            },
            "intervals": {
                "beatinterval": self.beat_interval,
                "locateinterval": self.locate_interval,
                "helloretry": self.hello_retry,
            },
            "resolver": {
                "servers": self.resolver_servers.iter().map(ToString::to_string).collect::<Vec<_>>(),
            },
            "dnssec_policy": self.dnssec_policy.to_string(),
        })
    }
}
