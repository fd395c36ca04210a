// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the synchronization fabric.
//!
//! This module provides specialized error types for:
//! - Agent discovery (DNS lookups, TLS client construction)
//! - Inbound updates handed to the combiner
//! - Peer authentication on the sync API
//! - Engine channel plumbing
//!
//! These errors provide structured error handling across the fabric,
//! enabling better error reporting in responses and metrics.

use thiserror::Error;

/// Errors that can occur while discovering a peer agent through DNS.
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    /// A DNS lookup required for discovery failed or timed out
    ///
    /// The locator retries these at the next tick; the peer stays in NEEDED.
    #[error("Lookup of {qtype} {qname} failed: {reason}")]
    LookupFailed {
        /// The queried name
        qname: String,
        /// The queried record type (URI, SVCB, TLSA, KEY)
        qtype: String,
        /// Specific reason for the failure
        reason: String,
    },

    /// The queried name exists but holds no records of the wanted type
    #[error("No {qtype} records found at {qname}")]
    NotFound {
        /// The queried name
        qname: String,
        /// The queried record type
        qtype: String,
    },

    /// A discovered record could not be interpreted
    ///
    /// Covers malformed URI targets, SVCB sets without addresses, and
    /// TLSA parameters this agent does not support.
    #[error("Unusable {qtype} record at {qname}: {reason}")]
    UnusableRecord {
        /// The queried name
        qname: String,
        /// The record type that was unusable
        qtype: String,
        /// Explanation of what is wrong
        reason: String,
    },

    /// HTTPS client construction failed after the peer reached KNOWN
    ///
    /// This is fatal for the peer: its state becomes ERROR and the
    /// locator gives up.
    #[error("Failed to build HTTPS client for {identity}: {reason}")]
    ClientConstruction {
        /// The peer identity
        identity: String,
        /// Specific reason for the failure
        reason: String,
    },
}

impl DiscoveryError {
    /// Returns true if the locator should retry at the next interval.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::ClientConstruction { .. })
    }
}

/// Errors raised when an inbound zone update is rejected.
#[derive(Error, Debug, Clone)]
pub enum UpdateError {
    /// The update violated combiner policy (type or owner name)
    ///
    /// Surfaced to the sender with a human-readable reason. Not retried.
    #[error("Update for zone '{zone}' rejected: {reason}")]
    InvalidUpdate {
        /// The zone the update targeted
        zone: String,
        /// Human-readable policy violation
        reason: String,
    },

    /// The referenced zone is not hosted by this agent
    #[error("Zone '{zone}' is not known to this agent")]
    UnknownZone {
        /// The unknown zone name
        zone: String,
    },

    /// An enclosed record's textual form could not be parsed
    ///
    /// Any parse failure aborts the whole update.
    #[error("Failed to parse record '{record}': {reason}")]
    ParseFailure {
        /// The offending record string
        record: String,
        /// Parser diagnostic
        reason: String,
    },
}

impl UpdateError {
    /// Returns the short reason code used in response envelopes and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidUpdate { .. } => "InvalidUpdate",
            Self::UnknownZone { .. } => "UnknownZone",
            Self::ParseFailure { .. } => "ParseFailure",
        }
    }
}

/// Peer authentication failures on the agent-to-agent API.
///
/// Any of these results in HTTP 401 and the connection being dropped.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    /// The client presented no certificate
    #[error("No client certificate presented")]
    MissingCertificate,

    /// The certificate's Common Name does not match a known agent identity
    #[error("Certificate CN '{cn}' does not match any known agent")]
    UnknownPeer {
        /// The CN the client presented
        cn: String,
    },

    /// The certificate's Common Name does not equal the expected identity
    #[error("Certificate CN '{cn}' does not match expected identity '{expected}'")]
    CnMismatch {
        /// The CN the peer presented
        cn: String,
        /// The identity we expected
        expected: String,
    },

    /// The certificate does not match the peer's TLSA record
    #[error("Certificate for '{identity}' does not match its TLSA record")]
    TlsaMismatch {
        /// The peer identity whose TLSA was checked
        identity: String,
    },

    /// The certificate could not be parsed at all
    #[error("Malformed client certificate: {reason}")]
    MalformedCertificate {
        /// Parser diagnostic
        reason: String,
    },

    /// No TLSA record is on file for the peer yet
    #[error("No TLSA record known for '{identity}'")]
    NoTlsaOnFile {
        /// The peer identity
        identity: String,
    },
}

/// Errors in the engine's channel plumbing.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// A non-essential request channel was full
    #[error("Engine channel '{channel}' is full, request dropped")]
    ChannelFull {
        /// Which channel was full
        channel: &'static str,
    },

    /// No response arrived within the response timeout
    #[error("Timed out after {timeout_secs}s waiting for {what}")]
    ResponseTimeout {
        /// What was being waited for
        what: &'static str,
        /// The timeout that elapsed
        timeout_secs: u64,
    },

    /// The engine is shutting down
    #[error("Engine is shutting down")]
    Shutdown,
}

/// Errors parsing the HSYNC record's wire or text form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HsyncParseError {
    /// A symbolic token was not one of the recognized mnemonics
    #[error("Unknown token '{token}' in field {field}")]
    UnknownToken {
        /// The offending token
        token: String,
        /// Which field it was parsed for
        field: &'static str,
    },

    /// A domain-name field did not hold a fully-qualified name
    #[error("'{name}' is not a fully-qualified domain name")]
    NotFqdn {
        /// The offending name
        name: String,
    },

    /// Wrong number of whitespace-separated tokens in the text form
    #[error("Expected 5 fields, got {got}")]
    FieldCount {
        /// How many fields were present
        got: usize,
    },

    /// The wire form was truncated or carried trailing garbage
    #[error("Malformed wire data: {reason}")]
    Wire {
        /// Codec diagnostic
        reason: String,
    },
}

/// Errors returned by agent registry lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No agent with the given identity exists in the registry
    #[error("Agent '{identity}' not found")]
    AgentNotFound {
        /// The identity that was looked up
        identity: String,
    },

    /// The operation would have created an agent for our own identity
    #[error("Refusing to track the local identity '{identity}' as a remote agent")]
    SelfIdentity {
        /// The local identity
        identity: String,
    },
}
