// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! DNSSEC validation seam.
//!
//! The fabric consumes validation as a boolean: an RRset either
//! validated or it did not. The actual validation algorithm lives
//! behind [`DnssecValidator`]; this crate only ships policy shells.

use anyhow::Result;
use async_trait::async_trait;
use hickory_proto::rr::Record;
use serde::Deserialize;
use std::fmt;
use tracing::warn;

/// What to do with discovery material that did not validate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnssecPolicy {
    /// No validation at all
    Off,
    /// Validate, log failures, use the material anyway
    #[default]
    Log,
    /// Refuse material that did not validate
    Require,
}

impl fmt::Display for DnssecPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Log => write!(f, "log"),
            Self::Require => write!(f, "require"),
        }
    }
}

/// Boolean-result DNSSEC validation of an RRset.
#[async_trait]
pub trait DnssecValidator: Send + Sync {
    /// Returns whether the RRset is considered validated.
    async fn validate(&self, rrset: &[Record]) -> Result<bool>;
}

/// Validator shell selected by [`DnssecPolicy`].
///
/// With policy `off` every RRset counts as unvalidated without being
/// examined; the other policies require a real validator to be wired
/// behind this seam by the embedding process. Until one is, RRsets
/// are reported unvalidated and `require` therefore refuses TLSA/KEY
/// material, which fails closed.
pub struct PolicyValidator {
    policy: DnssecPolicy,
}

impl PolicyValidator {
    /// Create a validator shell for the configured policy.
    #[must_use]
    pub fn new(policy: DnssecPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl DnssecValidator for PolicyValidator {
    async fn validate(&self, rrset: &[Record]) -> Result<bool> {
        match self.policy {
            DnssecPolicy::Off => Ok(false),
            DnssecPolicy::Log | DnssecPolicy::Require => {
                if let Some(record) = rrset.first() {
                    warn!(
                        owner = %record.name(),
                        rtype = %record.record_type(),
                        policy = %self.policy,
                        "No DNSSEC validator wired, treating RRset as unvalidated"
                    );
                }
                Ok(false)
            }
        }
    }
}
