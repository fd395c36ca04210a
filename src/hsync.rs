// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The HSYNC private DNS record type.
//!
//! An HSYNC RRset at a zone apex enumerates the agents that share
//! responsibility for that zone. Each record carries five fields:
//!
//! ```text
//! <State> <NSmgmt> <Sign> <Identity> <Upstream>
//! ```
//!
//! with `State` one of `ON`/`OFF`, `NSmgmt` one of `OWNER`/`AGENT`,
//! `Sign` one of `SIGN`/`NOSIGN`, and `Identity`/`Upstream` fully
//! qualified domain names. The wire form is three octets followed by
//! both names in uncompressed, length-prefixed label encoding.
//!
//! This module provides the record model, the wire codec, the text
//! codec, and the RRset diff used by the engine when a zone's HSYNC
//! set changes.

use crate::constants::HSYNC_RR_TYPE;
use crate::errors::HsyncParseError;
use hickory_proto::rr::{Name, RecordType};
use std::fmt;
use std::str::FromStr;

/// Whether the declaring agent is actively participating in the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HsyncState {
    /// Participation disabled
    Off = 0,
    /// Participation enabled
    On = 1,
}

/// Who manages the NS RRset for the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NsMgmt {
    /// The zone owner manages the NS set
    Owner = 1,
    /// The agents manage the NS set
    Agent = 2,
}

/// Whether the declaring agent signs the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignFlag {
    /// The agent does not sign
    NoSign = 0,
    /// The agent signs
    Sign = 1,
}

/// One HSYNC record: a single agent's membership declaration for a zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HsyncRecord {
    /// Participation state
    pub state: HsyncState,
    /// NS management mode
    pub nsmgmt: NsMgmt,
    /// Signing mode
    pub sign: SignFlag,
    /// The agent's identity (FQDN)
    pub identity: Name,
    /// The agent's upstream, or the root name `.` for none
    pub upstream: Name,
}

/// The [`RecordType`] under which HSYNC records travel.
#[must_use]
pub fn hsync_record_type() -> RecordType {
    RecordType::Unknown(HSYNC_RR_TYPE)
}

/// Parse a domain-name token, requiring canonical FQDN form.
///
/// Accepts the root name `.`. Everything else must carry a trailing
/// dot; names are lowercased on the way in.
pub fn parse_fqdn(token: &str) -> Result<Name, HsyncParseError> {
    if token != "." && !token.ends_with('.') {
        return Err(HsyncParseError::NotFqdn {
            name: token.to_string(),
        });
    }
    let name = Name::from_str(token).map_err(|_| HsyncParseError::NotFqdn {
        name: token.to_string(),
    })?;
    Ok(name.to_lowercase())
}

impl HsyncState {
    fn from_u8(v: u8) -> Result<Self, HsyncParseError> {
        match v {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            other => Err(HsyncParseError::Wire {
                reason: format!("invalid State octet {other}"),
            }),
        }
    }
}

impl NsMgmt {
    fn from_u8(v: u8) -> Result<Self, HsyncParseError> {
        match v {
            1 => Ok(Self::Owner),
            2 => Ok(Self::Agent),
            other => Err(HsyncParseError::Wire {
                reason: format!("invalid NSmgmt octet {other}"),
            }),
        }
    }
}

impl SignFlag {
    fn from_u8(v: u8) -> Result<Self, HsyncParseError> {
        match v {
            0 => Ok(Self::NoSign),
            1 => Ok(Self::Sign),
            other => Err(HsyncParseError::Wire {
                reason: format!("invalid Sign octet {other}"),
            }),
        }
    }
}

impl fmt::Display for HsyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "ON"),
            Self::Off => write!(f, "OFF"),
        }
    }
}

impl fmt::Display for NsMgmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "OWNER"),
            Self::Agent => write!(f, "AGENT"),
        }
    }
}

impl fmt::Display for SignFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sign => write!(f, "SIGN"),
            Self::NoSign => write!(f, "NOSIGN"),
        }
    }
}

impl fmt::Display for HsyncRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.state, self.nsmgmt, self.sign, self.identity, self.upstream
        )
    }
}

impl FromStr for HsyncRecord {
    type Err = HsyncParseError;

    /// Parse the five-token text form, e.g.
    /// `ON OWNER SIGN a.example. b.example.`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        if tokens.len() != 5 {
            return Err(HsyncParseError::FieldCount { got: tokens.len() });
        }

        let state = match tokens[0] {
            "ON" => HsyncState::On,
            "OFF" => HsyncState::Off,
            other => {
                return Err(HsyncParseError::UnknownToken {
                    token: other.to_string(),
                    field: "State",
                })
            }
        };
        let nsmgmt = match tokens[1] {
            "OWNER" => NsMgmt::Owner,
            "AGENT" => NsMgmt::Agent,
            other => {
                return Err(HsyncParseError::UnknownToken {
                    token: other.to_string(),
                    field: "NSmgmt",
                })
            }
        };
        let sign = match tokens[2] {
            "SIGN" => SignFlag::Sign,
            "NOSIGN" => SignFlag::NoSign,
            other => {
                return Err(HsyncParseError::UnknownToken {
                    token: other.to_string(),
                    field: "Sign",
                })
            }
        };

        Ok(Self {
            state,
            nsmgmt,
            sign,
            identity: parse_fqdn(tokens[3])?,
            upstream: parse_fqdn(tokens[4])?,
        })
    }
}

/// Append a name in uncompressed length-prefixed label form.
///
/// Standard DNS name encoding, terminated by the zero-length root
/// label. Compression pointers are never emitted for private types.
fn emit_name(out: &mut Vec<u8>, name: &Name) {
    for label in name.iter() {
        // Label length fits in u8: hickory enforces the 63-octet limit.
        out.push(label.len() as u8);
        out.extend_from_slice(label);
    }
    out.push(0);
}

/// Read one uncompressed name starting at `pos`, returning the name
/// and the position just past its terminating root label.
fn read_name(data: &[u8], mut pos: usize) -> Result<(Name, usize), HsyncParseError> {
    let mut labels: Vec<&[u8]> = Vec::new();
    loop {
        let len = *data.get(pos).ok_or_else(|| HsyncParseError::Wire {
            reason: "truncated name".to_string(),
        })? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        if len > 63 {
            return Err(HsyncParseError::Wire {
                reason: format!("label length {len} exceeds 63 (compression is not allowed)"),
            });
        }
        let label = data.get(pos..pos + len).ok_or_else(|| HsyncParseError::Wire {
            reason: "truncated label".to_string(),
        })?;
        labels.push(label);
        pos += len;
    }

    let mut name = Name::from_labels(labels).map_err(|e| HsyncParseError::Wire {
        reason: format!("invalid labels: {e}"),
    })?;
    name.set_fqdn(true);
    Ok((name.to_lowercase(), pos))
}

impl HsyncRecord {
    /// Serialize to wire form.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + 2);
        out.push(self.state as u8);
        out.push(self.nsmgmt as u8);
        out.push(self.sign as u8);
        emit_name(&mut out, &self.identity);
        emit_name(&mut out, &self.upstream);
        out
    }

    /// Deserialize from wire form.
    ///
    /// # Errors
    ///
    /// Returns [`HsyncParseError::Wire`] on truncation, trailing bytes,
    /// or out-of-range field octets.
    pub fn from_wire(data: &[u8]) -> Result<Self, HsyncParseError> {
        if data.len() < 5 {
            return Err(HsyncParseError::Wire {
                reason: format!("rdata too short ({} octets)", data.len()),
            });
        }
        let state = HsyncState::from_u8(data[0])?;
        let nsmgmt = NsMgmt::from_u8(data[1])?;
        let sign = SignFlag::from_u8(data[2])?;
        let (identity, pos) = read_name(data, 3)?;
        let (upstream, pos) = read_name(data, pos)?;
        if pos != data.len() {
            return Err(HsyncParseError::Wire {
                reason: format!("{} trailing octets after Upstream", data.len() - pos),
            });
        }
        Ok(Self {
            state,
            nsmgmt,
            sign,
            identity,
            upstream,
        })
    }

    /// True when the record's upstream field is the empty (root) name.
    #[must_use]
    pub fn has_no_upstream(&self) -> bool {
        self.upstream.is_root()
    }
}

/// The difference between two HSYNC RRsets at one apex.
///
/// A role change for an identity (same `Identity`, altered fields)
/// shows up as one entry in `adds` and one in `removes`; callers must
/// process adds before removes and treat such a pair as a change, not
/// a departure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HsyncDelta {
    /// Records present in the new set but not the old
    pub adds: Vec<HsyncRecord>,
    /// Records present in the old set but not the new
    pub removes: Vec<HsyncRecord>,
}

impl HsyncDelta {
    /// Compute the delta from `old` to `new` by full-record equality.
    #[must_use]
    pub fn between(old: &[HsyncRecord], new: &[HsyncRecord]) -> Self {
        let adds = new
            .iter()
            .filter(|r| !old.contains(r))
            .cloned()
            .collect::<Vec<_>>();
        let removes = old
            .iter()
            .filter(|r| !new.contains(r))
            .cloned()
            .collect::<Vec<_>>();
        Self { adds, removes }
    }

    /// True when nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }
}
