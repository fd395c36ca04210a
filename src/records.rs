// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Apex resource-record model for inbound zone updates.
//!
//! Peers ship records over the sync API in textual presentation form,
//! one record per string (`owner [ttl] [IN] TYPE rdata...`). This
//! module parses those strings into a typed form, groups them by
//! record type into a [`ZoneUpdate`], and leaves policy decisions to
//! the combiner.
//!
//! Only presentation-form parsing is done here; the rdata itself is
//! kept verbatim. The combiner stores and replaces whole RRsets, so
//! rdata opacity is sufficient for synchronization.

use crate::errors::UpdateError;
use hickory_proto::rr::{Name, RecordType};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Default TTL applied when a record string carries none.
const DEFAULT_RR_TTL: u32 = 3600;

/// One resource record in presentation form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrEntry {
    /// Owner name (canonical FQDN, lowercased)
    pub owner: Name,
    /// Time to live in seconds
    pub ttl: u32,
    /// Record type
    pub rtype: RecordType,
    /// Rdata in presentation form, verbatim
    pub rdata: String,
}

impl fmt::Display for RrEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} IN {} {}",
            self.owner, self.ttl, self.rtype, self.rdata
        )
    }
}

impl FromStr for RrEntry {
    type Err = UpdateError;

    /// Parse `owner [ttl] [IN] TYPE rdata...`.
    ///
    /// The class, when present, must be `IN`. The owner must be a
    /// fully-qualified name. Everything after the type token is kept
    /// as opaque rdata.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = |reason: String| UpdateError::ParseFailure {
            record: s.to_string(),
            reason,
        };

        let mut tokens = s.split_whitespace().peekable();

        let owner_tok = tokens
            .next()
            .ok_or_else(|| parse_err("empty record".to_string()))?;
        if !owner_tok.ends_with('.') {
            return Err(parse_err(format!(
                "owner '{owner_tok}' is not fully qualified"
            )));
        }
        let owner = Name::from_str(owner_tok)
            .map_err(|e| parse_err(format!("bad owner name: {e}")))?
            .to_lowercase();

        let mut ttl = DEFAULT_RR_TTL;
        if let Some(tok) = tokens.peek() {
            if let Ok(v) = tok.parse::<u32>() {
                ttl = v;
                tokens.next();
            }
        }
        if let Some(tok) = tokens.peek() {
            if tok.eq_ignore_ascii_case("IN") {
                tokens.next();
            }
        }

        let type_tok = tokens
            .next()
            .ok_or_else(|| parse_err("missing record type".to_string()))?;
        let rtype = RecordType::from_str(&type_tok.to_ascii_uppercase())
            .map_err(|_| parse_err(format!("unrecognized record type '{type_tok}'")))?;

        let rdata = tokens.collect::<Vec<_>>().join(" ");
        if rdata.is_empty() {
            return Err(parse_err("missing rdata".to_string()));
        }

        Ok(Self {
            owner,
            ttl,
            rtype,
            rdata,
        })
    }
}

/// A batch of apex RRsets, grouped by record type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneUpdate {
    /// The latest full RRset per record type
    pub rrsets: HashMap<RecordType, Vec<RrEntry>>,
}

impl ZoneUpdate {
    /// Group parsed entries by record type.
    #[must_use]
    pub fn from_entries(entries: Vec<RrEntry>) -> Self {
        let mut rrsets: HashMap<RecordType, Vec<RrEntry>> = HashMap::new();
        for entry in entries {
            rrsets.entry(entry.rtype).or_default().push(entry);
        }
        Self { rrsets }
    }

    /// Parse a batch of record strings and group them.
    ///
    /// # Errors
    ///
    /// The first unparsable string aborts the whole batch with
    /// [`UpdateError::ParseFailure`].
    pub fn parse(rrs: &[String]) -> Result<Self, UpdateError> {
        let entries = rrs
            .iter()
            .map(|s| RrEntry::from_str(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_entries(entries))
    }

    /// True when the update carries no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rrsets.is_empty()
    }
}
