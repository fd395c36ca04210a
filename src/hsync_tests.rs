// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the HSYNC record codec.

#[cfg(test)]
mod tests {
    use crate::hsync::{HsyncDelta, HsyncRecord, HsyncState, NsMgmt, SignFlag};
    use std::str::FromStr;

    fn sample(identity: &str, upstream: &str) -> HsyncRecord {
        HsyncRecord::from_str(&format!("ON OWNER SIGN {identity} {upstream}"))
            .expect("valid sample record")
    }

    #[test]
    fn test_parse_text_form() {
        let record = HsyncRecord::from_str("ON OWNER SIGN a.example. b.example.").unwrap();
        assert_eq!(record.state, HsyncState::On);
        assert_eq!(record.nsmgmt, NsMgmt::Owner);
        assert_eq!(record.sign, SignFlag::Sign);
        assert_eq!(record.identity.to_string(), "a.example.");
        assert_eq!(record.upstream.to_string(), "b.example.");
    }

    #[test]
    fn test_display_round_trip() {
        let input = "ON OWNER SIGN a.example. b.example.";
        let record = HsyncRecord::from_str(input).unwrap();
        assert_eq!(record.to_string(), input);
    }

    #[test]
    fn test_parse_lowercases_names() {
        let record = HsyncRecord::from_str("OFF AGENT NOSIGN A.Example. B.EXAMPLE.").unwrap();
        assert_eq!(record.identity.to_string(), "a.example.");
        assert_eq!(record.upstream.to_string(), "b.example.");
    }

    #[test]
    fn test_parse_rejects_unknown_tokens() {
        assert!(HsyncRecord::from_str("MAYBE OWNER SIGN a.example. b.example.").is_err());
        assert!(HsyncRecord::from_str("ON BOSS SIGN a.example. b.example.").is_err());
        assert!(HsyncRecord::from_str("ON OWNER YES a.example. b.example.").is_err());
    }

    #[test]
    fn test_parse_rejects_relative_names() {
        let err = HsyncRecord::from_str("ON OWNER SIGN a.example b.example.").unwrap_err();
        assert!(err.to_string().contains("fully-qualified"));
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert!(HsyncRecord::from_str("ON OWNER SIGN a.example.").is_err());
        assert!(HsyncRecord::from_str("ON OWNER SIGN a.example. b.example. extra").is_err());
    }

    #[test]
    fn test_root_upstream_means_none() {
        let record = HsyncRecord::from_str("ON AGENT SIGN a.example. .").unwrap();
        assert!(record.has_no_upstream());
        assert!(!sample("a.example.", "b.example.").has_no_upstream());
    }

    #[test]
    fn test_wire_round_trip() {
        let record = sample("a.example.", "b.example.");
        let wire = record.to_wire();
        let decoded = HsyncRecord::from_wire(&wire).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_wire_layout() {
        let record = sample("a.example.", "b.example.");
        let wire = record.to_wire();
        // Three flag octets, then "a.example." as labels.
        assert_eq!(&wire[..3], &[1, 1, 1]);
        assert_eq!(wire[3], 1);
        assert_eq!(&wire[4..5], b"a");
        assert_eq!(wire[5], 7);
        assert_eq!(&wire[6..13], b"example");
        assert_eq!(wire[13], 0);
    }

    #[test]
    fn test_wire_rejects_truncation() {
        let record = sample("a.example.", "b.example.");
        let wire = record.to_wire();
        assert!(HsyncRecord::from_wire(&wire[..wire.len() - 2]).is_err());
        assert!(HsyncRecord::from_wire(&[1, 1]).is_err());
    }

    #[test]
    fn test_wire_rejects_trailing_bytes() {
        let record = sample("a.example.", "b.example.");
        let mut wire = record.to_wire();
        wire.push(0);
        assert!(HsyncRecord::from_wire(&wire).is_err());
    }

    #[test]
    fn test_wire_rejects_bad_flag_octets() {
        let record = sample("a.example.", "b.example.");
        let mut wire = record.to_wire();
        wire[0] = 7;
        assert!(HsyncRecord::from_wire(&wire).is_err());
    }

    #[test]
    fn test_delta_adds_and_removes() {
        let old = vec![sample("a.example.", "."), sample("b.example.", ".")];
        let new = vec![sample("b.example.", "."), sample("c.example.", ".")];
        let delta = HsyncDelta::between(&old, &new);
        assert_eq!(delta.adds, vec![sample("c.example.", ".")]);
        assert_eq!(delta.removes, vec![sample("a.example.", ".")]);
    }

    #[test]
    fn test_delta_role_change_is_add_plus_remove() {
        let old = vec![sample("a.example.", ".")];
        let new = vec![sample("a.example.", "up.example.")];
        let delta = HsyncDelta::between(&old, &new);
        assert_eq!(delta.adds.len(), 1);
        assert_eq!(delta.removes.len(), 1);
        assert_eq!(delta.adds[0].identity, delta.removes[0].identity);
    }

    #[test]
    fn test_delta_empty_for_same_set() {
        let set = vec![sample("a.example.", "."), sample("b.example.", ".")];
        assert!(HsyncDelta::between(&set, &set).is_empty());
    }
}
