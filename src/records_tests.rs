// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for presentation-form record parsing.

#[cfg(test)]
mod tests {
    use crate::records::{RrEntry, ZoneUpdate};
    use hickory_proto::rr::RecordType;
    use std::str::FromStr;

    #[test]
    fn test_parse_full_form() {
        let entry =
            RrEntry::from_str("example.com. 3600 IN NS ns1.provider.example.").unwrap();
        assert_eq!(entry.owner.to_string(), "example.com.");
        assert_eq!(entry.ttl, 3600);
        assert_eq!(entry.rtype, RecordType::NS);
        assert_eq!(entry.rdata, "ns1.provider.example.");
    }

    #[test]
    fn test_parse_without_ttl_and_class() {
        let entry = RrEntry::from_str("example.com. DNSKEY 257 3 13 q3dEva+C0k7bLT1A1v+xyg==")
            .unwrap();
        assert_eq!(entry.rtype, RecordType::DNSKEY);
        assert_eq!(entry.rdata, "257 3 13 q3dEva+C0k7bLT1A1v+xyg==");
    }

    #[test]
    fn test_parse_lowercases_owner() {
        let entry = RrEntry::from_str("Example.COM. 300 IN NS ns1.example.").unwrap();
        assert_eq!(entry.owner.to_string(), "example.com.");
    }

    #[test]
    fn test_parse_rejects_relative_owner() {
        let err = RrEntry::from_str("example.com 300 IN NS ns1.example.").unwrap_err();
        assert!(err.to_string().contains("not fully qualified"));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(RrEntry::from_str("example.com. 300 IN BOGUS data").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_rdata() {
        assert!(RrEntry::from_str("example.com. 300 IN NS").is_err());
        assert!(RrEntry::from_str("example.com.").is_err());
        assert!(RrEntry::from_str("").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let entry = RrEntry::from_str("example.com. 300 IN NS ns1.example.").unwrap();
        let again = RrEntry::from_str(&entry.to_string()).unwrap();
        assert_eq!(entry, again);
    }

    #[test]
    fn test_zone_update_groups_by_type() {
        let update = ZoneUpdate::parse(&[
            "example.com. 300 IN NS ns1.example.".to_string(),
            "example.com. 300 IN NS ns2.example.".to_string(),
            "example.com. 300 IN CDS 12345 13 2 deadbeef".to_string(),
        ])
        .unwrap();
        assert_eq!(update.rrsets.len(), 2);
        assert_eq!(update.rrsets[&RecordType::NS].len(), 2);
        assert_eq!(update.rrsets[&RecordType::CDS].len(), 1);
    }

    #[test]
    fn test_zone_update_aborts_on_first_bad_record() {
        let result = ZoneUpdate::parse(&[
            "example.com. 300 IN NS ns1.example.".to_string(),
            "not a record".to_string(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_update() {
        let update = ZoneUpdate::parse(&[]).unwrap();
        assert!(update.is_empty());
    }
}
