// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the in-memory zone store and its engine feed.

#[cfg(test)]
mod tests {
    use crate::engine::SyncRequest;
    use crate::hsync::HsyncRecord;
    use crate::records::RrEntry;
    use crate::zonestore::{MemoryZoneStore, ZoneStore};
    use hickory_proto::rr::RecordType;
    use std::str::FromStr;
    use tokio::sync::mpsc;

    fn hsync(s: &str) -> HsyncRecord {
        HsyncRecord::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_zone_knowledge() {
        let store = MemoryZoneStore::new();
        let zone = "example.com.".parse().unwrap();
        assert!(!store.is_zone_known(&zone));
        store.upsert_zone("example.com.".parse().unwrap());
        assert!(store.is_zone_known(&zone));
        store.remove_zone(&zone);
        assert!(!store.is_zone_known(&zone));
    }

    #[tokio::test]
    async fn test_set_hsync_pushes_delta() {
        let store = MemoryZoneStore::new();
        let (tx, mut rx) = mpsc::channel(4);
        store.attach_engine(tx);
        let zone = "example.com.".parse().unwrap();

        store
            .set_hsync(
                &zone,
                vec![
                    hsync("ON OWNER SIGN a.example. ."),
                    hsync("ON OWNER SIGN b.example. ."),
                ],
            )
            .await;

        let Some(SyncRequest::HsyncUpdate { delta, .. }) = rx.recv().await else {
            panic!("expected an HSYNC update");
        };
        assert_eq!(delta.adds.len(), 2);
        assert!(delta.removes.is_empty());

        // Removing one agent yields a remove-only delta.
        store
            .set_hsync(&zone, vec![hsync("ON OWNER SIGN a.example. .")])
            .await;
        let Some(SyncRequest::HsyncUpdate { delta, .. }) = rx.recv().await else {
            panic!("expected an HSYNC update");
        };
        assert!(delta.adds.is_empty());
        assert_eq!(delta.removes.len(), 1);
        assert_eq!(delta.removes[0].identity.to_string(), "b.example.");
    }

    #[tokio::test]
    async fn test_unchanged_hsync_is_silent() {
        let store = MemoryZoneStore::new();
        let (tx, mut rx) = mpsc::channel(4);
        store.attach_engine(tx);
        let zone = "example.com.".parse().unwrap();
        let set = vec![hsync("ON OWNER SIGN a.example. .")];

        store.set_hsync(&zone, set.clone()).await;
        let _ = rx.recv().await;
        store.set_hsync(&zone, set).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dnskey_change_notifies_engine() {
        let store = MemoryZoneStore::new();
        let (tx, mut rx) = mpsc::channel(4);
        store.attach_engine(tx);
        let zone = "example.com.".parse().unwrap();

        let rrset =
            vec![RrEntry::from_str("example.com. 3600 IN DNSKEY 257 3 13 abcd").unwrap()];
        store
            .set_apex_rrset(&zone, RecordType::DNSKEY, rrset.clone())
            .await;

        let Some(SyncRequest::DnskeyRrset { rrset: sent, .. }) = rx.recv().await else {
            panic!("expected a DNSKEY notification");
        };
        assert_eq!(sent, rrset);
        assert_eq!(
            store.apex_rrset(&zone, RecordType::DNSKEY).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_ns_change_is_not_broadcast() {
        let store = MemoryZoneStore::new();
        let (tx, mut rx) = mpsc::channel(4);
        store.attach_engine(tx);
        let zone = "example.com.".parse().unwrap();

        store
            .set_apex_rrset(
                &zone,
                RecordType::NS,
                vec![RrEntry::from_str("example.com. 3600 IN NS ns1.example.").unwrap()],
            )
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hsync_rrset_readback() {
        let store = MemoryZoneStore::new();
        let zone = "example.com.".parse().unwrap();
        store
            .set_hsync(&zone, vec![hsync("ON AGENT NOSIGN a.example. up.example.")])
            .await;
        let set = store.hsync_rrset(&zone).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].to_string(), "ON AGENT NOSIGN a.example. up.example.");
    }
}
