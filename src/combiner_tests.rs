// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for combiner policy and replace semantics.

#[cfg(test)]
mod tests {
    use crate::agent::{AgentId, ZoneName};
    use crate::combiner::{Combiner, SynchedDataUpdate};
    use crate::records::ZoneUpdate;
    use hickory_proto::rr::RecordType;

    fn zone() -> ZoneName {
        "example.com.".parse().unwrap()
    }

    fn agent_a() -> AgentId {
        "a.example.".parse().unwrap()
    }

    fn update_of(rrs: &[&str]) -> SynchedDataUpdate {
        SynchedDataUpdate {
            zone: zone(),
            agent: agent_a(),
            update: ZoneUpdate::parse(
                &rrs.iter().map(ToString::to_string).collect::<Vec<_>>(),
            )
            .expect("test records parse"),
        }
    }

    #[test]
    fn test_rejects_invalid_rr_type() {
        let combiner = Combiner::new();
        let update = update_of(&["foo.example.com. 300 IN A 192.0.2.1"]);
        let err = combiner.process(update).unwrap_err();
        assert!(err.to_string().contains("Invalid RR type"));
    }

    #[test]
    fn test_rejects_owner_outside_apex() {
        let combiner = Combiner::new();
        let update = update_of(&["sub.example.com. 300 IN NS ns1.example."]);
        let err = combiner.process(update).unwrap_err();
        assert!(err.to_string().contains("outside apex"));
    }

    #[test]
    fn test_one_violation_rejects_whole_update() {
        let combiner = Combiner::new();
        let update = update_of(&[
            "example.com. 300 IN NS ns1.example.",
            "sub.example.com. 300 IN NS ns2.example.",
        ]);
        assert!(combiner.process(update).is_err());
        // Nothing was applied.
        assert!(combiner.agent_view(&zone(), &agent_a()).is_none());
    }

    #[test]
    fn test_replace_semantics() {
        let combiner = Combiner::new();
        combiner
            .process(update_of(&[
                "example.com. 300 IN DNSKEY 257 3 13 aaaa",
                "example.com. 300 IN DNSKEY 256 3 13 bbbb",
            ]))
            .unwrap();
        combiner
            .process(update_of(&["example.com. 300 IN DNSKEY 257 3 13 cccc"]))
            .unwrap();

        let view = combiner.agent_view(&zone(), &agent_a()).unwrap();
        let dnskeys = &view.rrtypes[&RecordType::DNSKEY];
        assert_eq!(dnskeys.len(), 1);
        assert_eq!(dnskeys[0].rdata, "257 3 13 cccc");
    }

    #[test]
    fn test_process_is_idempotent() {
        let combiner = Combiner::new();
        let update = update_of(&[
            "example.com. 300 IN NS ns1.example.",
            "example.com. 300 IN CDS 12345 13 2 deadbeef",
        ]);
        combiner.process(update.clone()).unwrap();
        let first = combiner.agent_view(&zone(), &agent_a()).unwrap();
        combiner.process(update).unwrap();
        let second = combiner.agent_view(&zone(), &agent_a()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_rrset_is_not_a_deletion() {
        let combiner = Combiner::new();
        combiner
            .process(update_of(&["example.com. 300 IN NS ns1.example."]))
            .unwrap();
        // An update with no NS records leaves the stored NS set alone.
        combiner
            .process(update_of(&["example.com. 300 IN CDS 12345 13 2 deadbeef"]))
            .unwrap();

        let view = combiner.agent_view(&zone(), &agent_a()).unwrap();
        assert!(view.rrtypes.contains_key(&RecordType::NS));
        assert!(view.rrtypes.contains_key(&RecordType::CDS));
    }

    #[test]
    fn test_contributions_kept_per_agent() {
        let combiner = Combiner::new();
        let agent_b: AgentId = "b.example.".parse().unwrap();

        combiner
            .process(update_of(&["example.com. 300 IN NS ns1.a-provider.example."]))
            .unwrap();
        combiner
            .process(SynchedDataUpdate {
                zone: zone(),
                agent: agent_b.clone(),
                update: ZoneUpdate::parse(&[
                    "example.com. 300 IN NS ns1.b-provider.example.".to_string()
                ])
                .unwrap(),
            })
            .unwrap();

        let repo = combiner.zone_view(&zone()).unwrap();
        assert_eq!(repo.len(), 2);
        assert_ne!(
            repo[&agent_a()].rrtypes[&RecordType::NS][0].rdata,
            repo[&agent_b].rrtypes[&RecordType::NS][0].rdata,
        );
    }

    #[test]
    fn test_lazy_zone_creation_and_forget() {
        let combiner = Combiner::new();
        assert!(combiner.zone_view(&zone()).is_none());
        combiner
            .process(update_of(&["example.com. 300 IN NS ns1.example."]))
            .unwrap();
        assert!(combiner.zone_view(&zone()).is_some());
        combiner.forget_zone(&zone());
        assert!(combiner.zone_view(&zone()).is_none());
    }

    #[tokio::test]
    async fn test_combiner_channel_round_trip() {
        use crate::combiner::spawn_combiner;
        use std::sync::Arc;

        let combiner = Arc::new(Combiner::new());
        let handle = spawn_combiner(Arc::clone(&combiner));

        handle
            .apply(update_of(&["example.com. 300 IN NS ns1.example."]))
            .await
            .unwrap();
        let repo = handle.zone_view(&zone()).await.unwrap();
        assert!(repo.contains_key(&agent_a()));

        let verdict = handle
            .apply(update_of(&["foo.example.com. 300 IN A 192.0.2.1"]))
            .await;
        assert!(verdict.is_err());
    }
}
