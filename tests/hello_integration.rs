// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Integration tests for the `/hello` bootstrap endpoint, driven over
//! a real listener.

mod common;

use common::{id, spawn_stack, wait_until, zone, TestStack};
use hsyncd::api::sync::{sync_router, SyncApiState};
use hsyncd::hsync::HsyncRecord;
use hsyncd::msg::{AgentResponse, HelloMsg, MsgKind};
use hsyncd::zonestore::ZoneStore;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const LOCAL: &str = "local.example.";
const PEER: &str = "b.example.";

/// Serve the sync router over plain TCP for the handshake tests; the
/// TLS layer is exercised separately and `/hello` does not need a
/// client certificate.
async fn serve(stack: &TestStack) -> String {
    let state = SyncApiState {
        registry: Arc::clone(&stack.registry),
        zonestore: Arc::clone(&stack.zonestore) as Arc<dyn ZoneStore>,
        engine: stack.handles.clone(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, sync_router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

fn hello_from(sender: &str, zone_name: &str) -> HelloMsg {
    HelloMsg {
        message_type: MsgKind::Hello,
        my_identity: sender.to_string(),
        your_identity: LOCAL.to_string(),
        zone: zone_name.to_string(),
    }
}

async fn post_hello(base: &str, body: &HelloMsg) -> AgentResponse {
    reqwest::Client::new()
        .post(format!("{base}/hello"))
        .json(body)
        .send()
        .await
        .expect("hello request")
        .json()
        .await
        .expect("hello response envelope")
}

#[tokio::test]
async fn test_hello_accepted_when_both_identities_listed() {
    let stack = spawn_stack(LOCAL);
    stack
        .zonestore
        .set_hsync(
            &zone("example.com."),
            vec![
                HsyncRecord::from_str(&format!("ON OWNER SIGN {LOCAL} .")).unwrap(),
                HsyncRecord::from_str(&format!("ON OWNER SIGN {PEER} .")).unwrap(),
            ],
        )
        .await;
    let base = serve(&stack).await;

    let envelope = post_hello(&base, &hello_from(PEER, "example.com.")).await;
    assert_eq!(envelope.status, "ok");
    assert!(!envelope.error);
    assert_eq!(envelope.my_identity, LOCAL);

    // The engine picks the greeting peer up for discovery.
    let registry = Arc::clone(&stack.registry);
    let tracked = wait_until(Duration::from_secs(2), || {
        let registry = Arc::clone(&registry);
        async move { registry.get_agent_info(&id(PEER)).await.is_ok() }
    })
    .await;
    assert!(tracked, "peer was not registered after HELLO");
}

#[tokio::test]
async fn test_hello_rejected_without_zone() {
    let stack = spawn_stack(LOCAL);
    let base = serve(&stack).await;

    let envelope = post_hello(&base, &hello_from(PEER, "")).await;
    assert!(envelope.error);
    assert_eq!(envelope.status, "error");
}

#[tokio::test]
async fn test_hello_rejected_for_unknown_zone() {
    let stack = spawn_stack(LOCAL);
    let base = serve(&stack).await;

    let envelope = post_hello(&base, &hello_from(PEER, "nosuch.example.")).await;
    assert!(envelope.error);
    assert!(envelope.error_msg.unwrap().contains("not known"));
}

#[tokio::test]
async fn test_hello_rejected_without_hsync_rrset() {
    let stack = spawn_stack(LOCAL);
    stack.zonestore.upsert_zone(zone("example.com."));
    let base = serve(&stack).await;

    let envelope = post_hello(&base, &hello_from(PEER, "example.com.")).await;
    assert!(envelope.error);
    assert!(envelope.error_msg.unwrap().contains("no HSYNC RRset"));
}

#[tokio::test]
async fn test_hello_rejected_when_sender_not_listed() {
    let stack = spawn_stack(LOCAL);
    stack
        .zonestore
        .set_hsync(
            &zone("example.com."),
            vec![
                HsyncRecord::from_str(&format!("ON OWNER SIGN {LOCAL} .")).unwrap(),
                HsyncRecord::from_str("ON OWNER SIGN c.example. .").unwrap(),
            ],
        )
        .await;
    let base = serve(&stack).await;

    let envelope = post_hello(&base, &hello_from("x.example.", "example.com.")).await;
    assert!(envelope.error);
    assert_eq!(
        envelope.error_msg.unwrap(),
        "Error: Zone \"example.com.\" HSYNC RRset does not include both our identities"
    );
}

#[tokio::test]
async fn test_hello_rejected_when_local_identity_not_listed() {
    let stack = spawn_stack(LOCAL);
    stack
        .zonestore
        .set_hsync(
            &zone("example.com."),
            vec![HsyncRecord::from_str(&format!("ON OWNER SIGN {PEER} .")).unwrap()],
        )
        .await;
    let base = serve(&stack).await;

    let envelope = post_hello(&base, &hello_from(PEER, "example.com.")).await;
    assert!(envelope.error);
    assert!(envelope
        .error_msg
        .unwrap()
        .contains("does not include both our identities"));
}
