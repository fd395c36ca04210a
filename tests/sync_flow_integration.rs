// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Integration tests for HSYNC delta processing through the engine.

mod common;

use common::{id, spawn_stack, wait_until, zone};
use hsyncd::hsync::HsyncRecord;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const LOCAL: &str = "local.example.";
const PEER: &str = "b.example.";
const ZONE: &str = "example.com.";

fn hsync(s: &str) -> HsyncRecord {
    HsyncRecord::from_str(s).unwrap()
}

#[tokio::test]
async fn test_hsync_add_starts_discovery() {
    let stack = spawn_stack(LOCAL);
    stack
        .zonestore
        .set_hsync(
            &zone(ZONE),
            vec![
                hsync(&format!("ON OWNER SIGN {LOCAL} .")),
                hsync(&format!("ON OWNER SIGN {PEER} .")),
            ],
        )
        .await;

    let registry = Arc::clone(&stack.registry);
    let tracked = wait_until(Duration::from_secs(2), || {
        let registry = Arc::clone(&registry);
        async move {
            let remotes = registry.remote_agents(&zone(ZONE)).await;
            remotes.iter().any(|a| a.identity == id(PEER))
        }
    })
    .await;
    assert!(tracked, "peer missing from remote agents after HSYNC add");

    // The local identity never shows up as a remote agent.
    let remotes = stack.registry.remote_agents(&zone(ZONE)).await;
    assert!(remotes.iter().all(|a| a.identity != id(LOCAL)));
}

#[tokio::test]
async fn test_role_change_does_not_drop_the_peer() {
    let stack = spawn_stack(LOCAL);
    stack
        .zonestore
        .set_hsync(
            &zone(ZONE),
            vec![
                hsync(&format!("ON OWNER SIGN {LOCAL} .")),
                hsync(&format!("ON OWNER SIGN {PEER} .")),
            ],
        )
        .await;

    let registry = Arc::clone(&stack.registry);
    assert!(
        wait_until(Duration::from_secs(2), || {
            let registry = Arc::clone(&registry);
            async move { registry.get_agent_info(&id(PEER)).await.is_ok() }
        })
        .await
    );

    // Same identity, different upstream: arrives as REMOVE+ADD.
    stack
        .zonestore
        .set_hsync(
            &zone(ZONE),
            vec![
                hsync(&format!("ON OWNER SIGN {LOCAL} .")),
                hsync(&format!("ON OWNER SIGN {PEER} up.example.")),
            ],
        )
        .await;

    // Give the engine time to process, then check the peer survived
    // with its zone binding intact.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let agent = stack.registry.get_agent_info(&id(PEER)).await.unwrap();
    assert!(agent.zones.contains(&zone(ZONE)));
    assert_eq!(stack.registry.remote_agents(&zone(ZONE)).await.len(), 1);
}

#[tokio::test]
async fn test_true_removal_unbinds_the_peer() {
    let stack = spawn_stack(LOCAL);
    stack
        .zonestore
        .set_hsync(
            &zone(ZONE),
            vec![
                hsync(&format!("ON OWNER SIGN {LOCAL} .")),
                hsync(&format!("ON OWNER SIGN {PEER} .")),
            ],
        )
        .await;

    let registry = Arc::clone(&stack.registry);
    assert!(
        wait_until(Duration::from_secs(2), || {
            let registry = Arc::clone(&registry);
            async move { registry.get_agent_info(&id(PEER)).await.is_ok() }
        })
        .await
    );

    stack
        .zonestore
        .set_hsync(&zone(ZONE), vec![hsync(&format!("ON OWNER SIGN {LOCAL} ."))])
        .await;

    let gone = wait_until(Duration::from_secs(2), || {
        let registry = Arc::clone(&registry);
        async move {
            registry.remote_agents(&zone(ZONE)).await.is_empty()
                && registry.get_agent_info(&id(PEER)).await.is_err()
        }
    })
    .await;
    assert!(gone, "removed peer still present");
}

#[tokio::test]
async fn test_local_removal_cleans_up_the_zone() {
    let stack = spawn_stack(LOCAL);
    stack
        .zonestore
        .set_hsync(
            &zone(ZONE),
            vec![
                hsync(&format!("ON OWNER SIGN {LOCAL} .")),
                hsync(&format!("ON OWNER SIGN {PEER} .")),
            ],
        )
        .await;

    let registry = Arc::clone(&stack.registry);
    assert!(
        wait_until(Duration::from_secs(2), || {
            let registry = Arc::clone(&registry);
            async move { registry.get_agent_info(&id(PEER)).await.is_ok() }
        })
        .await
    );

    // The local identity leaving the set means we stop participating.
    stack
        .zonestore
        .set_hsync(&zone(ZONE), vec![hsync(&format!("ON OWNER SIGN {PEER} ."))])
        .await;

    let cleaned = wait_until(Duration::from_secs(2), || {
        let registry = Arc::clone(&registry);
        async move {
            let remotes = registry.remote_agents(&zone(ZONE)).await;
            let all = registry.all_agents().await;
            remotes.is_empty() && all.iter().all(|a| !a.zones.contains(&zone(ZONE)))
        }
    })
    .await;
    assert!(cleaned, "zone bindings survived local removal");
}

#[tokio::test]
async fn test_status_snapshot() {
    let stack = spawn_stack(LOCAL);
    stack
        .zonestore
        .set_hsync(
            &zone(ZONE),
            vec![
                hsync(&format!("ON OWNER SIGN {LOCAL} .")),
                hsync(&format!("ON OWNER SIGN {PEER} .")),
            ],
        )
        .await;

    let handles = stack.handles.clone();
    let visible = wait_until(Duration::from_secs(2), || {
        let handles = handles.clone();
        async move {
            match handles.status().await {
                Ok(status) => {
                    status.identity == LOCAL
                        && status.zones.contains(&ZONE.to_string())
                        && status.agents.iter().any(|a| a.identity == PEER)
                }
                Err(_) => false,
            }
        }
    })
    .await;
    assert!(visible, "status snapshot incomplete");
}
