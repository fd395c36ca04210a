// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Integration tests for the heartbeat sender against a mock peer.

mod common;

use chrono::Utc;
use common::{id, spawn_stack, zone, TestStack};
use hsyncd::agent::heartbeat::send_beat;
use hsyncd::agent::tasks::DeferredAgentTask;
use hsyncd::agent::{AgentState, ContactInfo};
use hsyncd::msg::RfiDirection;
use hsyncd::resolver::UriInfo;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOCAL: &str = "local.example.";
const PEER: &str = "b.example.";
const ZONE: &str = "example.com.";

fn ok_envelope() -> serde_json::Value {
    json!({
        "Status": "ok",
        "MyIdentity": PEER,
        "YourIdentity": LOCAL,
        "Time": Utc::now(),
        "Error": false,
    })
}

/// Register the peer and point its HTTPS transport at the mock server.
async fn wire_peer(stack: &TestStack, server: &MockServer) {
    stack
        .registry
        .locate_agent(&id(PEER), Some(&zone(ZONE)), None)
        .await;
    let handle = stack.registry.agent_handle(&id(PEER)).unwrap();
    let mut agent = handle.write().await;
    agent.api_details.uri = Some(UriInfo {
        priority: 1,
        weight: 1,
        target: format!("{}/", server.uri()),
    });
    agent.api_details.client = Some(reqwest::Client::new());
    agent.api_details.contact_info = ContactInfo::Complete;
    agent.api_details.state = Some(AgentState::Introduced);
    agent.api_supported = true;
    agent.set_state(AgentState::Introduced);
}

#[tokio::test]
async fn test_first_successful_beat_goes_operational() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope()))
        .mount(&server)
        .await;

    let stack = spawn_stack(LOCAL);
    wire_peer(&stack, &server).await;

    send_beat(&stack.registry, &id(PEER)).await;

    let agent = stack.registry.get_agent_info(&id(PEER)).await.unwrap();
    assert_eq!(agent.state, AgentState::Operational);
    assert_eq!(agent.api_details.state, Some(AgentState::Operational));
    assert_eq!(agent.api_details.sent_beats, 1);
    assert!(agent.api_details.latest_s_beat.is_some());
    assert!(agent.api_details.latest_error.is_none());
}

#[tokio::test]
async fn test_failed_beat_records_error_and_keeps_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let stack = spawn_stack(LOCAL);
    wire_peer(&stack, &server).await;

    send_beat(&stack.registry, &id(PEER)).await;

    let agent = stack.registry.get_agent_info(&id(PEER)).await.unwrap();
    // No heartbeat ever flowed, so the peer stays INTRODUCED.
    assert_eq!(agent.state, AgentState::Introduced);
    assert_eq!(agent.api_details.sent_beats, 0);
    assert!(agent
        .api_details
        .latest_error
        .as_deref()
        .unwrap()
        .contains("500"));
}

#[tokio::test]
async fn test_deferred_rfi_runs_after_peer_goes_operational() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/msg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope()))
        .mount(&server)
        .await;

    let stack = spawn_stack(LOCAL);
    wire_peer(&stack, &server).await;
    stack
        .registry
        .attach_deferred_task(
            &id(PEER),
            DeferredAgentTask::rfi_when_operational(id(PEER), zone(ZONE), RfiDirection::Upstream),
        )
        .await;

    send_beat(&stack.registry, &id(PEER)).await;

    let requests = server.received_requests().await.unwrap();
    let rfi_posts: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == "/msg")
        .collect();
    assert_eq!(rfi_posts.len(), 1, "expected exactly one RFI");
    let body: serde_json::Value = serde_json::from_slice(&rfi_posts[0].body).unwrap();
    assert_eq!(body["MessageType"], "RFI");
    assert_eq!(body["RfiType"], "UPSTREAM");
    assert_eq!(body["Zone"], ZONE);

    let agent = stack.registry.get_agent_info(&id(PEER)).await.unwrap();
    assert!(agent.deferred_tasks.is_empty(), "completed task retained");
}

#[tokio::test]
async fn test_deferred_task_retained_until_precondition_holds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope()))
        .mount(&server)
        .await;

    let stack = spawn_stack(LOCAL);
    wire_peer(&stack, &server).await;

    // The task waits on a different peer that never comes up.
    stack
        .registry
        .locate_agent(&id("c.example."), Some(&zone(ZONE)), None)
        .await;
    stack
        .registry
        .attach_deferred_task(
            &id(PEER),
            DeferredAgentTask::rfi_when_operational(
                id("c.example."),
                zone(ZONE),
                RfiDirection::Downstream,
            ),
        )
        .await;

    send_beat(&stack.registry, &id(PEER)).await;

    let agent = stack.registry.get_agent_info(&id(PEER)).await.unwrap();
    assert_eq!(agent.deferred_tasks.len(), 1, "unmet task must be retained");
}
