// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deferred per-agent tasks.
//!
//! A deferred task parks an action behind a precondition, typically
//! "the peer is OPERATIONAL". The heartbeat driver re-evaluates a
//! peer's tasks after every successful heartbeat to that peer: tasks
//! whose action reports done are removed, everything else is retained
//! for the next beat. There is no exactly-once guarantee, so actions
//! must be idempotent.
//!
//! Conditions and actions are plain data keyed by [`AgentId`]; the
//! live agent is looked up from the registry at evaluation time, so a
//! task never keeps an agent alive and removal of the agent drops its
//! tasks with it.

use super::{AgentId, AgentState, ZoneName};
use crate::msg::RfiDirection;
use std::fmt;

/// The precondition gating a deferred task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCondition {
    /// The named peer has reached OPERATIONAL
    AgentOperational(AgentId),
}

impl TaskCondition {
    /// Evaluate against an observed peer state.
    #[must_use]
    pub fn is_met(&self, observed: Option<AgentState>) -> bool {
        match self {
            Self::AgentOperational(_) => observed == Some(AgentState::Operational),
        }
    }

    /// The peer whose state the condition observes.
    #[must_use]
    pub fn subject(&self) -> &AgentId {
        match self {
            Self::AgentOperational(id) => id,
        }
    }
}

/// The parked action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Send a request-for-initial-data for a zone to a peer
    SendRfi {
        /// The peer to ask
        peer: AgentId,
        /// The zone the RFI concerns
        zone: ZoneName,
        /// Whether we ask as a downstream or as the upstream
        direction: RfiDirection,
    },
}

/// An action attached to a precondition, owned by one agent.
#[derive(Debug, Clone)]
pub struct DeferredAgentTask {
    /// When the action may run
    pub condition: TaskCondition,
    /// What to do
    pub action: TaskAction,
    /// Operator-facing description
    pub desc: String,
}

impl DeferredAgentTask {
    /// Task that sends an RFI once the peer is operational.
    #[must_use]
    pub fn rfi_when_operational(peer: AgentId, zone: ZoneName, direction: RfiDirection) -> Self {
        let desc = format!("send {direction:?} RFI for {zone} to {peer}");
        Self {
            condition: TaskCondition::AgentOperational(peer.clone()),
            action: TaskAction::SendRfi {
                peer,
                zone,
                direction,
            },
            desc,
        }
    }
}

impl fmt::Display for DeferredAgentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.desc)
    }
}
