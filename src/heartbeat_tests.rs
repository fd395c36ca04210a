// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for heartbeat liveness computation.

#[cfg(test)]
mod tests {
    use crate::agent::heartbeat::compute_state;
    use crate::agent::AgentState;

    #[test]
    fn test_fresh_beats_are_operational() {
        assert_eq!(compute_state(0, 0, 30, 30), AgentState::Operational);
        assert_eq!(compute_state(45, 60, 30, 30), AgentState::Operational);
    }

    #[test]
    fn test_boundary_twice_interval_still_operational() {
        // The DEGRADED band opens strictly above 2R.
        assert_eq!(compute_state(60, 0, 30, 30), AgentState::Operational);
    }

    #[test]
    fn test_degraded_at_80s_with_30s_intervals() {
        assert_eq!(compute_state(80, 80, 30, 30), AgentState::Degraded);
    }

    #[test]
    fn test_interrupted_at_400s_with_30s_intervals() {
        assert_eq!(compute_state(400, 0, 30, 30), AgentState::Interrupted);
    }

    #[test]
    fn test_boundary_ten_times_interval_still_degraded() {
        assert_eq!(compute_state(300, 0, 30, 30), AgentState::Degraded);
        assert_eq!(compute_state(301, 0, 30, 30), AgentState::Interrupted);
    }

    #[test]
    fn test_sent_side_staleness_counts_too() {
        assert_eq!(compute_state(0, 80, 30, 30), AgentState::Degraded);
        assert_eq!(compute_state(0, 400, 30, 30), AgentState::Interrupted);
    }

    #[test]
    fn test_asymmetric_intervals() {
        // Remote beats every 15s, local every 120s: 40s of receive
        // silence is already degraded, 40s of send silence is not.
        assert_eq!(compute_state(40, 0, 15, 120), AgentState::Degraded);
        assert_eq!(compute_state(0, 40, 15, 120), AgentState::Operational);
    }

    #[test]
    fn test_worst_side_wins() {
        assert_eq!(compute_state(400, 80, 30, 30), AgentState::Interrupted);
        assert_eq!(compute_state(80, 400, 30, 30), AgentState::Interrupted);
    }
}
