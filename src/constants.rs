// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the hsyncd agent.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// HSYNC Record Constants
// ============================================================================

/// Private RR type code for the HSYNC record
pub const HSYNC_RR_TYPE: u16 = 0x0F9D;

/// Symbolic mnemonic used when displaying the HSYNC record type
pub const HSYNC_RR_MNEMONIC: &str = "HSYNC";

// ============================================================================
// Interval Clamps
// ============================================================================

/// Minimum heartbeat interval (seconds)
pub const BEAT_INTERVAL_MIN_SECS: u64 = 15;

/// Maximum heartbeat interval (seconds)
pub const BEAT_INTERVAL_MAX_SECS: u64 = 1800;

/// Default heartbeat interval (seconds)
pub const BEAT_INTERVAL_DEFAULT_SECS: u64 = 60;

/// Minimum locator retry interval (seconds)
pub const LOCATE_INTERVAL_MIN_SECS: u64 = 10;

/// Maximum locator retry interval (seconds)
pub const LOCATE_INTERVAL_MAX_SECS: u64 = 300;

/// Default locator retry interval (seconds)
pub const LOCATE_INTERVAL_DEFAULT_SECS: u64 = 60;

/// Minimum HELLO retry interval (seconds)
pub const HELLO_RETRY_MIN_SECS: u64 = 15;

/// Maximum HELLO retry interval (seconds)
pub const HELLO_RETRY_MAX_SECS: u64 = 1800;

/// Default HELLO retry interval (seconds)
pub const HELLO_RETRY_DEFAULT_SECS: u64 = 60;

// ============================================================================
// Heartbeat State Thresholds
// ============================================================================

/// Multiple of the beat interval after which a peer is considered DEGRADED
pub const BEAT_DEGRADED_MULTIPLIER: u32 = 2;

/// Multiple of the beat interval after which a peer is considered INTERRUPTED
pub const BEAT_INTERRUPTED_MULTIPLIER: u32 = 10;

// ============================================================================
// Network Timeouts
// ============================================================================

/// Timeout for a single recursive DNS query (seconds)
pub const DNS_QUERY_TIMEOUT_SECS: u64 = 2;

/// Number of attempts for each discovery DNS lookup
pub const DNS_QUERY_RETRIES: u32 = 3;

/// Request timeout for BEAT posts to a peer (seconds)
pub const BEAT_REQUEST_TIMEOUT_SECS: u64 = 2;

/// Request timeout for HELLO posts to a peer (seconds)
pub const HELLO_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Default HTTPS port when neither the URI nor SVCB carries one
pub const DEFAULT_API_PORT: u16 = 443;

// ============================================================================
// Engine Channel Constants
// ============================================================================

/// Capacity of every request channel into the engine
pub const ENGINE_CHANNEL_CAPACITY: usize = 10;

/// Timeout waiting for a response from the engine or combiner (seconds)
pub const ENGINE_RESPONSE_TIMEOUT_SECS: u64 = 2;

/// Timeout for enqueueing on an essential engine channel (seconds)
pub const ENGINE_ENQUEUE_TIMEOUT_SECS: u64 = 1;

// ============================================================================
// API Constants
// ============================================================================

/// Header carrying the shared secret on the management API
pub const MGMT_API_KEY_HEADER: &str = "x-api-key";

/// Path of the peer bootstrap endpoint (exempt from client-cert checks)
pub const SYNC_HELLO_PATH: &str = "/hello";

/// Path of the peer heartbeat endpoint
pub const SYNC_BEAT_PATH: &str = "/beat";

/// Path of the generic peer message endpoint
pub const SYNC_MSG_PATH: &str = "/msg";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";
