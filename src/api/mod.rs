// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP surfaces of the agent.
//!
//! Two separate routers on two listeners:
//!
//! - the **sync API** (`/hello`, `/beat`, `/msg`) between peers, over
//!   mutual TLS pinned to DNS-published TLSA records;
//! - the **management API** (`/ping`, `/agent`, `/zone`, `/config`,
//!   `/command`, `/debug`, `/metrics`) for local operators, behind a
//!   shared secret.

pub mod mgmt;
pub mod server;
pub mod sync;
pub mod tls;
