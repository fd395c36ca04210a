// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! SIG(0) key store seam.
//!
//! The DNS transport signs messages with SIG(0) keys published as KEY
//! records. Key generation and private-key custody belong to the
//! signer collaborator; the fabric only needs to fetch active public
//! keys and ask for a key when none exists.

use crate::resolver::KeyInfo;
use anyhow::Result;
use dashmap::DashMap;
use hickory_proto::rr::Name;

/// Access to the local agent's SIG(0) keys.
pub trait KeyStore: Send + Sync {
    /// The active SIG(0) public keys for a name.
    fn active_sig0_keys(&self, name: &Name) -> Vec<KeyInfo>;

    /// Generate (and activate) a SIG(0) key for a name.
    ///
    /// # Errors
    ///
    /// Key generation is delegated; implementations report their own
    /// failures.
    fn generate_key(&self, name: &Name, algorithm: u8) -> Result<KeyInfo>;
}

/// In-memory key store used by tests and single-process deployments.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: DashMap<Name, Vec<KeyInfo>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a key directly (test fixture path).
    pub fn insert(&self, name: Name, key: KeyInfo) {
        self.keys.entry(name).or_default().push(key);
    }
}

impl KeyStore for MemoryKeyStore {
    fn active_sig0_keys(&self, name: &Name) -> Vec<KeyInfo> {
        self.keys.get(name).map(|k| k.clone()).unwrap_or_default()
    }

    fn generate_key(&self, name: &Name, algorithm: u8) -> Result<KeyInfo> {
        // No keypair material is minted here; custody stays with the
        // signer collaborator.
        anyhow::bail!(
            "key generation for {name} (alg {algorithm}) is delegated to the signer"
        )
    }
}
