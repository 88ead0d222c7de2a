// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::chain::{Address, Chain};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded account public key.
///
/// Per-chain addresses are derived deterministically from the key bytes so
/// that every node maps a vault key to the same address without consulting
/// the chain.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PubKey(String);

impl PubKey {
    pub fn new(s: &str) -> Self {
        PubKey(s.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address of this key on the given chain: chain prefix plus the first
    /// twenty bytes of the key hash, hex encoded.
    pub fn chain_address(&self, chain: &Chain) -> Address {
        let digest = Sha256::digest(self.0.as_bytes());
        Address::new(&format!(
            "{}{}",
            chain.address_prefix(),
            hex::encode(&digest[..20])
        ))
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PubKey {
    fn from(s: &str) -> Self {
        PubKey::new(s)
    }
}

/// A node's account key plus its consensus key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PubKeySet {
    pub secp256k1: PubKey,
    pub ed25519: PubKey,
}

impl PubKeySet {
    pub fn new(secp256k1: PubKey, ed25519: PubKey) -> Self {
        PubKeySet { secp256k1, ed25519 }
    }

    pub fn contains(&self, pk: &PubKey) -> bool {
        &self.secp256k1 == pk || &self.ed25519 == pk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_address_deterministic() {
        let pk = PubKey::new("thorpub1addwnpepq_test_key");
        let a1 = pk.chain_address(&Chain::bnb());
        let a2 = pk.chain_address(&Chain::bnb());
        assert_eq!(a1, a2);
        assert!(a1.as_str().starts_with("tbnb"));
        // 20 bytes hex encoded after the prefix
        assert_eq!(a1.as_str().len(), 4 + 40);
    }

    #[test]
    fn test_chain_address_scoped_per_chain() {
        let pk = PubKey::new("thorpub1addwnpepq_test_key");
        assert_ne!(pk.chain_address(&Chain::bnb()), pk.chain_address(&Chain::btc()));
    }

    #[test]
    fn test_distinct_keys_distinct_addresses() {
        let a = PubKey::new("key-a").chain_address(&Chain::bnb());
        let b = PubKey::new("key-b").chain_address(&Chain::bnb());
        assert_ne!(a, b);
    }
}
