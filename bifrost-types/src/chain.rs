// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chain identifier tags and chain-scoped addresses.

use crate::asset::Asset;
use crate::TypeError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Identifier tag for an external blockchain (or the ledger itself).
///
/// Kept as a validated uppercase string rather than a closed enum: observed
/// transactions arrive from the wire and may legitimately carry an empty or
/// unknown chain, which the consensus path must be able to represent in
/// order to refund it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Chain(String);

impl Chain {
    pub fn new(s: &str) -> Result<Self, TypeError> {
        if s.is_empty() {
            return Err(TypeError::InvalidChain("empty chain".to_string()));
        }
        if s.len() > 10 || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TypeError::InvalidChain(s.to_string()));
        }
        Ok(Chain(s.to_ascii_uppercase()))
    }

    pub fn bnb() -> Self {
        Chain("BNB".to_string())
    }

    pub fn btc() -> Self {
        Chain("BTC".to_string())
    }

    pub fn eth() -> Self {
        Chain("ETH".to_string())
    }

    /// The internal ledger chain.
    pub fn thor() -> Self {
        Chain("THOR".to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Native gas asset of this chain.
    pub fn gas_asset(&self) -> Asset {
        match self.0.as_str() {
            "BNB" => Asset::bnb(),
            "BTC" => Asset::btc(),
            "ETH" => Asset::eth(),
            _ => Asset::new_unchecked(self.clone(), &self.0, &self.0),
        }
    }

    /// Human-readable address prefix used by the deterministic
    /// pubkey-to-address derivation.
    pub fn address_prefix(&self) -> &'static str {
        match self.0.as_str() {
            "BNB" => "tbnb",
            "BTC" => "bc1",
            "ETH" => "0x",
            "THOR" => "thor",
            _ => "addr",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Chain {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::new(s)
    }
}

impl Serialize for Chain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Chain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        // the wire may carry an empty chain; it survives into the refund path
        if s.is_empty() {
            return Ok(Chain(String::new()));
        }
        Chain::new(&s).map_err(de::Error::custom)
    }
}

/// Chain-scoped opaque address. Validation beyond basic shape is delegated
/// to the chain adapter that owns the address format.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(s: &str) -> Self {
        Address(s.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::new(s)
    }
}
