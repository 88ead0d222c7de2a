// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::chain::Chain;
use crate::TypeError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A (chain, symbol) pair identifying an asset, e.g. `BNB.RUNE-A1F`.
///
/// The ticker is the symbol with any issuance suffix stripped; `RUNE` is the
/// ledger's native asset regardless of which chain hosts the token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Asset {
    pub chain: Chain,
    pub symbol: String,
    pub ticker: String,
}

impl Asset {
    pub fn new(chain: Chain, symbol: &str) -> Result<Self, TypeError> {
        if symbol.is_empty() {
            return Err(TypeError::InvalidAsset("empty symbol".to_string()));
        }
        let ticker = symbol.split('-').next().unwrap_or(symbol);
        Ok(Asset {
            chain,
            ticker: ticker.to_ascii_uppercase(),
            symbol: symbol.to_ascii_uppercase(),
        })
    }

    pub(crate) fn new_unchecked(chain: Chain, symbol: &str, ticker: &str) -> Self {
        Asset {
            chain,
            symbol: symbol.to_string(),
            ticker: ticker.to_string(),
        }
    }

    /// The ledger's native asset (BEP2 issuance of RUNE).
    pub fn rune() -> Self {
        Asset::new_unchecked(Chain::bnb(), "RUNE-A1F", "RUNE")
    }

    pub fn bnb() -> Self {
        Asset::new_unchecked(Chain::bnb(), "BNB", "BNB")
    }

    pub fn btc() -> Self {
        Asset::new_unchecked(Chain::btc(), "BTC", "BTC")
    }

    pub fn eth() -> Self {
        Asset::new_unchecked(Chain::eth(), "ETH", "ETH")
    }

    pub fn is_rune(&self) -> bool {
        self.ticker == "RUNE"
    }

    pub fn is_empty(&self) -> bool {
        self.symbol.is_empty()
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.chain, self.symbol)
    }
}

impl FromStr for Asset {
    type Err = TypeError;

    /// Parses `CHAIN.SYMBOL`; a bare `SYMBOL` defaults to the BNB chain, the
    /// way user-facing memos abbreviate it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((chain, symbol)) => Asset::new(Chain::new(chain)?, symbol),
            None => Asset::new(Chain::bnb(), s),
        }
    }
}

impl Serialize for Asset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Asset::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qualified() {
        let asset: Asset = "BNB.RUNE-A1F".parse().unwrap();
        assert_eq!(asset.chain, Chain::bnb());
        assert_eq!(asset.symbol, "RUNE-A1F");
        assert_eq!(asset.ticker, "RUNE");
        assert!(asset.is_rune());
        assert_eq!(asset.to_string(), "BNB.RUNE-A1F");
    }

    #[test]
    fn test_parse_bare_symbol_defaults_to_bnb() {
        let asset: Asset = "RUNE-A1F".parse().unwrap();
        assert_eq!(asset, Asset::rune());
        let asset: Asset = "LOK-3C0".parse().unwrap();
        assert_eq!(asset.chain, Chain::bnb());
        assert_eq!(asset.ticker, "LOK");
    }

    #[test]
    fn test_case_folding() {
        let asset: Asset = "bnb.bnb".parse().unwrap();
        assert_eq!(asset, Asset::bnb());
    }

    #[test]
    fn test_invalid() {
        assert!("BNB.".parse::<Asset>().is_err());
        assert!("B NB.BNB".parse::<Asset>().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let asset = Asset::rune();
        let json = serde_json::to_string(&asset).unwrap();
        assert_eq!(json, "\"BNB.RUNE-A1F\"");
        let back: Asset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, asset);
    }
}
