// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::asset::Asset;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount of a single asset, in 1e8 fixed point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub asset: Asset,
    pub amount: u64,
}

impl Coin {
    pub fn new(asset: Asset, amount: u64) -> Self {
        Coin { asset, amount }
    }

    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.asset)
    }
}

/// Ordered sequence of coins. Insertion order is preserved; `sorted` yields
/// the canonical order used when comparing observation shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Coins(pub Vec<Coin>);

impl Coins {
    pub fn new(coins: Vec<Coin>) -> Self {
        Coins(coins)
    }

    pub fn one(coin: Coin) -> Self {
        Coins(vec![coin])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty() || self.0.iter().all(Coin::is_empty)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Coin> {
        self.0.iter()
    }

    /// Amount held of the given asset (0 if absent).
    pub fn amount_of(&self, asset: &Asset) -> u64 {
        self.0
            .iter()
            .filter(|c| &c.asset == asset)
            .map(|c| c.amount)
            .sum()
    }

    pub fn contains(&self, asset: &Asset) -> bool {
        self.0.iter().any(|c| &c.asset == asset && c.amount > 0)
    }

    /// Canonical ordering for hashing and shape comparison.
    pub fn sorted(&self) -> Coins {
        let mut coins = self.0.clone();
        coins.sort_by(|a, b| a.asset.cmp(&b.asset).then(a.amount.cmp(&b.amount)));
        Coins(coins)
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl IntoIterator for Coins {
    type Item = Coin;
    type IntoIter = std::vec::IntoIter<Coin>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Coins {
    type Item = &'a Coin;
    type IntoIter = std::slice::Iter<'a, Coin>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
