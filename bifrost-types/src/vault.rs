// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Custodied vaults: federation-signed Asgard vaults and single-node
//! Yggdrasil floats.

use crate::asset::Asset;
use crate::coin::{Coin, Coins};
use crate::pubkey::PubKey;
use crate::TypeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum VaultType {
    Asgard,
    Yggdrasil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum VaultStatus {
    Active,
    Retiring,
    Inactive,
}

impl VaultStatus {
    fn rank(self) -> u8 {
        match self {
            VaultStatus::Active => 0,
            VaultStatus::Retiring => 1,
            VaultStatus::Inactive => 2,
        }
    }
}

/// A custodied wallet identified by its threshold public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub pub_key: PubKey,
    pub vault_type: VaultType,
    pub status: VaultStatus,
    /// Signer keys participating in TSS for this vault. Exactly one for a
    /// Yggdrasil vault.
    pub membership: Vec<PubKey>,
    pub coins: Coins,
    /// Ledger heights with dispatched but not yet observed outbounds.
    pub pending_tx_block_heights: Vec<i64>,
    pub outbound_tx_count: u64,
}

impl Vault {
    pub fn new(pub_key: PubKey, vault_type: VaultType, membership: Vec<PubKey>) -> Self {
        Vault {
            pub_key,
            vault_type,
            status: VaultStatus::Active,
            membership,
            coins: Coins::default(),
            pending_tx_block_heights: Vec::new(),
            outbound_tx_count: 0,
        }
    }

    pub fn is_asgard(&self) -> bool {
        self.vault_type == VaultType::Asgard
    }

    pub fn is_yggdrasil(&self) -> bool {
        self.vault_type == VaultType::Yggdrasil
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn has_asset(&self, asset: &Asset) -> bool {
        self.coins.contains(asset)
    }

    pub fn balance_of(&self, asset: &Asset) -> u64 {
        self.coins.amount_of(asset)
    }

    pub fn contains_member(&self, pk: &PubKey) -> bool {
        self.membership.iter().any(|m| m == pk)
    }

    pub fn add_funds(&mut self, coins: &Coins) {
        for coin in coins.iter() {
            if coin.amount == 0 {
                continue;
            }
            match self.coins.0.iter_mut().find(|c| c.asset == coin.asset) {
                Some(held) => held.amount = held.amount.saturating_add(coin.amount),
                None => self.coins.0.push(coin.clone()),
            }
        }
    }

    /// Subtracts `coins` from the vault balance. Underflow is an error: a
    /// vault balance never silently goes negative.
    pub fn sub_funds(&mut self, coins: &Coins) -> Result<(), TypeError> {
        for coin in coins.iter() {
            let held = self.coins.amount_of(&coin.asset);
            if coin.amount > held {
                return Err(TypeError::InsufficientFunds {
                    asset: coin.asset.to_string(),
                    held,
                    needed: coin.amount,
                });
            }
        }
        for coin in coins.iter() {
            if let Some(held) = self.coins.0.iter_mut().find(|c| c.asset == coin.asset) {
                held.amount -= coin.amount;
            }
        }
        Ok(())
    }

    /// Subtracts clamping at zero. Only for the theft path, where the funds
    /// have demonstrably already left the vault on-chain.
    pub fn sub_funds_saturating(&mut self, coins: &Coins) {
        for coin in coins.iter() {
            if let Some(held) = self.coins.0.iter_mut().find(|c| c.asset == coin.asset) {
                held.amount = held.amount.saturating_sub(coin.amount);
            }
        }
    }

    /// Status only ever moves forward: Active -> Retiring -> Inactive.
    pub fn set_status(&mut self, status: VaultStatus) -> Result<(), TypeError> {
        if status.rank() < self.status.rank() {
            return Err(TypeError::InvalidStatusTransition(
                self.status.to_string(),
                status.to_string(),
            ));
        }
        self.status = status;
        Ok(())
    }

    pub fn add_pending_tx_block_height(&mut self, height: i64) {
        if !self.pending_tx_block_heights.contains(&height) {
            self.pending_tx_block_heights.push(height);
        }
    }

    pub fn remove_pending_tx_block_height(&mut self, height: i64) {
        self.pending_tx_block_heights.retain(|h| *h != height);
    }
}

/// A set of vaults with selection helpers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vaults(pub Vec<Vault>);

impl Vaults {
    pub fn new(vaults: Vec<Vault>) -> Self {
        Vaults(vaults)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vault> {
        self.0.iter()
    }

    /// The vault holding the largest balance of `asset`, if any vault holds
    /// a positive balance at all.
    pub fn select_by_max_coin(&self, asset: &Asset) -> Option<&Vault> {
        self.0
            .iter()
            .filter(|v| v.balance_of(asset) > 0)
            .max_by_key(|v| v.balance_of(asset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(pk: &str, vault_type: VaultType, coins: Vec<Coin>) -> Vault {
        let mut v = Vault::new(PubKey::new(pk), vault_type, vec![PubKey::new(pk)]);
        v.add_funds(&Coins::new(coins));
        v
    }

    #[test]
    fn test_add_sub_funds() {
        let mut v = vault("pk", VaultType::Asgard, vec![Coin::new(Asset::bnb(), 100)]);
        v.add_funds(&Coins::one(Coin::new(Asset::bnb(), 50)));
        assert_eq!(v.balance_of(&Asset::bnb()), 150);

        v.sub_funds(&Coins::one(Coin::new(Asset::bnb(), 120))).unwrap();
        assert_eq!(v.balance_of(&Asset::bnb()), 30);
    }

    #[test]
    fn test_sub_funds_underflow_is_error() {
        let mut v = vault("pk", VaultType::Asgard, vec![Coin::new(Asset::bnb(), 10)]);
        let err = v
            .sub_funds(&Coins::one(Coin::new(Asset::bnb(), 11)))
            .unwrap_err();
        assert!(matches!(err, TypeError::InsufficientFunds { held: 10, needed: 11, .. }));
        // failed subtraction leaves the balance untouched
        assert_eq!(v.balance_of(&Asset::bnb()), 10);
    }

    #[test]
    fn test_sub_funds_partial_failure_mutates_nothing() {
        let mut v = vault(
            "pk",
            VaultType::Asgard,
            vec![Coin::new(Asset::bnb(), 100), Coin::new(Asset::rune(), 5)],
        );
        let result = v.sub_funds(&Coins::new(vec![
            Coin::new(Asset::bnb(), 50),
            Coin::new(Asset::rune(), 6),
        ]));
        assert!(result.is_err());
        assert_eq!(v.balance_of(&Asset::bnb()), 100);
        assert_eq!(v.balance_of(&Asset::rune()), 5);
    }

    #[test]
    fn test_status_never_goes_backwards() {
        let mut v = vault("pk", VaultType::Asgard, vec![]);
        v.set_status(VaultStatus::Retiring).unwrap();
        v.set_status(VaultStatus::Retiring).unwrap();
        v.set_status(VaultStatus::Inactive).unwrap();
        assert!(v.set_status(VaultStatus::Active).is_err());
        assert!(v.set_status(VaultStatus::Retiring).is_err());
        assert_eq!(v.status, VaultStatus::Inactive);
    }

    #[test]
    fn test_select_by_max_coin() {
        let vaults = Vaults::new(vec![
            vault("a", VaultType::Asgard, vec![Coin::new(Asset::bnb(), 10)]),
            vault("b", VaultType::Asgard, vec![Coin::new(Asset::bnb(), 30)]),
            vault("c", VaultType::Asgard, vec![Coin::new(Asset::rune(), 99)]),
        ]);
        let best = vaults.select_by_max_coin(&Asset::bnb()).unwrap();
        assert_eq!(best.pub_key.as_str(), "b");
        assert!(vaults.select_by_max_coin(&Asset::btc()).is_none());
    }

    #[test]
    fn test_pending_heights_dedup() {
        let mut v = vault("pk", VaultType::Asgard, vec![]);
        v.add_pending_tx_block_height(7);
        v.add_pending_tx_block_height(7);
        v.add_pending_tx_block_height(9);
        assert_eq!(v.pending_tx_block_heights, vec![7, 9]);
        v.remove_pending_tx_block_height(7);
        assert_eq!(v.pending_tx_block_heights, vec![9]);
    }
}
