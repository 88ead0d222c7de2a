// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::asset::Asset;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum PoolStatus {
    Enabled,
    Bootstrap,
    Suspended,
}

/// Per-asset liquidity bucket: asset balance, RUNE balance and unit total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub asset: Asset,
    pub balance_rune: u64,
    pub balance_asset: u64,
    pub pool_units: u64,
    pub status: PoolStatus,
}

impl Pool {
    pub fn new(asset: Asset) -> Self {
        Pool {
            asset,
            balance_rune: 0,
            balance_asset: 0,
            pool_units: 0,
            status: PoolStatus::Bootstrap,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.balance_rune == 0 && self.balance_asset == 0
    }

    /// Value of a RUNE amount expressed in the pool's asset.
    pub fn rune_value_in_asset(&self, rune: u64) -> u64 {
        if self.balance_rune == 0 {
            return 0;
        }
        ((rune as u128 * self.balance_asset as u128) / self.balance_rune as u128) as u64
    }

    /// Value of an asset amount expressed in RUNE.
    pub fn asset_value_in_rune(&self, asset: u64) -> u64 {
        if self.balance_asset == 0 {
            return 0;
        }
        ((asset as u128 * self.balance_rune as u128) / self.balance_asset as u128) as u64
    }
}
