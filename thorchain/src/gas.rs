// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gas accounting for observed outbounds: pooled funds physically shrink by
//! the gas a vault spends on-chain, so the pool's asset side is debited and
//! the reserve subsidises the RUNE side at equal value.

use crate::error::ThorResult;
use crate::event_manager::EventManager;
use crate::keeper::Keeper;
use bifrost_types::event::{EventGas, GasType};
use bifrost_types::{Coin, Coins};
use std::sync::Mutex;
use tracing::debug;

/// Collects gas spent during a block and settles it at end-of-block with a
/// single gas event.
#[derive(Debug, Default)]
pub struct GasManager {
    collected: Mutex<Vec<Coin>>,
}

impl GasManager {
    pub fn new() -> Self {
        GasManager {
            collected: Mutex::new(Vec::new()),
        }
    }

    pub fn begin_block(&self) {
        self.collected.lock().expect("gas lock poisoned").clear();
    }

    pub fn add_gas(&self, gas: &Coins) {
        let mut collected = self.collected.lock().expect("gas lock poisoned");
        for coin in gas.iter() {
            if coin.amount == 0 {
                continue;
            }
            match collected.iter_mut().find(|c| c.asset == coin.asset) {
                Some(held) => held.amount = held.amount.saturating_add(coin.amount),
                None => collected.push(coin.clone()),
            }
        }
    }

    /// Apply collected gas to the pools and emit one gas event for the
    /// block. The reserve tops the pool's RUNE side back up to equal value,
    /// as far as it can.
    pub fn end_block(
        &self,
        keeper: &Keeper,
        event_mgr: &EventManager,
        height: i64,
    ) -> ThorResult<()> {
        let collected: Vec<Coin> = {
            let mut guard = self.collected.lock().expect("gas lock poisoned");
            std::mem::take(&mut *guard)
        };
        if collected.is_empty() {
            return Ok(());
        }

        for coin in &collected {
            let mut pool = keeper.get_pool(&coin.asset)?;
            if pool.is_empty() {
                continue;
            }
            let rune_value = pool.asset_value_in_rune(coin.amount);
            pool.balance_asset = pool.balance_asset.saturating_sub(coin.amount);
            let subsidy = keeper.sub_from_reserve(rune_value)?;
            pool.balance_rune = pool.balance_rune.saturating_add(subsidy);
            keeper.set_pool(&pool)?;
            debug!(asset = %coin.asset, gas = coin.amount, subsidy, "gas settled against pool");
        }

        let body = EventGas {
            gas: Coins::new(collected),
            gas_type: GasType::Spend,
        };
        event_mgr.emit_gas_event(keeper, height, &body)?;
        Ok(())
    }
}
