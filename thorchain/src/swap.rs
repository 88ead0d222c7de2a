// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Swap execution against the constant-product pools, and the curve helpers
//! the swap queue scores with.

use crate::error::{ThorError, ThorResult};
use crate::event_manager::EventManager;
use crate::keeper::Keeper;
use crate::txout_store::TxOutStore;
use bifrost_types::event::EventSwap;
use bifrost_types::{Address, Asset, Coin, Tx, TxOutItem};
use serde::{Deserialize, Serialize};

/// A queued swap request, parked until end-of-block scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSwap {
    pub tx: Tx,
    pub target_asset: Asset,
    pub destination: Address,
    /// Price protection: minimum acceptable output, 0 disables.
    pub trade_target: u64,
    pub signer: String,
}

/// Liquidity fee of swapping `x` into a pool with input-side balance `big_x`
/// and output-side balance `big_y`: x^2 * Y / (x + X)^2.
pub fn calc_liquidity_fee(big_x: u64, x: u64, big_y: u64) -> u64 {
    let x = x as u128;
    let big_x = big_x as u128;
    let big_y = big_y as u128;
    let denominator = (x + big_x) * (x + big_x);
    if denominator == 0 {
        return 0;
    }
    ((x * x * big_y) / denominator) as u64
}

/// Trade slip of swapping `x` against input-side balance `big_x`, in basis
/// points: x * (2X + x) / X^2.
pub fn calc_trade_slip(big_x: u64, x: u64) -> u64 {
    let x = x as u128;
    let big_x = big_x as u128;
    if big_x == 0 {
        return 0;
    }
    ((x * (2 * big_x + x) * 10_000) / (big_x * big_x)) as u64
}

/// Assets emitted to the swapper: x * X * Y / (x + X)^2.
pub fn calc_asset_emission(big_x: u64, x: u64, big_y: u64) -> u64 {
    let x = x as u128;
    let big_x = big_x as u128;
    let big_y = big_y as u128;
    let denominator = (x + big_x) * (x + big_x);
    if denominator == 0 {
        return 0;
    }
    ((x * big_x * big_y) / denominator) as u64
}

/// One leg of a swap through a single pool. Mutates and persists the pool,
/// returning the emitted amount and the swap event body.
fn swap_one(keeper: &Keeper, source: &Coin, target: &Asset) -> ThorResult<(u64, EventSwap)> {
    let pool_asset = if source.asset.is_rune() {
        target.clone()
    } else {
        source.asset.clone()
    };
    let mut pool = keeper.get_pool(&pool_asset)?;

    let x = source.amount;
    let (big_x, big_y) = if source.asset.is_rune() {
        (pool.balance_rune, pool.balance_asset)
    } else {
        (pool.balance_asset, pool.balance_rune)
    };

    if x == 0 {
        return Err(ThorError::SwapFailed("amount is invalid".to_string()));
    }
    if big_x == 0 || big_y == 0 {
        return Err(ThorError::SwapFailed(format!(
            "pool {pool_asset} has invalid balance"
        )));
    }

    let mut liquidity_fee = calc_liquidity_fee(big_x, x, big_y);
    let trade_slip = calc_trade_slip(big_x, x);
    let emit = calc_asset_emission(big_x, x, big_y);
    if source.asset.is_rune() {
        // fee came out denominated in the asset; report it in RUNE
        liquidity_fee = pool.asset_value_in_rune(liquidity_fee);
    }
    if emit > big_y {
        return Err(ThorError::SwapFailed(format!(
            "pool {pool_asset} balance {big_y} cannot emit {emit}"
        )));
    }

    if source.asset.is_rune() {
        pool.balance_rune = big_x.saturating_add(x);
        pool.balance_asset = big_y.saturating_sub(emit);
    } else {
        pool.balance_asset = big_x.saturating_add(x);
        pool.balance_rune = big_y.saturating_sub(emit);
    }
    keeper.set_pool(&pool)?;

    let event = EventSwap {
        pool: pool_asset,
        price_target: 0,
        trade_slip,
        liquidity_fee,
    };
    Ok((emit, event))
}

/// Execute a queued swap: one leg when either side is RUNE, two legs through
/// RUNE otherwise. Emits a pending swap event and schedules the outbound;
/// the event completes when the outbound is observed back.
pub fn execute_swap(
    keeper: &Keeper,
    txout_store: &TxOutStore,
    event_mgr: &EventManager,
    msg: &MsgSwap,
    height: i64,
) -> ThorResult<u64> {
    let source = msg
        .tx
        .coins
        .iter()
        .next()
        .cloned()
        .ok_or_else(|| ThorError::SwapFailed("no source coin".to_string()))?;
    if source.asset == msg.target_asset {
        return Err(ThorError::SwapFailed("swap to the same asset".to_string()));
    }

    let (emitted, mut event) = if source.asset.is_rune() || msg.target_asset.is_rune() {
        swap_one(keeper, &source, &msg.target_asset)?
    } else {
        // route through RUNE: asset -> RUNE -> asset
        let (rune_out, _first_leg) = swap_one(keeper, &source, &Asset::rune())?;
        let rune_coin = Coin::new(Asset::rune(), rune_out);
        swap_one(keeper, &rune_coin, &msg.target_asset)?
    };

    if msg.trade_target > 0 && emitted < msg.trade_target {
        return Err(ThorError::SwapFailed(format!(
            "emitted {emitted} below trade target {}",
            msg.trade_target
        )));
    }
    event.price_target = msg.trade_target;
    event_mgr.emit_swap_event(keeper, height, msg.tx.clone(), &event)?;

    let mut toi = TxOutItem::new(
        msg.target_asset.chain.clone(),
        msg.destination.clone(),
        Coin::new(msg.target_asset.clone(), emitted),
        msg.tx.id.clone(),
    );
    toi.memo = String::new(); // defaulted to outbound:<in_hash> by the store
    txout_store.try_add_tx_out_item(keeper, event_mgr, toi)?;
    Ok(emitted)
}
