// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-of-block swap execution: queued swaps are scored by liquidity fee and
//! trade slip, ordered, and a bounded prefix executed.

use crate::error::ThorResult;
use crate::event_manager::EventManager;
use crate::keeper::Keeper;
use crate::swap::{calc_liquidity_fee, calc_trade_slip, execute_swap, MsgSwap};
use crate::txout_store::TxOutStore;
use tracing::{debug, error};

const MAX_SWAPS_PER_BLOCK: usize = 100;
const MIN_SWAPS_PER_BLOCK: usize = 10;

#[derive(Debug, Clone)]
struct SwapItem {
    msg: MsgSwap,
    fee: u64,
    slip: u64,
}

#[derive(Debug, Default)]
pub struct SwapQueue;

impl SwapQueue {
    pub fn new() -> Self {
        SwapQueue
    }

    /// Park a swap for end-of-block processing.
    pub fn enqueue(&self, keeper: &Keeper, msg: MsgSwap) -> ThorResult<()> {
        keeper.set_swap_queue_item(&msg)
    }

    /// Score, order and execute a bounded prefix of the queue. Executed
    /// swaps are removed whether they succeed or not; the remainder
    /// survives to the next block.
    pub fn end_block(
        &self,
        keeper: &Keeper,
        txout_store: &TxOutStore,
        event_mgr: &EventManager,
        height: i64,
    ) -> ThorResult<()> {
        let msgs = keeper.get_swap_queue()?;
        if msgs.is_empty() {
            return Ok(());
        }
        let items = self.score_msgs(keeper, msgs)?;
        let sorted = sort_items(items);
        let todo = todo_num(sorted.len());
        debug!(queued = sorted.len(), todo, "processing swap queue");

        for item in sorted.into_iter().take(todo) {
            if let Err(e) = execute_swap(keeper, txout_store, event_mgr, &item.msg, height) {
                error!(tx = %item.msg.tx.id, error = %e, "fail to swap");
            }
            keeper.remove_swap_queue_item(&item.msg.tx.id);
        }
        Ok(())
    }

    /// Attach the fee and slip each queued swap would realise against the
    /// current pool depths.
    fn score_msgs(&self, keeper: &Keeper, msgs: Vec<MsgSwap>) -> ThorResult<Vec<SwapItem>> {
        let mut items = Vec::with_capacity(msgs.len());
        for msg in msgs {
            let source = match msg.tx.coins.iter().next() {
                Some(coin) => coin.clone(),
                None => continue,
            };
            let pool_asset = if source.asset.is_rune() {
                msg.target_asset.clone()
            } else {
                source.asset.clone()
            };
            let pool = keeper.get_pool(&pool_asset)?;

            let x = source.amount;
            let (big_x, big_y) = if source.asset.is_rune() {
                (pool.balance_rune, pool.balance_asset)
            } else {
                (pool.balance_asset, pool.balance_rune)
            };

            let mut fee = calc_liquidity_fee(big_x, x, big_y);
            if source.asset.is_rune() {
                // keep the fee rank denominated consistently in RUNE
                fee = pool.asset_value_in_rune(fee);
            }
            let slip = calc_trade_slip(big_x, x);

            items.push(SwapItem { msg, fee, slip });
        }
        Ok(items)
    }
}

/// How many swaps to execute this block: half the queue, floored at
/// min(queue, 10) and capped at 100.
fn todo_num(queue_len: usize) -> usize {
    (queue_len / 2).clamp(queue_len.min(MIN_SWAPS_PER_BLOCK), MAX_SWAPS_PER_BLOCK)
}

/// Order by combined rank: position in the fee ranking (descending fee)
/// plus position in the slip ranking (descending slip); lower total runs
/// first.
fn sort_items(items: Vec<SwapItem>) -> Vec<SwapItem> {
    let mut by_fee: Vec<usize> = (0..items.len()).collect();
    by_fee.sort_by(|&a, &b| items[b].fee.cmp(&items[a].fee));

    let mut by_slip: Vec<usize> = (0..items.len()).collect();
    by_slip.sort_by(|&a, &b| items[b].slip.cmp(&items[a].slip));

    let mut scores = vec![0usize; items.len()];
    for (rank, &idx) in by_fee.iter().enumerate() {
        scores[idx] += rank;
    }
    for (rank, &idx) in by_slip.iter().enumerate() {
        scores[idx] += rank;
    }

    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by_key(|&idx| scores[idx]);

    let mut items: Vec<Option<SwapItem>> = items.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|idx| items[idx].take().expect("each index taken once"))
        .collect()
}
