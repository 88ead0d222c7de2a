// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Emits domain events and drives their lifecycle: pending while an
//! outbound is owed, completed when the outbound is observed back, and
//! force-failed when pending for too long.

use crate::error::ThorResult;
use crate::keeper::Keeper;
use bifrost_types::event::{
    EventBond, EventErrata, EventGas, EventPool, EventRefund, EventRewards, EventStake, EventSwap,
    EventUnstake, ADD_EVENT, BOND_EVENT, ERRATA_EVENT, GAS_EVENT, POOL_EVENT, REFUND_EVENT,
    RESERVE_EVENT, REWARDS_EVENT, STAKE_EVENT, SWAP_EVENT, UNSTAKE_EVENT,
};
use bifrost_types::{Event, EventStatus, Fee, Tx, TxId};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct EventManager;

impl EventManager {
    pub fn new() -> Self {
        EventManager
    }

    fn emit<T: Serialize>(
        &self,
        keeper: &Keeper,
        event_type: &str,
        height: i64,
        in_tx: Tx,
        body: &T,
        status: EventStatus,
    ) -> ThorResult<i64> {
        let body = serde_json::to_value(body)
            .map_err(|e| crate::ThorError::Store(format!("marshal {event_type} event: {e}")))?;
        let event = Event::new(event_type, height, in_tx, body, status);
        keeper.upsert_event(&event)
    }

    /// Swap events stay pending until the outbound lands.
    pub fn emit_swap_event(
        &self,
        keeper: &Keeper,
        height: i64,
        in_tx: Tx,
        body: &EventSwap,
    ) -> ThorResult<i64> {
        self.emit(keeper, SWAP_EVENT, height, in_tx, body, EventStatus::Pending)
    }

    /// Stake needs no outbound; it completes immediately.
    pub fn emit_stake_event(
        &self,
        keeper: &Keeper,
        height: i64,
        in_tx: Tx,
        body: &EventStake,
    ) -> ThorResult<i64> {
        self.emit(keeper, STAKE_EVENT, height, in_tx, body, EventStatus::Success)
    }

    pub fn emit_unstake_event(
        &self,
        keeper: &Keeper,
        height: i64,
        in_tx: Tx,
        body: &EventUnstake,
    ) -> ThorResult<i64> {
        self.emit(
            keeper,
            UNSTAKE_EVENT,
            height,
            in_tx,
            body,
            EventStatus::Pending,
        )
    }

    pub fn emit_refund_event(
        &self,
        keeper: &Keeper,
        height: i64,
        in_tx: Tx,
        code: u32,
        reason: &str,
    ) -> ThorResult<i64> {
        let body = EventRefund {
            code,
            reason: reason.to_string(),
        };
        self.emit(keeper, REFUND_EVENT, height, in_tx, &body, EventStatus::Pending)
    }

    pub fn emit_pool_event(
        &self,
        keeper: &Keeper,
        height: i64,
        in_hash: TxId,
        body: &EventPool,
    ) -> ThorResult<i64> {
        let in_tx = Tx {
            id: in_hash,
            ..Tx::default()
        };
        self.emit(keeper, POOL_EVENT, height, in_tx, body, EventStatus::Success)
    }

    pub fn emit_add_event(
        &self,
        keeper: &Keeper,
        height: i64,
        in_tx: Tx,
        pool: &bifrost_types::Asset,
    ) -> ThorResult<i64> {
        self.emit(
            keeper,
            ADD_EVENT,
            height,
            in_tx,
            &serde_json::json!({ "pool": pool }),
            EventStatus::Success,
        )
    }

    pub fn emit_gas_event(
        &self,
        keeper: &Keeper,
        height: i64,
        body: &EventGas,
    ) -> ThorResult<i64> {
        let in_tx = Tx {
            id: TxId::blank(),
            ..Tx::default()
        };
        self.emit(keeper, GAS_EVENT, height, in_tx, body, EventStatus::Success)
    }

    pub fn emit_rewards_event(
        &self,
        keeper: &Keeper,
        height: i64,
        body: &EventRewards,
    ) -> ThorResult<i64> {
        let in_tx = Tx {
            id: TxId::blank(),
            ..Tx::default()
        };
        self.emit(keeper, REWARDS_EVENT, height, in_tx, body, EventStatus::Success)
    }

    pub fn emit_errata_event(
        &self,
        keeper: &Keeper,
        height: i64,
        in_hash: TxId,
        body: &EventErrata,
    ) -> ThorResult<i64> {
        let in_tx = Tx {
            id: in_hash,
            ..Tx::default()
        };
        self.emit(keeper, ERRATA_EVENT, height, in_tx, body, EventStatus::Success)
    }

    pub fn emit_bond_event(
        &self,
        keeper: &Keeper,
        height: i64,
        in_tx: Tx,
        body: &EventBond,
    ) -> ThorResult<i64> {
        self.emit(keeper, BOND_EVENT, height, in_tx, body, EventStatus::Success)
    }

    pub fn emit_reserve_event(
        &self,
        keeper: &Keeper,
        height: i64,
        in_tx: Tx,
        amount: u64,
    ) -> ThorResult<i64> {
        self.emit(
            keeper,
            RESERVE_EVENT,
            height,
            in_tx,
            &serde_json::json!({ "amount": amount }),
            EventStatus::Success,
        )
    }

    /// Attach the concrete fee taken at dispatch time to every pending event
    /// of the inbound hash (a single inbound can carry several).
    pub fn update_event_fee(&self, keeper: &Keeper, in_hash: &TxId, fee: &Fee) -> ThorResult<()> {
        let ids = keeper.get_pending_event_ids(in_hash)?;
        if ids.is_empty() {
            debug!(%in_hash, "no pending event to attach fee to");
            return Ok(());
        }
        for id in ids {
            let mut event = keeper.get_event(id)?;
            event.fee = fee.clone();
            keeper.upsert_event(&event)?;
        }
        Ok(())
    }

    /// Flip every pending event of `in_hash` to `status` and record the
    /// observed out-txs.
    pub fn complete_events(
        &self,
        keeper: &Keeper,
        height: i64,
        in_hash: &TxId,
        out_txs: Vec<Tx>,
        status: EventStatus,
    ) -> ThorResult<()> {
        let ids = keeper.get_pending_event_ids(in_hash)?;
        for id in ids {
            let mut event = keeper.get_event(id)?;
            event.height = height;
            event.out_txs.extend(out_txs.iter().cloned());
            event.status = status;
            keeper.upsert_event(&event)?;
        }
        Ok(())
    }

    /// Force-fail events that have sat pending longer than `max_age` blocks.
    /// Returns the failed ids.
    pub fn sweep_stale_pending(
        &self,
        keeper: &Keeper,
        current_height: i64,
        max_age: i64,
    ) -> ThorResult<Vec<i64>> {
        let mut failed = Vec::new();
        for event in keeper.get_all_pending_events()? {
            if current_height - event.height > max_age {
                warn!(id = event.id, height = event.height, "force-failing stale pending event");
                let mut event = event;
                event.status = EventStatus::Failed;
                keeper.upsert_event(&event)?;
                failed.push(event.id);
            }
        }
        Ok(failed)
    }
}
