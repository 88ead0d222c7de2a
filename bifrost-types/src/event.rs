// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Domain events with a lifecycle: emitted pending where an outbound is
//! still owed, completed when the outbound is observed back.

use crate::asset::Asset;
use crate::coin::Coins;
use crate::tx::{Fee, Tx};
use serde::{Deserialize, Serialize};

pub const SWAP_EVENT: &str = "swap";
pub const STAKE_EVENT: &str = "stake";
pub const UNSTAKE_EVENT: &str = "unstake";
pub const REFUND_EVENT: &str = "refund";
pub const POOL_EVENT: &str = "pool";
pub const GAS_EVENT: &str = "gas";
pub const REWARDS_EVENT: &str = "rewards";
pub const ERRATA_EVENT: &str = "errata";
pub const ADD_EVENT: &str = "add";
pub const BOND_EVENT: &str = "bond";
pub const RESERVE_EVENT: &str = "reserve";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Pending,
    Success,
    Failed,
    Refund,
}

/// Stored event envelope. `id` is assigned monotonically at first insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub height: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub in_tx: Tx,
    pub fee: Fee,
    pub out_txs: Vec<Tx>,
    pub body: serde_json::Value,
    pub status: EventStatus,
}

impl Event {
    pub fn new(
        event_type: &str,
        height: i64,
        in_tx: Tx,
        body: serde_json::Value,
        status: EventStatus,
    ) -> Self {
        Event {
            id: 0,
            height,
            event_type: event_type.to_string(),
            in_tx,
            fee: Fee::default(),
            out_txs: Vec::new(),
            body,
            status,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == EventStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSwap {
    pub pool: Asset,
    pub price_target: u64,
    pub trade_slip: u64,
    pub liquidity_fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStake {
    pub pool: Asset,
    pub stake_units: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUnstake {
    pub pool: Asset,
    pub stake_units: u64,
    pub basis_points: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRefund {
    pub code: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPool {
    pub pool: Asset,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasType {
    #[serde(rename = "gas_spend")]
    Spend,
    #[serde(rename = "gas_topup")]
    Topup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventGas {
    pub gas: Coins,
    pub gas_type: GasType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAmount {
    pub asset: Asset,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRewards {
    pub bond_reward: u64,
    pub pool_rewards: Vec<PoolAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventErrata {
    pub tx_id: String,
    pub pools: Vec<PoolAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BondType {
    #[serde(rename = "bond_paid")]
    Paid,
    #[serde(rename = "bond_returned")]
    Returned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBond {
    pub amount: u64,
    pub bond_type: BondType,
}
