// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transaction types flowing between the chain adapters, the observation
//! pipeline and the ledger.

use crate::chain::{Address, Chain};
use crate::coin::{Coin, Coins};
use crate::pubkey::PubKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// External-chain transaction hash.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    pub fn new(s: &str) -> Self {
        TxId(s.to_string())
    }

    /// Placeholder hash used where no real transaction exists (e.g. reward
    /// events, outbounds whose inbound is synthetic).
    pub fn blank() -> Self {
        TxId("0000000000000000000000000000000000000000000000000000000000000000".to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty() || *self == TxId::blank()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TxId {
    fn from(s: &str) -> Self {
        TxId::new(s)
    }
}

/// Gas spent by a transaction, expressed as coins of the chain's gas asset.
pub type Gas = Coins;

/// Fee taken by the network for an outbound, plus the RUNE deducted from the
/// pool when the fee was paid in a non-native asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Fee {
    pub coins: Coins,
    pub pool_deduct: u64,
}

impl Fee {
    pub fn new(coins: Coins, pool_deduct: u64) -> Self {
        Fee { coins, pool_deduct }
    }
}

/// A fully decoded external transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Tx {
    pub id: TxId,
    pub chain: Chain,
    pub from_address: Address,
    pub to_address: Address,
    pub coins: Coins,
    pub gas: Gas,
    pub memo: String,
}

impl Tx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TxId,
        chain: Chain,
        from_address: Address,
        to_address: Address,
        coins: Coins,
        gas: Gas,
        memo: &str,
    ) -> Self {
        Tx {
            id,
            chain,
            from_address,
            to_address,
            coins,
            gas,
            memo: memo.to_string(),
        }
    }
}

/// One observer's report of one external transaction. `signers` starts as a
/// singleton (the reporting node) and accumulates as the voter merges
/// identical shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObservedTx {
    pub tx: Tx,
    /// Remote chain height the tx was seen at.
    pub block_height: i64,
    /// The vault key the observer believed this tx touched.
    pub observed_pub_key: PubKey,
    /// Node addresses that reported exactly this shape.
    pub signers: Vec<String>,
}

impl ObservedTx {
    pub fn new(tx: Tx, block_height: i64, observed_pub_key: PubKey) -> Self {
        ObservedTx {
            tx,
            block_height,
            observed_pub_key,
            signers: Vec::new(),
        }
    }

    /// Shape equality: every field except the signer set, with coins in
    /// canonical order.
    pub fn same_shape(&self, other: &ObservedTx) -> bool {
        self.block_height == other.block_height
            && self.observed_pub_key == other.observed_pub_key
            && self.tx.id == other.tx.id
            && self.tx.chain == other.tx.chain
            && self.tx.from_address == other.tx.from_address
            && self.tx.to_address == other.tx.to_address
            && self.tx.memo == other.tx.memo
            && self.tx.coins.sorted() == other.tx.coins.sorted()
            && self.tx.gas.sorted() == other.tx.gas.sorted()
    }

    pub fn has_signed(&self, signer: &str) -> bool {
        self.signers.iter().any(|s| s == signer)
    }
}

/// A single candidate transaction emitted by a chain scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxInItem {
    pub tx: TxId,
    pub sender: Address,
    pub to: Address,
    pub coins: Coins,
    pub gas: Gas,
    pub memo: String,
    /// Pub key of the vault this tx was matched against.
    pub observed_pool_address: PubKey,
}

/// A block's worth of candidate transactions for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxIn {
    pub chain: Chain,
    pub block_height: i64,
    pub tx_array: Vec<TxInItem>,
}

impl TxIn {
    pub fn new(chain: Chain, block_height: i64) -> Self {
        TxIn {
            chain,
            block_height,
            tx_array: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tx_array.is_empty()
    }
}

impl TxInItem {
    /// Lift a scanner item into the observation the ledger votes on.
    pub fn to_observed_tx(&self, chain: Chain, block_height: i64) -> ObservedTx {
        ObservedTx::new(
            Tx::new(
                self.tx.clone(),
                chain,
                self.sender.clone(),
                self.to.clone(),
                self.coins.clone(),
                self.gas.clone(),
                &self.memo,
            ),
            block_height,
            self.observed_pool_address.clone(),
        )
    }
}
