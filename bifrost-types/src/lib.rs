// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core data model shared between the bifrost daemon and the ledger-side
//! state machine: chains, assets, coins, keys, transactions, memos, vaults,
//! pools, outbound items and domain events.

pub mod asset;
pub mod chain;
pub mod coin;
pub mod event;
pub mod memo;
pub mod pool;
pub mod pubkey;
pub mod tx;
pub mod tx_out;
pub mod vault;

pub use asset::Asset;
pub use chain::{Address, Chain};
pub use coin::{Coin, Coins};
pub use event::{Event, EventStatus};
pub use memo::Memo;
pub use pool::{Pool, PoolStatus};
pub use pubkey::{PubKey, PubKeySet};
pub use tx::{Fee, Gas, ObservedTx, Tx, TxId, TxIn, TxInItem};
pub use tx_out::{TxOut, TxOutItem};
pub use vault::{Vault, VaultStatus, VaultType, Vaults};

/// One unit of any asset, expressed in 1e8 fixed point.
pub const ONE: u64 = 100_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("invalid chain: {0}")]
    InvalidChain(String),

    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    #[error("invalid memo: {0}")]
    InvalidMemo(String),

    #[error("insufficient funds: vault holds {held} {asset}, needs {needed}")]
    InsufficientFunds {
        asset: String,
        held: u64,
        needed: u64,
    },

    #[error("invalid vault status transition: {0} -> {1}")]
    InvalidStatusTransition(String, String),
}
