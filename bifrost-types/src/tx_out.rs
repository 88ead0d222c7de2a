// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::chain::{Address, Chain};
use crate::coin::Coin;
use crate::pubkey::PubKey;
use crate::tx::TxId;
use serde::{Deserialize, Serialize};

/// A pending outbound payment. Created by a ledger handler, given a paying
/// vault by the outbound store, signed, broadcast, and finally observed back
/// as an outbound transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutItem {
    pub chain: Chain,
    #[serde(rename = "to")]
    pub to_address: Address,
    /// Which vault pays. May be empty until the outbound store schedules it.
    #[serde(rename = "vault_pubkey")]
    pub vault_pub_key: PubKey,
    pub coin: Coin,
    pub memo: String,
    /// The inbound tx this outbound answers.
    pub in_hash: TxId,
    pub out_hash: TxId,
    /// Optional per-chain gas cap applied at sign time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_gas: Option<Coin>,
}

impl TxOutItem {
    pub fn new(chain: Chain, to_address: Address, coin: Coin, in_hash: TxId) -> Self {
        TxOutItem {
            chain,
            to_address,
            vault_pub_key: PubKey::default(),
            coin,
            memo: String::new(),
            in_hash,
            out_hash: TxId::default(),
            max_gas: None,
        }
    }

    /// Storage key for signer-side dispatch dedup: one key per distinct
    /// outbound intent per block.
    pub fn dedup_key(&self, height: i64) -> String {
        format!(
            "{}-{}-{}-{}-{}-{}",
            height, self.in_hash, self.vault_pub_key, self.memo, self.coin, self.to_address
        )
    }
}

/// The sealed outbound list for one ledger block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxOut {
    pub height: i64,
    pub tx_array: Vec<TxOutItem>,
}

impl TxOut {
    pub fn new(height: i64) -> Self {
        TxOut {
            height,
            tx_array: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tx_array.is_empty()
    }
}
