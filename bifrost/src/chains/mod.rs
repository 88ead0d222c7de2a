// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The chain-adapter seam: one trait, one implementation per supported
//! chain, held in a registry keyed by chain tag. This is the only
//! interface-abstracted boundary in the daemon.

pub mod binance;
pub mod bitcoin;
pub mod ethereum;

pub use binance::BinanceAdapter;
pub use bitcoin::BitcoinAdapter;
pub use ethereum::EthereumAdapter;

use crate::error::{ChainError, ChainResult};
use crate::tss::KeySign;
use async_trait::async_trait;
use bifrost_types::{Address, Asset, Chain, Coins, PubKey, TxId, TxInItem, TxOutItem};
use std::collections::HashMap;
use std::sync::Arc;

/// A fetched remote block: raw, still-encoded transactions.
#[derive(Debug, Clone)]
pub struct Block {
    pub chain: Chain,
    pub height: i64,
    pub txs: Vec<String>,
}

/// Account state on an account-model chain.
#[derive(Debug, Clone, Default)]
pub struct Account {
    pub sequence: u64,
    pub account_number: u64,
    pub coins: Coins,
}

/// Per-chain plug-in: fetch and decode blocks, sign and broadcast
/// outbounds. Implementations must treat a "tx already in chain" broadcast
/// response as success.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> Chain;

    fn get_gas_asset(&self) -> Asset {
        self.chain().gas_asset()
    }

    /// Vault key to on-chain address.
    fn address_of(&self, pub_key: &PubKey) -> Address {
        pub_key.chain_address(&self.chain())
    }

    async fn get_height(&self) -> ChainResult<i64>;

    async fn fetch_block(&self, height: i64) -> ChainResult<Block>;

    /// Decode one raw transaction into a candidate item. `Ok(None)` means
    /// the tx is structurally irrelevant (no transfer, dust pattern);
    /// `PermanentDecode` means it can never parse and should be skipped.
    async fn decode_tx(&self, raw: &str, height: i64) -> ChainResult<Option<TxInItem>>;

    async fn get_account(&self, addr: &Address) -> ChainResult<Account>;

    /// Build and sign the outbound with the given signer. The ledger height
    /// is available for chains that need deterministic metadata.
    async fn sign_tx(
        &self,
        toi: &TxOutItem,
        height: i64,
        signer: &dyn KeySign,
    ) -> ChainResult<Vec<u8>>;

    async fn broadcast_tx(&self, toi: &TxOutItem, signed: &[u8]) -> ChainResult<TxId>;

    /// Chain-specific fee refresh, run per accepted block where the chain
    /// publishes fee parameters (Binance family).
    async fn update_fees(&self, _height: i64) -> ChainResult<()> {
        Ok(())
    }

    /// Whether locally cached signing metadata (sequence, nonce) is still
    /// usable for this outbound.
    async fn validate_metadata(&self, _toi: &TxOutItem) -> bool {
        true
    }
}

/// Registry of adapters keyed by chain.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        AdapterRegistry {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.chain(), adapter);
    }

    pub fn get(&self, chain: &Chain) -> ChainResult<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(chain)
            .cloned()
            .ok_or_else(|| ChainError::UnknownChain(chain.to_string()))
    }

    pub fn chains(&self) -> Vec<Chain> {
        self.adapters.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Chain, &Arc<dyn ChainAdapter>)> {
        self.adapters.iter()
    }
}
