// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Daemon-local persistence on sled: scan cursors, the failed-block retry
//! queue, UTXO block metadata for the bitcoin signer, and the signed-item
//! dedup set.

use crate::error::{ChainError, ChainResult};
use bifrost_types::{Chain, TxId};
use serde::{Deserialize, Serialize};

/// How many blocks of UTXO metadata to keep. Metas with unspent outputs are
/// retained past the window until they are spent.
pub const BLOCK_CACHE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockScanStatus {
    NotStarted,
    Processing,
    Failed,
}

/// One unspent output custodied by a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub tx_id: TxId,
    pub vout: u32,
    pub value: u64,
    pub spent: bool,
}

/// Per-block record of the vault's unspent outputs on a UTXO chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub height: i64,
    pub block_hash: String,
    pub utxos: Vec<UnspentOutput>,
}

impl BlockMeta {
    pub fn new(height: i64, block_hash: &str) -> Self {
        BlockMeta {
            height,
            block_hash: block_hash.to_string(),
            utxos: Vec::new(),
        }
    }

    pub fn has_unspent(&self) -> bool {
        self.utxos.iter().any(|u| !u.spent)
    }
}

pub struct ScannerStorage {
    db: sled::Db,
}

impl ScannerStorage {
    pub fn open(path: &str) -> ChainResult<Self> {
        Ok(ScannerStorage {
            db: sled::open(path)?,
        })
    }

    /// In-memory database for tests.
    pub fn memory() -> ChainResult<Self> {
        Ok(ScannerStorage {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> ChainResult<Option<T>> {
        match self.db.get(key)? {
            None => Ok(None),
            Some(buf) => serde_json::from_slice(&buf)
                .map(Some)
                .map_err(|e| ChainError::Storage(format!("unmarshal {key}: {e}"))),
        }
    }

    fn set<T: Serialize>(&self, key: &str, value: &T) -> ChainResult<()> {
        let buf = serde_json::to_vec(value)
            .map_err(|e| ChainError::Storage(format!("marshal {key}: {e}")))?;
        self.db.insert(key, buf)?;
        self.db.flush()?;
        Ok(())
    }

    // ---- scan cursor ----

    pub fn get_scan_pos(&self, chain: &Chain) -> ChainResult<Option<i64>> {
        self.get(&format!("scan/{chain}"))
    }

    pub fn set_scan_pos(&self, chain: &Chain, height: i64) -> ChainResult<()> {
        self.set(&format!("scan/{chain}"), &height)
    }

    // ---- block status (retry queue) ----

    fn block_key(chain: &Chain, height: i64) -> String {
        format!("block/{chain}/{height:020}")
    }

    pub fn set_block_status(
        &self,
        chain: &Chain,
        height: i64,
        status: BlockScanStatus,
    ) -> ChainResult<()> {
        self.set(&Self::block_key(chain, height), &status)
    }

    pub fn remove_block_status(&self, chain: &Chain, height: i64) -> ChainResult<()> {
        self.db.remove(Self::block_key(chain, height))?;
        Ok(())
    }

    /// Heights to re-emit: `Failed` blocks, or every tracked block when
    /// `failed_only` is false (start-up recovery).
    pub fn get_blocks_for_retry(
        &self,
        chain: &Chain,
        failed_only: bool,
    ) -> ChainResult<Vec<i64>> {
        let prefix = format!("block/{chain}/");
        let mut heights = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, buf) = entry?;
            let status: BlockScanStatus = serde_json::from_slice(&buf)
                .map_err(|e| ChainError::Storage(format!("unmarshal block status: {e}")))?;
            if failed_only && status != BlockScanStatus::Failed {
                continue;
            }
            let key = String::from_utf8_lossy(&key);
            let height: i64 = key
                .rsplit('/')
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ChainError::Storage(format!("bad block key {key}")))?;
            heights.push(height);
        }
        Ok(heights)
    }

    // ---- UTXO block metadata ----

    fn block_meta_key(chain: &Chain, height: i64) -> String {
        format!("block_meta/{chain}/{height:020}")
    }

    pub fn get_block_meta(&self, chain: &Chain, height: i64) -> ChainResult<Option<BlockMeta>> {
        self.get(&Self::block_meta_key(chain, height))
    }

    pub fn set_block_meta(&self, chain: &Chain, meta: &BlockMeta) -> ChainResult<()> {
        self.set(&Self::block_meta_key(chain, meta.height), meta)
    }

    pub fn get_block_metas(&self, chain: &Chain) -> ChainResult<Vec<BlockMeta>> {
        let prefix = format!("block_meta/{chain}/");
        let mut metas = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, buf) = entry?;
            let meta: BlockMeta = serde_json::from_slice(&buf)
                .map_err(|e| ChainError::Storage(format!("unmarshal block meta: {e}")))?;
            metas.push(meta);
        }
        Ok(metas)
    }

    /// Evict metas that fell out of the cache window, keeping any that still
    /// hold unspent outputs.
    pub fn prune_block_metas(&self, chain: &Chain, tip: i64) -> ChainResult<()> {
        for meta in self.get_block_metas(chain)? {
            if meta.height < tip - BLOCK_CACHE_SIZE && !meta.has_unspent() {
                self.db.remove(Self::block_meta_key(chain, meta.height))?;
            }
        }
        Ok(())
    }

    // ---- signed-item dedup ----

    pub fn has_signed(&self, key: &str) -> ChainResult<bool> {
        Ok(self.db.contains_key(format!("signed/{key}"))?)
    }

    pub fn set_signed(&self, key: &str) -> ChainResult<()> {
        self.set(&format!("signed/{key}"), &true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_pos_round_trip() {
        let storage = ScannerStorage::memory().unwrap();
        let chain = Chain::bnb();
        assert_eq!(storage.get_scan_pos(&chain).unwrap(), None);
        storage.set_scan_pos(&chain, 42).unwrap();
        assert_eq!(storage.get_scan_pos(&chain).unwrap(), Some(42));
        storage.set_scan_pos(&chain, 43).unwrap();
        assert_eq!(storage.get_scan_pos(&chain).unwrap(), Some(43));
    }

    #[test]
    fn test_blocks_for_retry() {
        let storage = ScannerStorage::memory().unwrap();
        let chain = Chain::bnb();
        storage
            .set_block_status(&chain, 10, BlockScanStatus::Failed)
            .unwrap();
        storage
            .set_block_status(&chain, 11, BlockScanStatus::NotStarted)
            .unwrap();
        storage
            .set_block_status(&chain, 12, BlockScanStatus::Failed)
            .unwrap();

        assert_eq!(storage.get_blocks_for_retry(&chain, true).unwrap(), vec![10, 12]);
        assert_eq!(
            storage.get_blocks_for_retry(&chain, false).unwrap(),
            vec![10, 11, 12]
        );

        storage.remove_block_status(&chain, 10).unwrap();
        assert_eq!(storage.get_blocks_for_retry(&chain, true).unwrap(), vec![12]);
    }

    #[test]
    fn test_retry_queue_scoped_per_chain() {
        let storage = ScannerStorage::memory().unwrap();
        storage
            .set_block_status(&Chain::bnb(), 10, BlockScanStatus::Failed)
            .unwrap();
        assert!(storage.get_blocks_for_retry(&Chain::btc(), true).unwrap().is_empty());
    }

    #[test]
    fn test_block_meta_pruning_spares_unspent() {
        let storage = ScannerStorage::memory().unwrap();
        let chain = Chain::btc();

        let mut spent = BlockMeta::new(1, "hash-1");
        spent.utxos.push(UnspentOutput {
            tx_id: TxId::new("a"),
            vout: 0,
            value: 100,
            spent: true,
        });
        storage.set_block_meta(&chain, &spent).unwrap();

        let mut unspent = BlockMeta::new(2, "hash-2");
        unspent.utxos.push(UnspentOutput {
            tx_id: TxId::new("b"),
            vout: 0,
            value: 100,
            spent: false,
        });
        storage.set_block_meta(&chain, &unspent).unwrap();

        // both fell far outside the window, but the unspent one survives
        storage.prune_block_metas(&chain, 1000).unwrap();
        assert!(storage.get_block_meta(&chain, 1).unwrap().is_none());
        assert!(storage.get_block_meta(&chain, 2).unwrap().is_some());
    }

    #[test]
    fn test_signed_dedup() {
        let storage = ScannerStorage::memory().unwrap();
        assert!(!storage.has_signed("k1").unwrap());
        storage.set_signed("k1").unwrap();
        assert!(storage.has_signed("k1").unwrap());
    }
}
