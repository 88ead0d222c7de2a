// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-chain block tailing: one cursor per chain, strictly increasing, with
//! a failed-block replay ticker. A block is only emitted downstream after
//! the previous cursor persisted; a cursor persist failure halts the
//! scanner rather than risking double-processing across a restart.

use crate::chains::ChainAdapter;
use crate::config::BlockScannerConfig;
use crate::error::ChainError;
use crate::metrics::BifrostMetrics;
use crate::storage::{BlockScanStatus, ScannerStorage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct BlockScanner {
    adapter: Arc<dyn ChainAdapter>,
    storage: Arc<ScannerStorage>,
    metrics: Arc<BifrostMetrics>,
    cfg: BlockScannerConfig,
}

impl BlockScanner {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        storage: Arc<ScannerStorage>,
        metrics: Arc<BifrostMetrics>,
        cfg: BlockScannerConfig,
    ) -> Self {
        BlockScanner {
            adapter,
            storage,
            metrics,
            cfg,
        }
    }

    /// Main scan loop. `start_height` seeds the cursor when storage has
    /// none (resolved by the node from the ledger or the chain tip).
    pub async fn run(
        self,
        start_height: i64,
        scan_tx: mpsc::Sender<crate::chains::Block>,
        cancel: CancellationToken,
    ) {
        let chain = self.adapter.chain();
        let chain_label = chain.to_string();
        info!(chain = %chain, "starting block scanner");

        let mut previous = match self.storage.get_scan_pos(&chain) {
            Ok(Some(pos)) => pos,
            Ok(None) => start_height,
            Err(e) => {
                self.metrics
                    .scan_errors
                    .with_label_values(&[&chain_label, "storage"])
                    .inc();
                error!(chain = %chain, error = %e, "fail to read scan cursor, using start height");
                start_height
            }
        };
        self.metrics
            .scan_position
            .with_label_values(&[&chain_label])
            .set(previous);

        loop {
            if cancel.is_cancelled() {
                info!(chain = %chain, "block scanner cancelled");
                return;
            }
            let next = previous + 1;
            let timer = self
                .metrics
                .block_fetch_duration
                .with_label_values(&[&chain_label])
                .start_timer();
            let block = self.adapter.fetch_block(next).await;
            timer.observe_duration();

            let block = match block {
                Ok(block) => block,
                Err(ChainError::HeightUnavailable(_)) => {
                    // the chain simply has not produced this block yet
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.cfg.back_off()) => continue,
                    }
                }
                Err(e) => {
                    self.metrics
                        .scan_errors
                        .with_label_values(&[&chain_label, e.error_type()])
                        .inc();
                    error!(chain = %chain, height = next, error = %e, "fail to fetch block");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.cfg.retry_interval()) => continue,
                    }
                }
            };

            if let Err(e) = self
                .storage
                .set_block_status(&chain, next, BlockScanStatus::NotStarted)
            {
                error!(chain = %chain, height = next, error = %e, "fail to set block status, halting scanner");
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                result = scan_tx.send(block) => {
                    if result.is_err() {
                        info!(chain = %chain, "scan channel closed, stopping");
                        return;
                    }
                }
            }

            previous = next;
            self.metrics
                .blocks_scanned
                .with_label_values(&[&chain_label])
                .inc();
            self.metrics
                .scan_position
                .with_label_values(&[&chain_label])
                .set(previous);

            if let Err(e) = self.storage.set_scan_pos(&chain, previous) {
                // continuing would re-emit this block after a restart
                error!(chain = %chain, height = previous, error = %e, "fail to persist scan cursor, halting scanner");
                return;
            }
        }
    }

    /// Failed-block replay: re-fetches and re-emits blocks marked `Failed`
    /// on a fixed ticker.
    pub async fn run_retry(
        adapter: Arc<dyn ChainAdapter>,
        storage: Arc<ScannerStorage>,
        metrics: Arc<BifrostMetrics>,
        cfg: BlockScannerConfig,
        scan_tx: mpsc::Sender<crate::chains::Block>,
        cancel: CancellationToken,
    ) {
        let chain = adapter.chain();
        let chain_label = chain.to_string();
        let mut interval = tokio::time::interval(cfg.retry_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(chain = %chain, "starting failed-block retrier");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(chain = %chain, "failed-block retrier cancelled");
                    return;
                }
                _ = interval.tick() => {}
            }

            let heights = match storage.get_blocks_for_retry(&chain, true) {
                Ok(heights) => heights,
                Err(e) => {
                    error!(chain = %chain, error = %e, "fail to list blocks for retry");
                    continue;
                }
            };
            if heights.is_empty() {
                continue;
            }
            debug!(chain = %chain, blocks = heights.len(), "re-emitting failed blocks");

            for height in heights {
                let block = match adapter.fetch_block(height).await {
                    Ok(block) => block,
                    Err(e) => {
                        error!(chain = %chain, height, error = %e, "fail to re-fetch failed block");
                        continue;
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = scan_tx.send(block) => {
                        if result.is_err() {
                            return;
                        }
                        metrics.retry_blocks.with_label_values(&[&chain_label]).inc();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{Account, Block};
    use crate::tss::KeySign;
    use async_trait::async_trait;
    use bifrost_types::{Address, Chain, TxId, TxInItem, TxOutItem};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    /// Adapter with a controllable tip; fetches beyond it report
    /// height-unavailable.
    struct FakeAdapter {
        tip: AtomicI64,
        fail_at: Option<i64>,
    }

    #[async_trait]
    impl ChainAdapter for FakeAdapter {
        fn chain(&self) -> Chain {
            Chain::bnb()
        }
        async fn get_height(&self) -> crate::ChainResult<i64> {
            Ok(self.tip.load(Ordering::Relaxed))
        }
        async fn fetch_block(&self, height: i64) -> crate::ChainResult<Block> {
            if Some(height) == self.fail_at {
                return Err(ChainError::TransientRpc("boom".to_string()));
            }
            if height > self.tip.load(Ordering::Relaxed) {
                return Err(ChainError::HeightUnavailable(height));
            }
            Ok(Block {
                chain: Chain::bnb(),
                height,
                txs: vec![format!("tx-at-{height}")],
            })
        }
        async fn decode_tx(&self, _raw: &str, _height: i64) -> crate::ChainResult<Option<TxInItem>> {
            Ok(None)
        }
        async fn get_account(&self, _addr: &Address) -> crate::ChainResult<Account> {
            Ok(Account::default())
        }
        async fn sign_tx(
            &self,
            _toi: &TxOutItem,
            _height: i64,
            _signer: &dyn KeySign,
        ) -> crate::ChainResult<Vec<u8>> {
            Ok(vec![])
        }
        async fn broadcast_tx(&self, _toi: &TxOutItem, _signed: &[u8]) -> crate::ChainResult<TxId> {
            Ok(TxId::new("X"))
        }
    }

    fn fast_config() -> BlockScannerConfig {
        BlockScannerConfig {
            start_block_height: 0,
            block_scan_processors: 4,
            block_height_discover_back_off_ms: 5,
            block_retry_interval_secs: 1,
            http_request_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_blocks_emitted_in_strict_height_order() {
        let storage = Arc::new(ScannerStorage::memory().unwrap());
        let metrics = Arc::new(BifrostMetrics::new_for_testing());
        let adapter = Arc::new(FakeAdapter {
            tip: AtomicI64::new(5),
            fail_at: None,
        });
        let scanner = BlockScanner::new(adapter, storage.clone(), metrics, fast_config());

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scanner.run(2, tx, cancel.clone()));

        for expected in 3..=5 {
            let block = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(block.height, expected);
        }
        // the cursor persists right after emission; give the task a beat
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(storage.get_scan_pos(&Chain::bnb()).unwrap(), Some(5));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_resumes_from_persisted_cursor() {
        let storage = Arc::new(ScannerStorage::memory().unwrap());
        storage.set_scan_pos(&Chain::bnb(), 9).unwrap();
        let metrics = Arc::new(BifrostMetrics::new_for_testing());
        let adapter = Arc::new(FakeAdapter {
            tip: AtomicI64::new(10),
            fail_at: None,
        });
        // the configured start height loses to the persisted cursor
        let scanner = BlockScanner::new(adapter, storage, metrics, fast_config());

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scanner.run(0, tx, cancel.clone()));

        let block = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(block.height, 10);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_height_ahead_waits_silently() {
        let storage = Arc::new(ScannerStorage::memory().unwrap());
        let metrics = Arc::new(BifrostMetrics::new_for_testing());
        let adapter = Arc::new(FakeAdapter {
            tip: AtomicI64::new(3),
            fail_at: None,
        });
        let tip_handle = adapter.clone();
        let scanner = BlockScanner::new(adapter, storage, metrics.clone(), fast_config());

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scanner.run(3, tx, cancel.clone()));

        // nothing to emit while the chain sits at the tip
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
        // height-ahead retries are not error-counted
        assert_eq!(
            metrics
                .scan_errors
                .with_label_values(&["BNB", "height_unavailable"])
                .get(),
            0
        );

        // the chain advances and the scanner picks it up
        tip_handle.tip.store(4, Ordering::Relaxed);
        let block = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(block.height, 4);

        cancel.cancel();
        handle.await.unwrap();
    }
}
