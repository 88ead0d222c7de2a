// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-chain outbound signer: drains the block's outbound items, signs each
//! exactly once (persisted dedup), broadcasts, and reports keysign blame to
//! the ledger. A failed item is left unsigned for the ledger's signing
//! slasher to re-schedule; it is never broadcast twice.

use crate::chains::ChainAdapter;
use crate::error::{ChainError, ChainResult};
use crate::metrics::BifrostMetrics;
use crate::storage::ScannerStorage;
use crate::thorchain_client::ThorchainClient;
use crate::tss::{KeySign, LocalSigner, TssSigner};
use bifrost_types::{Coin, Memo, TxId, TxOut, TxOutItem};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Signer {
    adapter: Arc<dyn ChainAdapter>,
    storage: Arc<ScannerStorage>,
    ledger: Arc<ThorchainClient>,
    tss: Option<Arc<TssSigner>>,
    local: Option<Arc<LocalSigner>>,
    metrics: Arc<BifrostMetrics>,
}

impl Signer {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        storage: Arc<ScannerStorage>,
        ledger: Arc<ThorchainClient>,
        tss: Option<Arc<TssSigner>>,
        local: Option<Arc<LocalSigner>>,
        metrics: Arc<BifrostMetrics>,
    ) -> Self {
        Signer {
            adapter,
            storage,
            ledger,
            tss,
            local,
            metrics,
        }
    }

    /// Local shortcut for solely-owned vaults, TSS otherwise.
    fn signer_for(&self, toi: &TxOutItem) -> ChainResult<Arc<dyn KeySign>> {
        if let Some(local) = &self.local {
            if local.can_sign_for(&toi.vault_pub_key) {
                return Ok(local.clone() as Arc<dyn KeySign>);
            }
        }
        match &self.tss {
            Some(tss) => Ok(tss.clone() as Arc<dyn KeySign>),
            None => Err(ChainError::Generic(
                "no TSS endpoint configured and vault is not solely owned".to_string(),
            )),
        }
    }

    /// A yggdrasil-return is dispatched with an empty coin; the concrete
    /// amount is the vault's whole on-chain balance, read at sign time.
    async fn fill_yggdrasil_return(&self, toi: &TxOutItem) -> ChainResult<TxOutItem> {
        let vault_addr = self.adapter.address_of(&toi.vault_pub_key);
        let account = self.adapter.get_account(&vault_addr).await?;
        let gas_asset = self.adapter.get_gas_asset();
        let amount = account.coins.amount_of(&gas_asset);
        if amount == 0 {
            return Err(ChainError::Generic(format!(
                "yggdrasil return from {vault_addr} has nothing to return"
            )));
        }
        let mut filled = toi.clone();
        filled.coin = Coin::new(gas_asset, amount);
        Ok(filled)
    }

    async fn sign_and_broadcast(&self, toi: &TxOutItem, height: i64) -> ChainResult<TxId> {
        let is_ygg_return = toi
            .memo
            .parse::<Memo>()
            .map(|m| m.is_yggdrasil_return())
            .unwrap_or(false);
        let toi = if toi.coin.is_empty() && is_ygg_return {
            self.fill_yggdrasil_return(toi).await?
        } else {
            toi.clone()
        };

        let signer = self.signer_for(&toi)?;
        let chain_label = self.adapter.chain().to_string();
        let timer = self
            .metrics
            .sign_duration
            .with_label_values(&[&chain_label])
            .start_timer();
        let signed = self.adapter.sign_tx(&toi, height, signer.as_ref()).await;
        timer.observe_duration();
        let signed = signed?;
        self.metrics
            .txout_signed
            .with_label_values(&[&chain_label])
            .inc();

        match self.adapter.broadcast_tx(&toi, &signed).await {
            Ok(tx_id) => {
                self.metrics
                    .broadcasts
                    .with_label_values(&[&chain_label, "ok"])
                    .inc();
                Ok(tx_id)
            }
            Err(ChainError::AlreadyOnChain) => {
                self.metrics
                    .broadcasts
                    .with_label_values(&[&chain_label, "already_on_chain"])
                    .inc();
                Ok(TxId::blank())
            }
            Err(e) => {
                self.metrics
                    .broadcasts
                    .with_label_values(&[&chain_label, "error"])
                    .inc();
                Err(e)
            }
        }
    }

    async fn handle_item(&self, toi: &TxOutItem, height: i64) {
        let key = toi.dedup_key(height);
        match self.storage.has_signed(&key) {
            Ok(true) => {
                // already dispatched in an earlier pass over this block
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "fail to read signed-item store, skipping item");
                return;
            }
        }

        match self.sign_and_broadcast(toi, height).await {
            Ok(tx_id) => {
                info!(chain = %toi.chain, %tx_id, in_hash = %toi.in_hash, "outbound dispatched");
                if let Err(e) = self.storage.set_signed(&key) {
                    error!(error = %e, "fail to record signed item");
                }
            }
            Err(ChainError::KeysignBlame(blame, reason)) => {
                self.metrics.keysign_failures.inc();
                warn!(?blame, reason = %reason, "keysign failed with blame, reporting");
                let result = self
                    .ledger
                    .post_keysign_failure(
                        &blame,
                        height,
                        &toi.memo,
                        &bifrost_types::Coins::one(toi.coin.clone()),
                        &toi.vault_pub_key,
                    )
                    .await;
                if let Err(e) = result {
                    error!(error = %e, "fail to post keysign failure");
                }
                // the item stays unsigned; the ledger re-schedules it
            }
            Err(e) => {
                error!(chain = %toi.chain, in_hash = %toi.in_hash, error = %e, "fail to dispatch outbound");
            }
        }
    }

    pub async fn run(self, mut txout_rx: mpsc::Receiver<TxOut>, cancel: CancellationToken) {
        let chain = self.adapter.chain();
        info!(chain = %chain, "starting outbound signer");
        loop {
            let out = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(chain = %chain, "outbound signer cancelled");
                    return;
                }
                out = txout_rx.recv() => match out {
                    Some(out) => out,
                    None => return,
                },
            };
            for toi in &out.tx_array {
                if cancel.is_cancelled() {
                    return;
                }
                self.handle_item(toi, out.height).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{Account, Block};
    use async_trait::async_trait;
    use bifrost_types::{Address, Asset, Chain, Coins, PubKey, TxInItem};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingAdapter {
        broadcasts: AtomicUsize,
        ygg_balance: u64,
    }

    #[async_trait]
    impl ChainAdapter for CountingAdapter {
        fn chain(&self) -> Chain {
            Chain::bnb()
        }
        async fn get_height(&self) -> ChainResult<i64> {
            Ok(1)
        }
        async fn fetch_block(&self, height: i64) -> ChainResult<Block> {
            Ok(Block {
                chain: Chain::bnb(),
                height,
                txs: vec![],
            })
        }
        async fn decode_tx(&self, _raw: &str, _height: i64) -> ChainResult<Option<TxInItem>> {
            Ok(None)
        }
        async fn get_account(&self, _addr: &Address) -> ChainResult<Account> {
            Ok(Account {
                sequence: 0,
                account_number: 0,
                coins: Coins::one(Coin::new(Asset::bnb(), self.ygg_balance)),
            })
        }
        async fn sign_tx(
            &self,
            toi: &TxOutItem,
            _height: i64,
            signer: &dyn KeySign,
        ) -> ChainResult<Vec<u8>> {
            signer
                .sign(toi.memo.as_bytes(), &toi.vault_pub_key)
                .await
                .map_err(|e| e.into_chain_error())
        }
        async fn broadcast_tx(&self, _toi: &TxOutItem, _signed: &[u8]) -> ChainResult<TxId> {
            self.broadcasts.fetch_add(1, Ordering::Relaxed);
            Ok(TxId::new("BCAST"))
        }
    }

    const SEED: &str = "59d2c5dbd5c5e6b3b5c6d5a6e8c5b5a6d5c6b5a6e8c5b5a6d5c6b5a6e8c5b5a6";

    fn signer_with(adapter: Arc<CountingAdapter>) -> Signer {
        let storage = Arc::new(ScannerStorage::memory().unwrap());
        let ledger = Arc::new(
            ThorchainClient::new("http://localhost:1317", "thor1node", Duration::from_secs(1))
                .unwrap(),
        );
        let local = LocalSigner::from_seed_hex(SEED, PubKey::new("ygg-pk")).unwrap();
        Signer::new(
            adapter,
            storage,
            ledger,
            None,
            Some(Arc::new(local)),
            Arc::new(BifrostMetrics::new_for_testing()),
        )
    }

    fn item(memo: &str, amount: u64) -> TxOutItem {
        let mut toi = TxOutItem::new(
            Chain::bnb(),
            Address::new("tbnb1dest"),
            Coin::new(Asset::bnb(), amount),
            TxId::new("IN1"),
        );
        toi.vault_pub_key = PubKey::new("ygg-pk");
        toi.memo = memo.to_string();
        toi
    }

    #[tokio::test]
    async fn test_item_signed_and_broadcast_once() {
        let adapter = Arc::new(CountingAdapter {
            broadcasts: AtomicUsize::new(0),
            ygg_balance: 0,
        });
        let signer = signer_with(adapter.clone());

        let toi = item("outbound:IN1", 100);
        signer.handle_item(&toi, 12).await;
        // the same block replayed does not double-broadcast
        signer.handle_item(&toi, 12).await;
        assert_eq!(adapter.broadcasts.load(Ordering::Relaxed), 1);

        // the same intent in a later block is a fresh dispatch
        signer.handle_item(&toi, 13).await;
        assert_eq!(adapter.broadcasts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_yggdrasil_return_filled_at_sign_time() {
        let adapter = Arc::new(CountingAdapter {
            broadcasts: AtomicUsize::new(0),
            ygg_balance: 123_456,
        });
        let signer = signer_with(adapter.clone());

        let toi = item("yggdrasil-:40", 0);
        let filled = signer.fill_yggdrasil_return(&toi).await.unwrap();
        assert_eq!(filled.coin.amount, 123_456);
        assert_eq!(filled.coin.asset, Asset::bnb());

        signer.handle_item(&toi, 12).await;
        assert_eq!(adapter.broadcasts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_foreign_vault_without_tss_fails_without_broadcast() {
        let adapter = Arc::new(CountingAdapter {
            broadcasts: AtomicUsize::new(0),
            ygg_balance: 0,
        });
        let signer = signer_with(adapter.clone());

        let mut toi = item("outbound:IN1", 100);
        toi.vault_pub_key = PubKey::new("someone-elses-asgard");
        signer.handle_item(&toi, 12).await;
        assert_eq!(adapter.broadcasts.load(Ordering::Relaxed), 0);
        // and it is not marked signed, so a retry can still happen
        assert!(!signer.storage.has_signed(&toi.dedup_key(12)).unwrap());
    }
}
