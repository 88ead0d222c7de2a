// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The observation pipeline: funnels scanned blocks through the address and
//! memo filters into candidate observations, and posts them to the ledger.

use crate::chains::{Block, ChainAdapter};
use crate::error::{ChainError, ChainResult};
use crate::metrics::BifrostMetrics;
use crate::pubkey_manager::PubKeyManager;
use crate::storage::{BlockScanStatus, ScannerStorage};
use crate::thorchain_client::ThorchainClient;
use bifrost_types::{Chain, TxIn, TxInItem};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Vault-to-vault memo prefixes whose destination may be a vault created so
/// recently it is missing from the cache; they warrant one refresh.
const REFRESH_MEMO_PREFIXES: [&str; 3] = ["migrate", "yggdrasil+", "yggdrasil-"];

fn wants_cache_refresh(memo: &str) -> bool {
    let lower = memo.to_ascii_lowercase();
    REFRESH_MEMO_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Keep a tx iff one side is a known vault address, or its memo marks an
/// internal transfer. Internal transfers to an unknown destination trigger
/// one vault-cache refresh and a re-test: the destination may be a vault
/// created moments ago.
pub async fn extract_tx_in(
    adapter: &Arc<dyn ChainAdapter>,
    pubkey_mgr: &Arc<PubKeyManager>,
    metrics: &Arc<BifrostMetrics>,
    block: &Block,
) -> ChainResult<TxIn> {
    let chain = adapter.chain();
    let mut tx_in = TxIn::new(chain.clone(), block.height);
    if block.txs.is_empty() {
        return Ok(tx_in);
    }

    // chains that publish fee parameters refresh them per accepted block
    if let Err(e) = adapter.update_fees(block.height).await {
        warn!(chain = %chain, error = %e, "fail to update chain fees");
    }

    for raw in &block.txs {
        let item = match adapter.decode_tx(raw, block.height).await {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(ChainError::PermanentDecode(e)) => {
                metrics
                    .scan_errors
                    .with_label_values(&[chain.as_str(), "permanent_decode"])
                    .inc();
                debug!(chain = %chain, error = %e, "skipping undecodable tx");
                continue;
            }
            // transient errors fail the whole block so it can be retried
            Err(e) => return Err(e),
        };

        // a vault-to-vault move is reported twice, once per observed vault
        let mut matched = false;
        if let Some(pk) = pubkey_mgr.is_valid_pool_address(&item.sender, &chain).await {
            let mut outbound = item.clone();
            outbound.observed_pool_address = pk;
            tx_in.tx_array.push(outbound);
            matched = true;
        }
        match pubkey_mgr.is_valid_pool_address(&item.to, &chain).await {
            Some(pk) => {
                let mut inbound = item.clone();
                inbound.observed_pool_address = pk;
                tx_in.tx_array.push(inbound);
                matched = true;
            }
            None if wants_cache_refresh(&item.memo) => {
                // an internal transfer to an address we do not know yet
                if let Err(e) = pubkey_mgr.fetch_pub_keys().await {
                    warn!(error = %e, "fail to refresh vault pubkeys");
                }
                if let Some(pk) = pubkey_mgr.is_valid_pool_address(&item.to, &chain).await {
                    let mut inbound = item.clone();
                    inbound.observed_pool_address = pk;
                    tx_in.tx_array.push(inbound);
                    matched = true;
                }
            }
            None => {}
        }
        if matched {
            metrics
                .txs_observed
                .with_label_values(&[chain.as_str()])
                .inc();
        }
    }
    Ok(tx_in)
}

/// Drains one chain's scan channel, filters each block and forwards the
/// surviving observations to the poster.
pub struct Observer {
    adapter: Arc<dyn ChainAdapter>,
    pubkey_mgr: Arc<PubKeyManager>,
    storage: Arc<ScannerStorage>,
    metrics: Arc<BifrostMetrics>,
}

impl Observer {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        pubkey_mgr: Arc<PubKeyManager>,
        storage: Arc<ScannerStorage>,
        metrics: Arc<BifrostMetrics>,
    ) -> Self {
        Observer {
            adapter,
            pubkey_mgr,
            storage,
            metrics,
        }
    }

    pub async fn run(
        self,
        mut scan_rx: mpsc::Receiver<Block>,
        txin_tx: mpsc::Sender<TxIn>,
        cancel: CancellationToken,
    ) {
        let chain = self.adapter.chain();
        info!(chain = %chain, "starting observer");
        loop {
            let block = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(chain = %chain, "observer cancelled");
                    return;
                }
                block = scan_rx.recv() => match block {
                    Some(block) => block,
                    None => {
                        info!(chain = %chain, "scan channel closed");
                        return;
                    }
                },
            };

            let height = block.height;
            if let Err(e) = self
                .storage
                .set_block_status(&chain, height, BlockScanStatus::Processing)
            {
                error!(chain = %chain, height, error = %e, "fail to mark block processing");
            }

            match extract_tx_in(&self.adapter, &self.pubkey_mgr, &self.metrics, &block).await {
                Ok(tx_in) => {
                    if let Err(e) = self.storage.remove_block_status(&chain, height) {
                        error!(chain = %chain, height, error = %e, "fail to clear block status");
                    }
                    if tx_in.is_empty() {
                        debug!(chain = %chain, height, "no txs of interest in block");
                        continue;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = txin_tx.send(tx_in) => {
                            if result.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    // the retrier will re-emit this block
                    error!(chain = %chain, height, error = %e, "fail to process block");
                    if let Err(e) = self
                        .storage
                        .set_block_status(&chain, height, BlockScanStatus::Failed)
                    {
                        error!(chain = %chain, height, error = %e, "fail to mark block failed");
                    }
                }
            }
        }
    }
}

/// Drains the observation channel and posts batches to the ledger, sorting
/// each batch into the inbound or outbound endpoint by which side of the tx
/// the vault was on.
pub struct ObservationPoster {
    ledger: Arc<ThorchainClient>,
    pubkey_mgr: Arc<PubKeyManager>,
    metrics: Arc<BifrostMetrics>,
}

impl ObservationPoster {
    pub fn new(
        ledger: Arc<ThorchainClient>,
        pubkey_mgr: Arc<PubKeyManager>,
        metrics: Arc<BifrostMetrics>,
    ) -> Self {
        ObservationPoster {
            ledger,
            pubkey_mgr,
            metrics,
        }
    }

    async fn split(&self, tx_in: &TxIn) -> (TxIn, TxIn) {
        let mut inbound = TxIn::new(tx_in.chain.clone(), tx_in.block_height);
        let mut outbound = TxIn::new(tx_in.chain.clone(), tx_in.block_height);
        for item in &tx_in.tx_array {
            if self.is_vault_sender(item, &tx_in.chain).await {
                outbound.tx_array.push(item.clone());
            } else {
                inbound.tx_array.push(item.clone());
            }
        }
        (inbound, outbound)
    }

    async fn is_vault_sender(&self, item: &TxInItem, chain: &Chain) -> bool {
        self.pubkey_mgr
            .is_valid_pool_address(&item.sender, chain)
            .await
            .is_some()
    }

    pub async fn run(self, mut txin_rx: mpsc::Receiver<TxIn>, cancel: CancellationToken) {
        info!("starting observation poster");
        let max_elapsed = Duration::from_secs(60);
        loop {
            let tx_in = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("observation poster cancelled");
                    return;
                }
                tx_in = txin_rx.recv() => match tx_in {
                    Some(tx_in) => tx_in,
                    None => return,
                },
            };

            let (inbound, outbound) = self.split(&tx_in).await;
            if !inbound.is_empty() {
                match crate::retry_with_max_elapsed_time!(
                    self.ledger.post_observed_tx_in(&inbound),
                    max_elapsed
                ) {
                    Ok(Ok(tx_id)) => {
                        self.metrics.observations_posted.inc();
                        debug!(%tx_id, txs = inbound.tx_array.len(), "posted inbound observations");
                    }
                    _ => error!(
                        chain = %inbound.chain,
                        height = inbound.block_height,
                        "fail to post inbound observations after retries"
                    ),
                }
            }
            if !outbound.is_empty() {
                match crate::retry_with_max_elapsed_time!(
                    self.ledger.post_observed_tx_out(&outbound),
                    max_elapsed
                ) {
                    Ok(Ok(tx_id)) => {
                        self.metrics.observations_posted.inc();
                        debug!(%tx_id, txs = outbound.tx_array.len(), "posted outbound observations");
                    }
                    _ => error!(
                        chain = %outbound.chain,
                        height = outbound.block_height,
                        "fail to post outbound observations after retries"
                    ),
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
    use bifrost_types::{Address, Asset, Coin, Coins, PubKey, TxId, TxOutItem};

    /// Adapter whose "raw txs" are JSON-encoded TxInItems.
    struct PassthroughAdapter;

    #[async_trait]
    impl ChainAdapter for PassthroughAdapter {
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
        async fn decode_tx(&self, raw: &str, _height: i64) -> ChainResult<Option<TxInItem>> {
            serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| ChainError::PermanentDecode(e.to_string()))
        }
        async fn get_account(&self, _addr: &Address) -> ChainResult<Account> {
            Ok(Account::default())
        }
        async fn sign_tx(
            &self,
            _toi: &TxOutItem,
            _height: i64,
            _signer: &dyn KeySign,
        ) -> ChainResult<Vec<u8>> {
            Ok(vec![])
        }
        async fn broadcast_tx(&self, _toi: &TxOutItem, _signed: &[u8]) -> ChainResult<TxId> {
            Ok(TxId::new("X"))
        }
    }

    fn item(sender: &str, to: &str, memo: &str) -> String {
        serde_json::to_string(&TxInItem {
            tx: TxId::new("T1"),
            sender: Address::new(sender),
            to: Address::new(to),
            coins: Coins::one(Coin::new(Asset::bnb(), 100)),
            gas: Coins::default(),
            memo: memo.to_string(),
            observed_pool_address: PubKey::default(),
        })
        .unwrap()
    }

    async fn fixture() -> (Arc<dyn ChainAdapter>, Arc<PubKeyManager>, Arc<BifrostMetrics>, Address) {
        let adapter: Arc<dyn ChainAdapter> = Arc::new(PassthroughAdapter);
        let client = Arc::new(
            ThorchainClient::new("http://localhost:1317", "thor1node", Duration::from_secs(1))
                .unwrap(),
        );
        let pubkey_mgr = Arc::new(PubKeyManager::new(client));
        let vault_pk = PubKey::new("asgard-pk");
        pubkey_mgr.add_pub_key(vault_pk.clone()).await;
        let vault_addr = vault_pk.chain_address(&Chain::bnb());
        let metrics = Arc::new(BifrostMetrics::new_for_testing());
        (adapter, pubkey_mgr, metrics, vault_addr)
    }

    #[tokio::test]
    async fn test_keeps_tx_to_vault_address() {
        let (adapter, pubkey_mgr, metrics, vault_addr) = fixture().await;
        let block = Block {
            chain: Chain::bnb(),
            height: 10,
            txs: vec![
                item("tbnb1user", vault_addr.as_str(), "swap:BNB.RUNE-A1F:tbnb1dest123"),
                item("tbnb1user", "tbnb1merchant", "totally unrelated payment"),
            ],
        };
        let tx_in = extract_tx_in(&adapter, &pubkey_mgr, &metrics, &block)
            .await
            .unwrap();
        assert_eq!(tx_in.tx_array.len(), 1);
        assert_eq!(tx_in.tx_array[0].observed_pool_address, PubKey::new("asgard-pk"));
        assert_eq!(tx_in.block_height, 10);
    }

    #[tokio::test]
    async fn test_keeps_tx_from_vault_address() {
        let (adapter, pubkey_mgr, metrics, vault_addr) = fixture().await;
        let block = Block {
            chain: Chain::bnb(),
            height: 10,
            txs: vec![item(vault_addr.as_str(), "tbnb1user", "outbound:IN1")],
        };
        let tx_in = extract_tx_in(&adapter, &pubkey_mgr, &metrics, &block)
            .await
            .unwrap();
        assert_eq!(tx_in.tx_array.len(), 1);
    }

    #[tokio::test]
    async fn test_vault_to_vault_reported_twice() {
        let (adapter, pubkey_mgr, metrics, vault_addr) = fixture().await;
        let other = PubKey::new("ygg-pk");
        pubkey_mgr.add_pub_key(other.clone()).await;
        let other_addr = other.chain_address(&Chain::bnb());

        let block = Block {
            chain: Chain::bnb(),
            height: 10,
            txs: vec![item(vault_addr.as_str(), other_addr.as_str(), "yggdrasil+:10")],
        };
        let tx_in = extract_tx_in(&adapter, &pubkey_mgr, &metrics, &block)
            .await
            .unwrap();
        assert_eq!(tx_in.tx_array.len(), 2);
        assert_eq!(tx_in.tx_array[0].observed_pool_address, PubKey::new("asgard-pk"));
        assert_eq!(tx_in.tx_array[1].observed_pool_address, other);
    }

    #[tokio::test]
    async fn test_malformed_tx_skipped_not_fatal() {
        let (adapter, pubkey_mgr, metrics, vault_addr) = fixture().await;
        let block = Block {
            chain: Chain::bnb(),
            height: 10,
            txs: vec![
                "garbage that will never decode".to_string(),
                item("tbnb1user", vault_addr.as_str(), "gas"),
            ],
        };
        let tx_in = extract_tx_in(&adapter, &pubkey_mgr, &metrics, &block)
            .await
            .unwrap();
        // the bad tx is skipped, the good one survives
        assert_eq!(tx_in.tx_array.len(), 1);
        assert_eq!(
            metrics
                .scan_errors
                .with_label_values(&["BNB", "permanent_decode"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_unrelated_tx_filtered() {
        let (adapter, pubkey_mgr, metrics, _) = fixture().await;
        let block = Block {
            chain: Chain::bnb(),
            height: 10,
            txs: vec![item("tbnb1alice", "tbnb1bob", "swap:BNB.BNB:tbnb1bob99")],
        };
        let tx_in = extract_tx_in(&adapter, &pubkey_mgr, &metrics, &block)
            .await
            .unwrap();
        assert!(tx_in.is_empty());
    }
}
