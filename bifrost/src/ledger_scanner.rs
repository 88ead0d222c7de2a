// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tails the ledger itself: every committed ledger block is queried for
//! keysign instructions (outbounds to dispatch) and keygen instructions
//! (ceremonies to join), per tracked vault key.

use crate::error::ChainResult;
use crate::pubkey_manager::PubKeyManager;
use crate::storage::ScannerStorage;
use crate::thorchain_client::{Keygen, ThorchainClient};
use bifrost_types::{Chain, TxOut};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct LedgerScanner {
    ledger: Arc<ThorchainClient>,
    pubkey_mgr: Arc<PubKeyManager>,
    storage: Arc<ScannerStorage>,
    poll_interval: Duration,
}

impl LedgerScanner {
    pub fn new(
        ledger: Arc<ThorchainClient>,
        pubkey_mgr: Arc<PubKeyManager>,
        storage: Arc<ScannerStorage>,
    ) -> Self {
        LedgerScanner {
            ledger,
            pubkey_mgr,
            storage,
            poll_interval: Duration::from_secs(1),
        }
    }

    async fn process_height(
        &self,
        height: i64,
        txout_txs: &HashMap<Chain, mpsc::Sender<TxOut>>,
        keygen_tx: &mpsc::Sender<Keygen>,
    ) -> ChainResult<()> {
        for pk in self.pubkey_mgr.pub_keys().await {
            let chains = self.ledger.get_keysign(height, &pk).await?;
            for (chain, out) in chains {
                if out.tx_array.is_empty() {
                    continue;
                }
                match txout_txs.get(&chain) {
                    Some(sender) => {
                        debug!(%chain, height, items = out.tx_array.len(), "dispatching outbounds");
                        if sender.send(out).await.is_err() {
                            return Err(crate::ChainError::Generic(
                                "signer channel closed".to_string(),
                            ));
                        }
                    }
                    None => {
                        error!(%chain, height, "keysign for a chain with no signer");
                    }
                }
            }

            // keygen failures are tolerable; the ceremony re-schedules
            match self.ledger.get_keygen(height, &pk).await {
                Ok(keygens) => {
                    for keygen in keygens {
                        if keygen.members.is_empty() {
                            continue;
                        }
                        let _ = keygen_tx.send(keygen).await;
                    }
                }
                Err(e) => {
                    error!(height, error = %e, "fail to fetch keygen");
                }
            }
        }
        Ok(())
    }

    pub async fn run(
        self,
        txout_txs: HashMap<Chain, mpsc::Sender<TxOut>>,
        keygen_tx: mpsc::Sender<Keygen>,
        cancel: CancellationToken,
    ) {
        let chain = Chain::thor();
        info!("starting ledger block scanner");
        let mut cursor = match self.storage.get_scan_pos(&chain) {
            Ok(Some(pos)) => pos,
            Ok(None) => match self.ledger.get_height().await {
                Ok(height) => height,
                Err(e) => {
                    error!(error = %e, "fail to learn ledger height, starting from zero");
                    0
                }
            },
            Err(e) => {
                error!(error = %e, "fail to read ledger cursor, starting from zero");
                0
            }
        };

        loop {
            if cancel.is_cancelled() {
                info!("ledger scanner cancelled");
                return;
            }
            let tip = match self.ledger.get_height().await {
                Ok(tip) => tip,
                Err(e) => {
                    debug!(error = %e, "fail to fetch ledger height");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.poll_interval) => continue,
                    }
                }
            };
            if tip <= cursor {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                }
            }

            for height in (cursor + 1)..=tip {
                if cancel.is_cancelled() {
                    return;
                }
                if let Err(e) = self.process_height(height, &txout_txs, &keygen_tx).await {
                    error!(height, error = %e, "fail to process ledger block, will retry");
                    break;
                }
                cursor = height;
                if let Err(e) = self.storage.set_scan_pos(&chain, cursor) {
                    error!(height, error = %e, "fail to persist ledger cursor, halting");
                    return;
                }
            }
        }
    }
}
