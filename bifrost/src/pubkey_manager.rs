// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process-wide cache of vault keys and their per-chain addresses; the
//! observation filter's notion of "one of ours".

use crate::error::ChainResult;
use crate::thorchain_client::ThorchainClient;
use bifrost_types::{Address, Chain, PubKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    pub_key: PubKey,
    /// Lazily filled per chain; derivation is deterministic.
    addresses: HashMap<Chain, Address>,
}

pub struct PubKeyManager {
    ledger: Arc<ThorchainClient>,
    entries: RwLock<Vec<Entry>>,
}

impl PubKeyManager {
    pub fn new(ledger: Arc<ThorchainClient>) -> Self {
        PubKeyManager {
            ledger,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Re-fetch the vault key set from the ledger. Called on a timer and
    /// on-demand when an internal transfer targets an unknown address.
    pub async fn fetch_pub_keys(&self) -> ChainResult<()> {
        let keys = self.ledger.get_vaults_pub_keys().await?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        for pk in keys.asgard.into_iter().chain(keys.yggdrasil.into_iter()) {
            if !entries.iter().any(|e| e.pub_key == pk) {
                entries.push(Entry {
                    pub_key: pk,
                    addresses: HashMap::new(),
                });
            }
        }
        if entries.len() != before {
            info!(total = entries.len(), "vault pubkey cache refreshed");
        }
        Ok(())
    }

    pub async fn add_pub_key(&self, pk: PubKey) {
        let mut entries = self.entries.write().await;
        if !entries.iter().any(|e| e.pub_key == pk) {
            entries.push(Entry {
                pub_key: pk,
                addresses: HashMap::new(),
            });
        }
    }

    pub async fn pub_keys(&self) -> Vec<PubKey> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| e.pub_key.clone())
            .collect()
    }

    /// Whether `addr` is a vault address on `chain`; returns the owning
    /// vault key.
    pub async fn is_valid_pool_address(&self, addr: &Address, chain: &Chain) -> Option<PubKey> {
        {
            let entries = self.entries.read().await;
            for entry in entries.iter() {
                if let Some(known) = entry.addresses.get(chain) {
                    if known == addr {
                        return Some(entry.pub_key.clone());
                    }
                    continue;
                }
            }
        }
        // fill missing derivations under the write lock
        let mut entries = self.entries.write().await;
        for entry in entries.iter_mut() {
            let derived = entry
                .addresses
                .entry(chain.clone())
                .or_insert_with(|| entry.pub_key.chain_address(chain));
            if derived == addr {
                return Some(entry.pub_key.clone());
            }
        }
        None
    }

    /// Periodic refresh worker.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(REFRESH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("pubkey manager refresh cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.fetch_pub_keys().await {
                        warn!(error = %e, "fail to refresh vault pubkeys");
                    }
                }
            }
        }
    }
}
