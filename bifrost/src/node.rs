// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wires the daemon together: one scanner, retrier, observer and signer per
//! chain, one observation poster, one ledger scanner, one keygen worker.
//! Everything shuts down through a shared cancellation token; `stop` only
//! returns once every worker has exited, and is idempotent.

use crate::block_scanner::BlockScanner;
use crate::chains::{AdapterRegistry, BinanceAdapter, BitcoinAdapter, ChainAdapter, EthereumAdapter};
use crate::config::BifrostConfig;
use crate::ledger_scanner::LedgerScanner;
use crate::metrics::BifrostMetrics;
use crate::observer::{ObservationPoster, Observer};
use crate::pubkey_manager::PubKeyManager;
use crate::signer::Signer;
use crate::storage::ScannerStorage;
use crate::thorchain_client::{Keygen, ThorchainClient};
use crate::tss::{LocalSigner, TssSigner};
use anyhow::Context;
use bifrost_types::{Chain, PubKey, TxOut};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct BifrostNode {
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl BifrostNode {
    pub async fn start(
        config: BifrostConfig,
        registry: &prometheus::Registry,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let metrics = Arc::new(BifrostMetrics::new(registry));
        let storage =
            Arc::new(ScannerStorage::open(&config.db_path).context("fail to open scanner db")?);
        let ledger = Arc::new(ThorchainClient::new(
            &config.thorchain.rest_url,
            &config.thorchain.node_address,
            Duration::from_secs(10),
        )?);
        let pubkey_mgr = Arc::new(PubKeyManager::new(ledger.clone()));
        if let Err(e) = pubkey_mgr.fetch_pub_keys().await {
            warn!(error = %e, "fail to prime vault pubkey cache, will retry on schedule");
        }

        let tss = match &config.tss.keysign_url {
            Some(url) => Some(Arc::new(TssSigner::new(url, ledger.clone())?)),
            None => None,
        };
        let local = match &config.tss.local_secret_hex {
            Some(seed) => {
                let pub_key = derive_pub_key(seed)?;
                info!(%pub_key, "local signer ready");
                Some(Arc::new(LocalSigner::from_seed_hex(seed, pub_key)?))
            }
            None => None,
        };

        let mut adapters = AdapterRegistry::new();
        for chain_cfg in &config.chains {
            let adapter: Arc<dyn ChainAdapter> = match chain_cfg.chain.as_str() {
                "BNB" => Arc::new(BinanceAdapter::new(chain_cfg)?),
                "BTC" => Arc::new(BitcoinAdapter::new(
                    chain_cfg,
                    storage.clone(),
                    pubkey_mgr.clone(),
                )?),
                "ETH" => Arc::new(EthereumAdapter::new(chain_cfg)?),
                other => anyhow::bail!("unsupported chain {other}"),
            };
            adapters.register(adapter);
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        handles.push(tokio::spawn(pubkey_mgr.clone().run(cancel.clone())));

        let (txin_tx, txin_rx) = mpsc::channel(64);
        let poster = ObservationPoster::new(ledger.clone(), pubkey_mgr.clone(), metrics.clone());
        handles.push(tokio::spawn(poster.run(txin_rx, cancel.clone())));

        let mut txout_txs: HashMap<Chain, mpsc::Sender<TxOut>> = HashMap::new();
        for chain_cfg in &config.chains {
            let adapter = adapters.get(&chain_cfg.chain)?;
            let scanner_cfg = chain_cfg.scanner.clone();

            let start_height =
                resolve_start_height(&adapter, &ledger, scanner_cfg.start_block_height).await;
            info!(chain = %chain_cfg.chain, start_height, "chain worker starting");

            let (scan_tx, scan_rx) = mpsc::channel(scanner_cfg.block_scan_processors);

            let scanner = BlockScanner::new(
                adapter.clone(),
                storage.clone(),
                metrics.clone(),
                scanner_cfg.clone(),
            );
            handles.push(tokio::spawn(scanner.run(
                start_height,
                scan_tx.clone(),
                cancel.clone(),
            )));

            handles.push(tokio::spawn(BlockScanner::run_retry(
                adapter.clone(),
                storage.clone(),
                metrics.clone(),
                scanner_cfg,
                scan_tx,
                cancel.clone(),
            )));

            let observer = Observer::new(
                adapter.clone(),
                pubkey_mgr.clone(),
                storage.clone(),
                metrics.clone(),
            );
            handles.push(tokio::spawn(observer.run(
                scan_rx,
                txin_tx.clone(),
                cancel.clone(),
            )));

            let (txout_tx, txout_rx) = mpsc::channel(16);
            txout_txs.insert(chain_cfg.chain.clone(), txout_tx);
            let signer = Signer::new(
                adapter,
                storage.clone(),
                ledger.clone(),
                tss.clone(),
                local.clone(),
                metrics.clone(),
            );
            handles.push(tokio::spawn(signer.run(txout_rx, cancel.clone())));
        }

        let (keygen_tx, keygen_rx) = mpsc::channel(8);
        let ledger_scanner = LedgerScanner::new(ledger.clone(), pubkey_mgr.clone(), storage.clone());
        handles.push(tokio::spawn(ledger_scanner.run(
            txout_txs,
            keygen_tx,
            cancel.clone(),
        )));

        handles.push(tokio::spawn(run_keygen_worker(
            keygen_rx,
            tss.clone(),
            config.tss.keygen_url.clone(),
            local.as_ref().map(|l| l.pub_key().clone()),
            cancel.clone(),
        )));

        Ok(BifrostNode {
            cancel,
            handles: Mutex::new(handles),
            stopped: AtomicBool::new(false),
        })
    }

    /// Cancel every worker and wait for them to exit. Safe to call twice.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping bifrost node");
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "worker exited abnormally");
            }
        }
        info!("bifrost node stopped");
    }
}

fn derive_pub_key(seed_hex: &str) -> anyhow::Result<PubKey> {
    let bytes = hex::decode(seed_hex).context("node key seed is not hex")?;
    let secret = SecretKey::from_slice(&bytes).context("node key seed is not a valid key")?;
    let secp = Secp256k1::new();
    let public = PublicKey::from_secret_key(&secp, &secret);
    Ok(PubKey::new(&hex::encode(public.serialize())))
}

/// Cursor seed order: explicit config, then the ledger's last observed
/// height for the chain, then the chain tip.
async fn resolve_start_height(
    adapter: &Arc<dyn ChainAdapter>,
    ledger: &Arc<ThorchainClient>,
    configured: i64,
) -> i64 {
    if configured > 0 {
        return configured;
    }
    match ledger.get_last_observed_in_height(&adapter.chain()).await {
        Ok(height) if height > 0 => return height,
        Ok(_) => {}
        Err(e) => warn!(chain = %adapter.chain(), error = %e, "fail to ask ledger for start height"),
    }
    match adapter.get_height().await {
        Ok(height) => height,
        Err(e) => {
            warn!(chain = %adapter.chain(), error = %e, "fail to learn chain tip, starting at zero");
            0
        }
    }
}

/// Joins keygen ceremonies this node is a member of. The resulting vault
/// shows up on the ledger through observation consensus, so the worker only
/// has to run the ceremony.
async fn run_keygen_worker(
    mut keygen_rx: mpsc::Receiver<Keygen>,
    tss: Option<Arc<TssSigner>>,
    keygen_url: Option<String>,
    own_pub_key: Option<PubKey>,
    cancel: CancellationToken,
) {
    info!("starting keygen worker");
    loop {
        let keygen = tokio::select! {
            _ = cancel.cancelled() => {
                info!("keygen worker cancelled");
                return;
            }
            keygen = keygen_rx.recv() => match keygen {
                Some(keygen) => keygen,
                None => return,
            },
        };

        if let Some(own) = &own_pub_key {
            if !keygen.members.contains(own) {
                continue;
            }
        }
        let (Some(tss), Some(url)) = (&tss, &keygen_url) else {
            warn!(height = keygen.height, "keygen scheduled but no TSS keygen endpoint configured");
            continue;
        };
        match tss.keygen(url, &keygen.members).await {
            Ok(pub_key) => {
                info!(height = keygen.height, %pub_key, "keygen ceremony completed");
            }
            Err(e) => {
                error!(height = keygen.height, error = %e, "keygen ceremony failed");
            }
        }
    }
}
