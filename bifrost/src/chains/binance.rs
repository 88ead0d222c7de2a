// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Binance chain adapter: account/sequence model, fixed transfer fees
//! published on-chain, raw txs carried base64-encoded in the block body.

use super::{Account, Block, ChainAdapter};
use crate::config::ChainConfig;
use crate::error::{ChainError, ChainResult};
use crate::tss::KeySign;
use async_trait::async_trait;
use base64::Engine;
use bifrost_types::{Address, Asset, Chain, Coin, Coins, PubKey, TxId, TxInItem, TxOutItem};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

const HEIGHT_AHEAD_MARKER: &str = "Height must be less than or equal to the current blockchain height";
const DEFAULT_SINGLE_FEE: u64 = 37_500;
const DEFAULT_MULTI_FEE: u64 = 30_000;

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    #[serde(default)]
    error: Option<RpcError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: Option<BlockBody>,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    header: BlockHeader,
    data: BlockData,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: String,
}

#[derive(Debug, Deserialize)]
struct BlockData {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct AbciQueryResult {
    response: AbciResponse,
}

#[derive(Debug, Deserialize)]
struct AbciResponse {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct FeeParams {
    #[serde(default)]
    fixed_fee_params: Option<FixedFeeParams>,
    #[serde(default)]
    multi_transfer_fee: u64,
}

#[derive(Debug, Deserialize)]
struct FixedFeeParams {
    fee: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCoin {
    denom: String,
    amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireIo {
    address: String,
    coins: Vec<WireCoin>,
}

/// The decoded transfer payload carried base64-encoded in the block.
#[derive(Debug, Serialize, Deserialize)]
struct SendTx {
    #[serde(default)]
    memo: String,
    inputs: Vec<WireIo>,
    outputs: Vec<WireIo>,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    #[serde(default)]
    sequence: u64,
    #[serde(default)]
    account_number: u64,
    #[serde(default)]
    coins: Vec<WireCoin>,
}

#[derive(Debug, Serialize)]
struct SignDoc<'a> {
    account_number: u64,
    sequence: u64,
    from: String,
    to: &'a str,
    coins: Vec<WireCoin>,
    memo: &'a str,
}

#[derive(Debug, Deserialize)]
struct BroadcastResult {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    log: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct SeqCache {
    chain_height: i64,
    sequence: u64,
}

pub struct BinanceAdapter {
    rpc_host: String,
    http: reqwest::Client,
    single_fee: AtomicU64,
    multi_fee: AtomicU64,
    /// Sequence is only refreshed when the chain height moves past the
    /// cached height; within one height it increments locally.
    seq_cache: Mutex<SeqCache>,
}

impl BinanceAdapter {
    pub fn new(cfg: &ChainConfig) -> ChainResult<Self> {
        let rpc_host = normalise_host(&cfg.rpc_host);
        let http = reqwest::Client::builder()
            .timeout(cfg.scanner.http_timeout())
            .build()
            .map_err(|e| ChainError::Generic(format!("fail to build http client: {e}")))?;
        Ok(BinanceAdapter {
            rpc_host,
            http,
            single_fee: AtomicU64::new(DEFAULT_SINGLE_FEE),
            multi_fee: AtomicU64::new(DEFAULT_MULTI_FEE),
            seq_cache: Mutex::new(SeqCache::default()),
        })
    }

    pub fn single_fee(&self) -> u64 {
        self.single_fee.load(Ordering::Relaxed)
    }

    pub fn multi_fee(&self) -> u64 {
        self.multi_fee.load(Ordering::Relaxed)
    }

    async fn get_envelope<T: for<'de> Deserialize<'de>>(&self, url: &str) -> ChainResult<T> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ChainError::TransientRpc(format!(
                "unexpected status {} from {url}",
                response.status()
            )));
        }
        let envelope: RpcEnvelope<T> = response.json().await.map_err(|e| {
            ChainError::TransientRpc(format!("undecodable response from {url}: {e}"))
        })?;
        if let Some(err) = envelope.error {
            if err.code != 0 || !err.message.is_empty() {
                let text = format!("{} ({}): {}", err.message, err.code, err.data);
                if text.contains(HEIGHT_AHEAD_MARKER) {
                    return Err(ChainError::HeightUnavailable(0));
                }
                return Err(ChainError::TransientRpc(text));
            }
        }
        envelope
            .result
            .ok_or_else(|| ChainError::TransientRpc(format!("empty result from {url}")))
    }

    async fn get_block(&self, height: Option<i64>) -> ChainResult<(i64, Vec<String>)> {
        let url = match height {
            Some(h) => format!("{}/block?height={h}", self.rpc_host),
            None => format!("{}/block", self.rpc_host),
        };
        let result: BlockResult = self.get_envelope(&url).await?;
        // binance can know of a block before it has its data; such blocks
        // never materialise and are skipped as empty
        let block = match result.block {
            Some(block) => block,
            None => return Ok((height.unwrap_or(0), Vec::new())),
        };
        let parsed: i64 = block
            .header
            .height
            .parse()
            .map_err(|e| ChainError::TransientRpc(format!("bad block height: {e}")))?;
        Ok((parsed, block.data.txs.unwrap_or_default()))
    }

    fn coins_from_wire(coins: &[WireCoin]) -> ChainResult<Coins> {
        let mut out = Vec::with_capacity(coins.len());
        for coin in coins {
            let asset = Asset::new(Chain::bnb(), &coin.denom).map_err(|e| {
                ChainError::PermanentDecode(format!("bad denom {}: {e}", coin.denom))
            })?;
            out.push(Coin::new(asset, coin.amount));
        }
        Ok(Coins::new(out))
    }

    fn gas_for(&self, outputs: usize) -> Coins {
        let fee = if outputs <= 1 {
            self.single_fee()
        } else {
            self.multi_fee().saturating_mul(outputs as u64)
        };
        Coins::one(Coin::new(Asset::bnb(), fee))
    }

    /// Sequence for the next signed tx, refreshed only when the chain
    /// height advances past the cached one.
    async fn next_sequence(&self, vault_addr: &Address) -> ChainResult<(u64, u64)> {
        let chain_height = self.get_height().await?;
        {
            let mut cache = self.seq_cache.lock().expect("seq cache poisoned");
            if chain_height <= cache.chain_height {
                let seq = cache.sequence;
                cache.sequence += 1;
                // account number is stable; fetched lazily below when unknown
                return Ok((seq, 0));
            }
        }
        let account = self.get_account(vault_addr).await?;
        let mut cache = self.seq_cache.lock().expect("seq cache poisoned");
        cache.chain_height = chain_height;
        cache.sequence = account.sequence + 1;
        Ok((account.sequence, account.account_number))
    }
}

fn normalise_host(host: &str) -> String {
    if host.starts_with("http") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[async_trait]
impl ChainAdapter for BinanceAdapter {
    fn chain(&self) -> Chain {
        Chain::bnb()
    }

    async fn get_height(&self) -> ChainResult<i64> {
        let (height, _) = self.get_block(None).await?;
        Ok(height)
    }

    async fn fetch_block(&self, height: i64) -> ChainResult<Block> {
        let (_, txs) = self.get_block(Some(height)).await.map_err(|e| match e {
            ChainError::HeightUnavailable(_) => ChainError::HeightUnavailable(height),
            other => other,
        })?;
        Ok(Block {
            chain: self.chain(),
            height,
            txs,
        })
    }

    async fn decode_tx(&self, raw: &str, _height: i64) -> ChainResult<Option<TxInItem>> {
        if raw.is_empty() {
            return Err(ChainError::PermanentDecode("tx is empty".to_string()));
        }
        let buf = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| ChainError::PermanentDecode(format!("fail to decode tx: {e}")))?;
        // raw tx base64 decoded then hashed is the canonical tx id
        let hash = format!("{:X}", Sha256::digest(&buf));

        let tx: SendTx = match serde_json::from_slice(&buf) {
            Ok(tx) => tx,
            Err(e) => {
                return Err(ChainError::PermanentDecode(format!(
                    "not a transfer payload: {e}"
                )))
            }
        };
        let sender = match tx.inputs.first() {
            Some(input) => input,
            None => return Ok(None),
        };
        let receiver = match tx.outputs.first() {
            Some(output) => output,
            None => return Ok(None),
        };
        let mut coins = Coins::default();
        for output in &tx.outputs {
            for coin in Self::coins_from_wire(&output.coins)?.into_iter() {
                coins.0.push(coin);
            }
        }

        Ok(Some(TxInItem {
            tx: TxId::new(&hash),
            sender: Address::new(&sender.address),
            to: Address::new(&receiver.address),
            coins,
            gas: self.gas_for(tx.outputs.len()),
            memo: tx.memo,
            observed_pool_address: PubKey::default(),
        }))
    }

    async fn get_account(&self, addr: &Address) -> ChainResult<Account> {
        let url = format!(
            "{}/abci_query?path=\"/account/{}\"",
            self.rpc_host, addr
        );
        let result: AbciQueryResult = self.get_envelope(&url).await?;
        if result.response.value.is_empty() {
            return Ok(Account::default());
        }
        let buf = base64::engine::general_purpose::STANDARD
            .decode(&result.response.value)
            .map_err(|e| ChainError::PermanentDecode(format!("bad account payload: {e}")))?;
        let account: WireAccount = serde_json::from_slice(&buf)
            .map_err(|e| ChainError::PermanentDecode(format!("bad account json: {e}")))?;
        Ok(Account {
            sequence: account.sequence,
            account_number: account.account_number,
            coins: Self::coins_from_wire(&account.coins)?,
        })
    }

    async fn sign_tx(
        &self,
        toi: &TxOutItem,
        _height: i64,
        signer: &dyn KeySign,
    ) -> ChainResult<Vec<u8>> {
        let from = self.address_of(&toi.vault_pub_key);
        let (sequence, account_number) = self.next_sequence(&from).await?;
        let sign_doc = SignDoc {
            account_number,
            sequence,
            from: from.to_string(),
            to: toi.to_address.as_str(),
            coins: vec![WireCoin {
                denom: toi.coin.asset.symbol.clone(),
                amount: toi.coin.amount,
            }],
            memo: &toi.memo,
        };
        let payload = serde_json::to_vec(&sign_doc)
            .map_err(|e| ChainError::Generic(format!("fail to marshal sign doc: {e}")))?;
        let signature = signer
            .sign(&payload, &toi.vault_pub_key)
            .await
            .map_err(|e| e.into_chain_error())?;

        let signed = serde_json::json!({
            "tx": serde_json::from_slice::<serde_json::Value>(&payload)
                .expect("payload round-trips"),
            "signature": hex::encode(signature),
        });
        serde_json::to_vec(&signed)
            .map_err(|e| ChainError::Generic(format!("fail to marshal signed tx: {e}")))
    }

    async fn broadcast_tx(&self, _toi: &TxOutItem, signed: &[u8]) -> ChainResult<TxId> {
        let url = format!(
            "{}/broadcast_tx_sync?tx=0x{}",
            self.rpc_host,
            hex::encode(signed)
        );
        let result: BroadcastResult = self.get_envelope(&url).await?;
        if result.code != 0 {
            if result.log.contains("Tx already exists in cache") {
                debug!("broadcast hit the mempool cache, treating as success");
                return Ok(TxId::new(&format!("{:X}", Sha256::digest(signed))));
            }
            return Err(ChainError::TransientRpc(format!(
                "broadcast rejected (code {}): {}",
                result.code, result.log
            )));
        }
        Ok(TxId::new(&result.hash))
    }

    async fn update_fees(&self, height: i64) -> ChainResult<()> {
        let url = format!(
            "{}/abci_query?path=\"/param/fees\"&height={height}",
            self.rpc_host
        );
        let result: AbciQueryResult = self.get_envelope(&url).await?;
        let buf = base64::engine::general_purpose::STANDARD
            .decode(&result.response.value)
            .map_err(|e| ChainError::PermanentDecode(format!("bad fee payload: {e}")))?;
        let fees: FeeParams = serde_json::from_slice(&buf)
            .map_err(|e| ChainError::PermanentDecode(format!("bad fee json: {e}")))?;

        if let Some(fixed) = fees.fixed_fee_params {
            if fixed.fee > 0 {
                self.single_fee.store(fixed.fee, Ordering::Relaxed);
            }
        }
        if fees.multi_transfer_fee > 0 {
            self.multi_fee.store(fees.multi_transfer_fee, Ordering::Relaxed);
        }
        debug!(
            single = self.single_fee(),
            multi = self.multi_fee(),
            "binance transfer fees refreshed"
        );
        Ok(())
    }

    async fn validate_metadata(&self, _toi: &TxOutItem) -> bool {
        // the sequence cache self-heals on the next height advance
        let cache = self.seq_cache.lock().expect("seq cache poisoned");
        if cache.chain_height == 0 {
            warn!("signing before any sequence observation");
        }
        true
    }
}
