// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ethereum chain adapter: nonce/gas-price model over plain `eth_*`
//! JSON-RPC. Values arrive as hex-encoded wei and are normalised to the
//! shared 1e8 fixed point.

use super::{Account, Block, ChainAdapter};
use crate::config::ChainConfig;
use crate::error::{ChainError, ChainResult};
use crate::tss::KeySign;
use async_trait::async_trait;
use bifrost_types::{Address, Asset, Chain, Coin, Coins, PubKey, TxId, TxInItem, TxOutItem};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// wei (1e18) to the shared 1e8 fixed point.
const WEI_PER_UNIT: u128 = 10_000_000_000;
const DEFAULT_GAS_PRICE_WEI: u64 = 20_000_000_000;
const TRANSFER_GAS: u64 = 21_000;

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EthTx {
    hash: String,
    from: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    value: String,
    #[serde(default)]
    input: String,
}

#[derive(Debug, Deserialize)]
struct EthBlock {
    number: String,
    #[serde(default)]
    transactions: Vec<EthTx>,
}

#[derive(Debug, Serialize)]
struct SignDoc<'a> {
    nonce: u64,
    gas_price: u64,
    gas_limit: u64,
    from: String,
    to: &'a str,
    value_wei: u128,
    data: String,
}

pub struct EthereumAdapter {
    rpc_host: String,
    http: reqwest::Client,
    gas_price_wei: AtomicU64,
}

impl EthereumAdapter {
    pub fn new(cfg: &ChainConfig) -> ChainResult<Self> {
        let rpc_host = if cfg.rpc_host.starts_with("http") {
            cfg.rpc_host.clone()
        } else {
            format!("http://{}", cfg.rpc_host)
        };
        let http = reqwest::Client::builder()
            .timeout(cfg.scanner.http_timeout())
            .build()
            .map_err(|e| ChainError::Generic(format!("fail to build http client: {e}")))?;
        Ok(EthereumAdapter {
            rpc_host,
            http,
            gas_price_wei: AtomicU64::new(DEFAULT_GAS_PRICE_WEI),
        })
    }

    async fn rpc<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ChainResult<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let response = self.http.post(&self.rpc_host).json(&body).send().await?;
        let envelope: RpcEnvelope<T> = response.json().await.map_err(|e| {
            ChainError::TransientRpc(format!("undecodable {method} response: {e}"))
        })?;
        if let Some(err) = envelope.error {
            let msg = err.message.to_lowercase();
            if msg.contains("known transaction") || msg.contains("already known") {
                return Err(ChainError::AlreadyOnChain);
            }
            return Err(ChainError::TransientRpc(format!(
                "{method} failed ({}): {}",
                err.code, err.message
            )));
        }
        envelope
            .result
            .ok_or_else(|| ChainError::TransientRpc(format!("empty {method} result")))
    }

    fn parse_hex_u64(s: &str) -> ChainResult<u64> {
        u64::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|e| ChainError::PermanentDecode(format!("bad hex number {s}: {e}")))
    }

    fn parse_hex_u128(s: &str) -> ChainResult<u128> {
        u128::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|e| ChainError::PermanentDecode(format!("bad hex number {s}: {e}")))
    }

    /// The memo rides in the tx input data as plain utf8, hex encoded.
    fn memo_from_input(input: &str) -> String {
        let trimmed = input.trim_start_matches("0x");
        match hex::decode(trimmed) {
            Ok(bytes) => String::from_utf8(bytes).unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}

#[async_trait]
impl ChainAdapter for EthereumAdapter {
    fn chain(&self) -> Chain {
        Chain::eth()
    }

    async fn get_height(&self) -> ChainResult<i64> {
        let hex: String = self.rpc("eth_blockNumber", json!([])).await?;
        Ok(Self::parse_hex_u64(&hex)? as i64)
    }

    async fn fetch_block(&self, height: i64) -> ChainResult<Block> {
        let tag = format!("0x{height:x}");
        // a null result means the block does not exist yet
        let block: EthBlock = match self.rpc("eth_getBlockByNumber", json!([tag, true])).await {
            Ok(block) => block,
            Err(ChainError::TransientRpc(msg)) if msg.contains("empty eth_getBlockByNumber") => {
                return Err(ChainError::HeightUnavailable(height));
            }
            Err(e) => return Err(e),
        };
        let parsed = Self::parse_hex_u64(&block.number)? as i64;
        let txs = block
            .transactions
            .iter()
            .map(|tx| serde_json::to_string(tx).expect("eth tx reserialises"))
            .collect();
        Ok(Block {
            chain: self.chain(),
            height: parsed,
            txs,
        })
    }

    async fn decode_tx(&self, raw: &str, _height: i64) -> ChainResult<Option<TxInItem>> {
        let tx: EthTx = serde_json::from_str(raw)
            .map_err(|e| ChainError::PermanentDecode(format!("bad eth tx: {e}")))?;
        // contract creations have no recipient and cannot be deposits
        let Some(to) = tx.to else {
            return Ok(None);
        };
        let wei = Self::parse_hex_u128(&tx.value)?;
        if wei == 0 {
            return Ok(None);
        }
        let amount = (wei / WEI_PER_UNIT) as u64;
        let gas_price = self.gas_price_wei.load(Ordering::Relaxed);
        let gas = ((TRANSFER_GAS as u128 * gas_price as u128) / WEI_PER_UNIT) as u64;

        Ok(Some(TxInItem {
            tx: TxId::new(tx.hash.trim_start_matches("0x")),
            sender: Address::new(&tx.from),
            to: Address::new(&to),
            coins: Coins::one(Coin::new(Asset::eth(), amount)),
            gas: Coins::one(Coin::new(Asset::eth(), gas)),
            memo: Self::memo_from_input(&tx.input),
            observed_pool_address: PubKey::default(),
        }))
    }

    async fn get_account(&self, addr: &Address) -> ChainResult<Account> {
        let nonce_hex: String = self
            .rpc("eth_getTransactionCount", json!([addr.as_str(), "latest"]))
            .await?;
        let balance_hex: String = self
            .rpc("eth_getBalance", json!([addr.as_str(), "latest"]))
            .await?;
        let balance = (Self::parse_hex_u128(&balance_hex)? / WEI_PER_UNIT) as u64;
        Ok(Account {
            sequence: Self::parse_hex_u64(&nonce_hex)?,
            account_number: 0,
            coins: Coins::one(Coin::new(Asset::eth(), balance)),
        })
    }

    async fn sign_tx(
        &self,
        toi: &TxOutItem,
        _height: i64,
        signer: &dyn KeySign,
    ) -> ChainResult<Vec<u8>> {
        let from = self.address_of(&toi.vault_pub_key);
        let account = self.get_account(&from).await?;
        let gas_price = self.gas_price_wei.load(Ordering::Relaxed);
        let sign_doc = SignDoc {
            nonce: account.sequence,
            gas_price,
            gas_limit: TRANSFER_GAS,
            from: from.to_string(),
            to: toi.to_address.as_str(),
            value_wei: toi.coin.amount as u128 * WEI_PER_UNIT,
            data: hex::encode(&toi.memo),
        };
        let payload = serde_json::to_vec(&sign_doc)
            .map_err(|e| ChainError::Generic(format!("fail to marshal sign doc: {e}")))?;
        let signature = signer
            .sign(&payload, &toi.vault_pub_key)
            .await
            .map_err(|e| e.into_chain_error())?;
        let signed = json!({
            "tx": serde_json::from_slice::<serde_json::Value>(&payload)
                .expect("payload round-trips"),
            "signature": hex::encode(signature),
        });
        serde_json::to_vec(&signed)
            .map_err(|e| ChainError::Generic(format!("fail to marshal signed tx: {e}")))
    }

    async fn broadcast_tx(&self, _toi: &TxOutItem, signed: &[u8]) -> ChainResult<TxId> {
        let result: Result<String, ChainError> = self
            .rpc(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(signed))]),
            )
            .await;
        match result {
            Ok(hash) => Ok(TxId::new(hash.trim_start_matches("0x"))),
            Err(ChainError::AlreadyOnChain) => {
                debug!("tx already known, treating broadcast as success");
                Ok(TxId::new(&format!("{:x}", Sha256::digest(signed))))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_fees(&self, _height: i64) -> ChainResult<()> {
        let hex: String = self.rpc("eth_gasPrice", json!([])).await?;
        let price = Self::parse_hex_u64(&hex)?;
        if price > 0 {
            self.gas_price_wei.store(price, Ordering::Relaxed);
        }
        Ok(())
    }
}
