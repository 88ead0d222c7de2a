// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bitcoin chain adapter: UTXO model, vbyte fees, memos carried across one
//! or two OP_RETURN outputs. Keeps a bounded window of per-block unspent
//! outputs to build new transactions from.

use super::{Account, Block, ChainAdapter};
use crate::config::ChainConfig;
use crate::error::{ChainError, ChainResult};
use crate::pubkey_manager::PubKeyManager;
use crate::storage::{BlockMeta, ScannerStorage, UnspentOutput};
use crate::tss::KeySign;
use async_trait::async_trait;
use bifrost_types::{Address, Asset, Chain, Coin, Coins, PubKey, TxId, TxInItem, TxOutItem, ONE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_SATS_PER_VBYTE: u64 = 25;
/// Rough size model: overhead + per-input + per-output vbytes.
const TX_OVERHEAD_VBYTES: u64 = 10;
const INPUT_VBYTES: u64 = 148;
const OUTPUT_VBYTES: u64 = 34;

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
struct ScriptPubKey {
    #[serde(default)]
    asm: String,
    #[serde(default)]
    addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Vin {
    #[serde(default)]
    txid: String,
    #[serde(default)]
    vout: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Vout {
    #[serde(default)]
    value: f64,
    n: u32,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTx {
    txid: String,
    #[serde(default)]
    vin: Vec<Vin>,
    #[serde(default)]
    vout: Vec<Vout>,
}

#[derive(Debug, Deserialize)]
struct VerboseBlock {
    hash: String,
    height: i64,
    tx: Vec<RawTx>,
}

#[derive(Debug, Deserialize)]
struct FeeEstimate {
    #[serde(default)]
    feerate: Option<f64>,
}

#[derive(Debug, Serialize)]
struct TxInput {
    txid: String,
    vout: u32,
    value: u64,
}

#[derive(Debug, Serialize)]
struct TxOutput {
    address: String,
    value: u64,
}

/// The canonical signing payload for an outbound.
#[derive(Debug, Serialize)]
struct SignDoc {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    op_return: String,
}

pub struct BitcoinAdapter {
    rpc_host: String,
    rpc_user: String,
    rpc_password: String,
    http: reqwest::Client,
    storage: Arc<ScannerStorage>,
    pubkey_mgr: Arc<PubKeyManager>,
    sats_per_vbyte: AtomicU64,
}

impl BitcoinAdapter {
    pub fn new(
        cfg: &ChainConfig,
        storage: Arc<ScannerStorage>,
        pubkey_mgr: Arc<PubKeyManager>,
    ) -> ChainResult<Self> {
        let rpc_host = if cfg.rpc_host.starts_with("http") {
            cfg.rpc_host.clone()
        } else {
            format!("http://{}", cfg.rpc_host)
        };
        let http = reqwest::Client::builder()
            .timeout(cfg.scanner.http_timeout())
            .build()
            .map_err(|e| ChainError::Generic(format!("fail to build http client: {e}")))?;
        Ok(BitcoinAdapter {
            rpc_host,
            rpc_user: cfg.rpc_user.clone(),
            rpc_password: cfg.rpc_password.clone(),
            http,
            storage,
            pubkey_mgr,
            sats_per_vbyte: AtomicU64::new(DEFAULT_SATS_PER_VBYTE),
        })
    }

    async fn rpc<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ChainResult<T> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "bifrost",
            "method": method,
            "params": params,
        });
        let mut request = self.http.post(&self.rpc_host).json(&body);
        if !self.rpc_user.is_empty() {
            request = request.basic_auth(&self.rpc_user, Some(&self.rpc_password));
        }
        let response = request.send().await?;
        let envelope: RpcEnvelope<T> = response.json().await.map_err(|e| {
            ChainError::TransientRpc(format!("undecodable {method} response: {e}"))
        })?;
        if let Some(err) = envelope.error {
            if err.message.contains("Block height out of range") {
                return Err(ChainError::HeightUnavailable(0));
            }
            if err.code == -27 || err.message.contains("already in block chain") {
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

    /// Filter rules for the expected vout layout: vout 0 pays the vault,
    /// vout 1 is change, the remaining vouts are OP_RETURN memo chunks.
    fn ignore_tx(tx: &RawTx) -> bool {
        if tx.vin.is_empty() || tx.vout.is_empty() || tx.vout.len() > 4 {
            return true;
        }
        if tx.vout[0].value == 0.0 || tx.vin[0].txid.is_empty() {
            return true;
        }
        if tx.vout[0].script_pub_key.addresses.len() != 1 {
            return true;
        }
        let mut count_op_return = 0;
        let mut count_with_coins = 0;
        for vout in &tx.vout {
            if vout.value > 0.0 {
                count_with_coins += 1;
            }
            if vout.script_pub_key.asm.starts_with("OP_RETURN") {
                count_op_return += 1;
            }
        }
        count_op_return == 0 || count_op_return > 2 || count_with_coins > 2
    }

    /// Memo chunks live in OP_RETURN outputs; reassemble by concatenating
    /// the hex parts in vout order, then hex-decode.
    fn extract_memo(tx: &RawTx) -> ChainResult<String> {
        let mut chunks = String::new();
        for vout in &tx.vout {
            if let Some(hex_part) = vout.script_pub_key.asm.strip_prefix("OP_RETURN ") {
                chunks.push_str(hex_part.split(' ').next().unwrap_or(""));
            }
        }
        let decoded = hex::decode(&chunks)
            .map_err(|e| ChainError::PermanentDecode(format!("bad OP_RETURN hex: {e}")))?;
        String::from_utf8(decoded)
            .map_err(|e| ChainError::PermanentDecode(format!("OP_RETURN is not utf8: {e}")))
    }

    /// Sender is the address behind vin 0's previous output.
    async fn lookup_sender(&self, tx: &RawTx) -> ChainResult<Address> {
        let vin = tx
            .vin
            .first()
            .ok_or_else(|| ChainError::PermanentDecode("no vin available".to_string()))?;
        let prev: RawTx = self
            .rpc("getrawtransaction", json!([vin.txid, true]))
            .await?;
        let vout = prev
            .vout
            .get(vin.vout as usize)
            .ok_or_else(|| ChainError::PermanentDecode("vin points past prev vouts".to_string()))?;
        vout.script_pub_key
            .addresses
            .first()
            .map(|a| Address::new(a))
            .ok_or_else(|| ChainError::PermanentDecode("no address in prev vout".to_string()))
    }

    fn sats(value: f64) -> u64 {
        (value * ONE as f64).round() as u64
    }

    /// Record outputs paying our vaults so the signer can spend them later.
    async fn index_vault_utxos(&self, height: i64, hash: &str, txs: &[RawTx]) -> ChainResult<()> {
        let mut meta = BlockMeta::new(height, hash);
        for tx in txs {
            for vout in &tx.vout {
                let Some(addr) = vout.script_pub_key.addresses.first() else {
                    continue;
                };
                if vout.value <= 0.0 {
                    continue;
                }
                if self
                    .pubkey_mgr
                    .is_valid_pool_address(&Address::new(addr), &self.chain())
                    .await
                    .is_some()
                {
                    meta.utxos.push(UnspentOutput {
                        tx_id: TxId::new(&tx.txid),
                        vout: vout.n,
                        value: Self::sats(vout.value),
                        spent: false,
                    });
                }
            }
        }
        if !meta.utxos.is_empty() {
            debug!(height, utxos = meta.utxos.len(), "recorded vault utxos");
        }
        self.storage.set_block_meta(&self.chain(), &meta)?;
        self.storage.prune_block_metas(&self.chain(), height)?;
        Ok(())
    }

    fn fee_for(&self, inputs: usize, outputs: usize) -> u64 {
        let vbytes = TX_OVERHEAD_VBYTES
            + INPUT_VBYTES * inputs as u64
            + OUTPUT_VBYTES * outputs as u64;
        self.sats_per_vbyte.load(Ordering::Relaxed) * vbytes
    }

    /// Pick unspents (oldest first) until they cover `target` plus the fee
    /// for the growing input set.
    fn select_unspents(
        &self,
        target: u64,
    ) -> ChainResult<(Vec<(i64, UnspentOutput)>, u64)> {
        let mut selected = Vec::new();
        let mut total = 0u64;
        for meta in self.storage.get_block_metas(&self.chain())? {
            for utxo in meta.utxos.iter().filter(|u| !u.spent) {
                total += utxo.value;
                selected.push((meta.height, utxo.clone()));
                let fee = self.fee_for(selected.len(), 3);
                if total >= target.saturating_add(fee) {
                    return Ok((selected, fee));
                }
            }
        }
        let fee = self.fee_for(selected.len(), 3);
        if total >= target.saturating_add(fee) {
            Ok((selected, fee))
        } else {
            Err(ChainError::Generic(format!(
                "insufficient unspent outputs: have {total}, need {target} plus fee {fee}"
            )))
        }
    }

    fn mark_spent(&self, spent: &[(i64, UnspentOutput)]) -> ChainResult<()> {
        for (height, utxo) in spent {
            if let Some(mut meta) = self.storage.get_block_meta(&self.chain(), *height)? {
                for candidate in meta.utxos.iter_mut() {
                    if candidate.tx_id == utxo.tx_id && candidate.vout == utxo.vout {
                        candidate.spent = true;
                    }
                }
                self.storage.set_block_meta(&self.chain(), &meta)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for BitcoinAdapter {
    fn chain(&self) -> Chain {
        Chain::btc()
    }

    async fn get_height(&self) -> ChainResult<i64> {
        self.rpc("getblockcount", json!([])).await
    }

    async fn fetch_block(&self, height: i64) -> ChainResult<Block> {
        let hash: String = self
            .rpc("getblockhash", json!([height]))
            .await
            .map_err(|e| match e {
                ChainError::HeightUnavailable(_) => ChainError::HeightUnavailable(height),
                other => other,
            })?;
        let block: VerboseBlock = self.rpc("getblock", json!([hash, 2])).await?;
        self.index_vault_utxos(block.height, &block.hash, &block.tx)
            .await?;
        let txs = block
            .tx
            .iter()
            .map(|tx| serde_json::to_string(tx).expect("raw tx reserialises"))
            .collect();
        Ok(Block {
            chain: self.chain(),
            height: block.height,
            txs,
        })
    }

    async fn decode_tx(&self, raw: &str, _height: i64) -> ChainResult<Option<TxInItem>> {
        let tx: RawTx = serde_json::from_str(raw)
            .map_err(|e| ChainError::PermanentDecode(format!("bad raw tx: {e}")))?;
        if Self::ignore_tx(&tx) {
            return Ok(None);
        }
        let memo = Self::extract_memo(&tx)?;
        let sender = self.lookup_sender(&tx).await?;
        let amount = Self::sats(tx.vout[0].value);
        Ok(Some(TxInItem {
            tx: TxId::new(&format!("{}:0", tx.txid)),
            sender,
            to: Address::new(&tx.vout[0].script_pub_key.addresses[0]),
            coins: Coins::one(Coin::new(Asset::btc(), amount)),
            gas: Coins::one(Coin::new(Asset::btc(), self.fee_for(tx.vin.len(), tx.vout.len()))),
            memo,
            observed_pool_address: PubKey::default(),
        }))
    }

    /// The "account" of a UTXO vault is the sum of its tracked unspents.
    async fn get_account(&self, _addr: &Address) -> ChainResult<Account> {
        let mut total = 0u64;
        for meta in self.storage.get_block_metas(&self.chain())? {
            total += meta.utxos.iter().filter(|u| !u.spent).map(|u| u.value).sum::<u64>();
        }
        Ok(Account {
            sequence: 0,
            account_number: 0,
            coins: Coins::one(Coin::new(Asset::btc(), total)),
        })
    }

    async fn sign_tx(
        &self,
        toi: &TxOutItem,
        _height: i64,
        signer: &dyn KeySign,
    ) -> ChainResult<Vec<u8>> {
        let vault_addr = self.address_of(&toi.vault_pub_key);
        let (selected, fee) = self.select_unspents(toi.coin.amount)?;
        let total: u64 = selected.iter().map(|(_, u)| u.value).sum();
        let change = total - toi.coin.amount - fee;

        let mut outputs = vec![TxOutput {
            address: toi.to_address.to_string(),
            value: toi.coin.amount,
        }];
        if change > 0 {
            outputs.push(TxOutput {
                address: vault_addr.to_string(),
                value: change,
            });
        }
        let sign_doc = SignDoc {
            inputs: selected
                .iter()
                .map(|(_, u)| TxInput {
                    txid: u.tx_id.to_string(),
                    vout: u.vout,
                    value: u.value,
                })
                .collect(),
            outputs,
            op_return: hex::encode(&toi.memo),
        };
        let payload = serde_json::to_vec(&sign_doc)
            .map_err(|e| ChainError::Generic(format!("fail to marshal sign doc: {e}")))?;
        let signature = signer
            .sign(&payload, &toi.vault_pub_key)
            .await
            .map_err(|e| e.into_chain_error())?;
        self.mark_spent(&selected)?;

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
            .rpc("sendrawtransaction", json!([hex::encode(signed)]))
            .await;
        match result {
            Ok(txid) => Ok(TxId::new(&txid)),
            Err(ChainError::AlreadyOnChain) => {
                warn!("tx already in chain, treating broadcast as success");
                Ok(TxId::new(&format!("{:x}", Sha256::digest(signed))))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_fees(&self, _height: i64) -> ChainResult<()> {
        let estimate: FeeEstimate = self.rpc("estimatesmartfee", json!([2])).await?;
        if let Some(btc_per_kvb) = estimate.feerate {
            // BTC/kvB to sats/vB
            let sats = ((btc_per_kvb * ONE as f64) / 1000.0).round() as u64;
            if sats > 0 {
                self.sats_per_vbyte.store(sats, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vout(n: u32, value: f64, asm: &str, addr: Option<&str>) -> Vout {
        Vout {
            value,
            n,
            script_pub_key: ScriptPubKey {
                asm: asm.to_string(),
                addresses: addr.map(|a| vec![a.to_string()]).unwrap_or_default(),
            },
        }
    }

    fn transfer_tx(memo_hex_parts: &[&str]) -> RawTx {
        let mut vouts = vec![
            vout(0, 1.5, "OP_DUP OP_HASH160", Some("bc1qvault")),
            vout(1, 0.5, "OP_DUP OP_HASH160", Some("bc1qchange")),
        ];
        for (i, part) in memo_hex_parts.iter().enumerate() {
            vouts.push(vout(2 + i as u32, 0.0, &format!("OP_RETURN {part}"), None));
        }
        RawTx {
            txid: "deadbeef".to_string(),
            vin: vec![Vin {
                txid: "feedface".to_string(),
                vout: 0,
            }],
            vout: vouts,
        }
    }

    #[test]
    fn test_ignore_rules() {
        // the happy shape passes
        assert!(!BitcoinAdapter::ignore_tx(&transfer_tx(&["73776170"])));

        // no OP_RETURN at all
        let mut tx = transfer_tx(&[]);
        tx.vout.truncate(2);
        assert!(BitcoinAdapter::ignore_tx(&tx));

        // more than four vouts
        let mut tx = transfer_tx(&["aa", "bb"]);
        tx.vout.push(vout(4, 0.0, "OP_RETURN cc", None));
        assert!(BitcoinAdapter::ignore_tx(&tx));

        // vout 0 without value
        let mut tx = transfer_tx(&["aa"]);
        tx.vout[0].value = 0.0;
        assert!(BitcoinAdapter::ignore_tx(&tx));

        // no inputs
        let mut tx = transfer_tx(&["aa"]);
        tx.vin.clear();
        assert!(BitcoinAdapter::ignore_tx(&tx));

        // three value-carrying vouts
        let mut tx = transfer_tx(&["aa"]);
        tx.vout[2].value = 0.1;
        tx.vout.push(vout(3, 0.2, "OP_DUP", Some("bc1qthird")));
        assert!(BitcoinAdapter::ignore_tx(&tx));
    }

    #[test]
    fn test_memo_reassembled_across_op_returns() {
        // "swap:BTC.BTC" hex-split across two OP_RETURN outputs
        let full = hex::encode("swap:BTC.BTC");
        let (a, b) = full.split_at(8);
        let tx = transfer_tx(&[a, b]);
        assert_eq!(BitcoinAdapter::extract_memo(&tx).unwrap(), "swap:BTC.BTC");

        // single OP_RETURN
        let tx = transfer_tx(&[full.as_str()]);
        assert_eq!(BitcoinAdapter::extract_memo(&tx).unwrap(), "swap:BTC.BTC");
    }

    #[test]
    fn test_memo_bad_hex_is_permanent() {
        let tx = transfer_tx(&["zzzz"]);
        assert!(matches!(
            BitcoinAdapter::extract_memo(&tx),
            Err(ChainError::PermanentDecode(_))
        ));
    }

    #[test]
    fn test_sats_conversion() {
        assert_eq!(BitcoinAdapter::sats(1.5), 150_000_000);
        assert_eq!(BitcoinAdapter::sats(0.00000001), 1);
    }
}
