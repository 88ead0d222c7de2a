// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! REST client for the co-located ledger node: posting observations and
//! keysign failures, fetching outbound/keygen instructions and vault keys.

use crate::error::{ChainError, ChainResult};
use bifrost_types::{Chain, Coins, PubKey, TxId, TxIn, TxOut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Keygen result scheduled at a ledger height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keygen {
    pub height: i64,
    pub members: Vec<PubKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultPubKeys {
    pub asgard: Vec<PubKey>,
    pub yggdrasil: Vec<PubKey>,
}

#[derive(Debug, Serialize)]
struct KeysignFailure<'a> {
    blame: &'a [String],
    height: i64,
    memo: &'a str,
    coins: &'a Coins,
    vault_pub_key: &'a PubKey,
    signer: &'a str,
}

#[derive(Debug, Deserialize)]
struct TxIdResponse {
    txhash: String,
}

#[derive(Debug, Deserialize)]
struct LastBlockResponse {
    #[serde(default)]
    thorchain: i64,
    #[serde(default)]
    last_observed_in: i64,
    #[serde(default)]
    last_signed_out: i64,
}

#[derive(Debug, Deserialize)]
struct ChainsTxOut {
    #[serde(default)]
    chains: HashMap<Chain, TxOut>,
}

pub struct ThorchainClient {
    base_url: String,
    node_address: String,
    http: reqwest::Client,
}

impl ThorchainClient {
    pub fn new(base_url: &str, node_address: &str, timeout: Duration) -> ChainResult<Self> {
        let base_url = if base_url.starts_with("http") {
            base_url.to_string()
        } else {
            format!("http://{base_url}")
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Generic(format!("fail to build ledger client: {e}")))?;
        Ok(ThorchainClient {
            base_url,
            node_address: node_address.to_string(),
            http,
        })
    }

    pub fn node_address(&self) -> &str {
        &self.node_address
    }

    fn url(&self, path: &str) -> String {
        format!("{}/thorchain/{path}", self.base_url)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> ChainResult<T> {
        let url = self.url(path);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ChainError::Ledger(format!(
                "unexpected status {} from {url}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ChainError::Ledger(format!("undecodable response from {url}: {e}")))
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> ChainResult<TxId> {
        let url = self.url(path);
        let response = self.http.post(&url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(ChainError::Ledger(format!(
                "unexpected status {} from {url}",
                response.status()
            )));
        }
        let response: TxIdResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Ledger(format!("undecodable response from {url}: {e}")))?;
        Ok(TxId::new(&response.txhash))
    }

    pub async fn get_height(&self) -> ChainResult<i64> {
        let response: LastBlockResponse = self.get_json("lastblock").await?;
        Ok(response.thorchain)
    }

    pub async fn get_last_observed_in_height(&self, chain: &Chain) -> ChainResult<i64> {
        let response: LastBlockResponse = self.get_json(&format!("lastblock/{chain}")).await?;
        Ok(response.last_observed_in)
    }

    pub async fn get_last_signed_out_height(&self, chain: &Chain) -> ChainResult<i64> {
        let response: LastBlockResponse = self.get_json(&format!("lastblock/{chain}")).await?;
        Ok(response.last_signed_out)
    }

    /// Post a batch of inbound observations; the signer is this node.
    pub async fn post_observed_tx_in(&self, tx_in: &TxIn) -> ChainResult<TxId> {
        debug!(chain = %tx_in.chain, txs = tx_in.tx_array.len(), "posting inbound observations");
        self.post_json("observed_txin", tx_in).await
    }

    pub async fn post_observed_tx_out(&self, tx_in: &TxIn) -> ChainResult<TxId> {
        debug!(chain = %tx_in.chain, txs = tx_in.tx_array.len(), "posting outbound observations");
        self.post_json("observed_txout", tx_in).await
    }

    /// Report a failed keysign ceremony; non-empty blame feeds the slasher.
    pub async fn post_keysign_failure(
        &self,
        blame: &[String],
        height: i64,
        memo: &str,
        coins: &Coins,
        vault_pub_key: &PubKey,
    ) -> ChainResult<TxId> {
        let body = KeysignFailure {
            blame,
            height,
            memo,
            coins,
            vault_pub_key,
            signer: &self.node_address,
        };
        self.post_json("keysign_failure", &body).await
    }

    /// Outbound items scheduled at `height` for vaults under `pub_key`,
    /// bucketed per chain.
    pub async fn get_keysign(
        &self,
        height: i64,
        pub_key: &PubKey,
    ) -> ChainResult<HashMap<Chain, TxOut>> {
        let response: ChainsTxOut = self
            .get_json(&format!("keysign/{height}/{pub_key}"))
            .await?;
        Ok(response.chains)
    }

    pub async fn get_keygen(&self, height: i64, pub_key: &PubKey) -> ChainResult<Vec<Keygen>> {
        self.get_json(&format!("keygen/{height}/{pub_key}")).await
    }

    /// Current keysign party for a vault.
    pub async fn get_keysign_party(&self, pub_key: &PubKey) -> ChainResult<Vec<PubKey>> {
        self.get_json(&format!("vaults/{pub_key}/signers")).await
    }

    pub async fn get_vaults_pub_keys(&self) -> ChainResult<VaultPubKeys> {
        self.get_json("vaults/pubkeys").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalisation() {
        let client =
            ThorchainClient::new("localhost:1317", "thor1node", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url("lastblock"),
            "http://localhost:1317/thorchain/lastblock"
        );
        let client =
            ThorchainClient::new("https://ledger:1317", "thor1node", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            client.url("keysign/12/pk"),
            "https://ledger:1317/thorchain/keysign/12/pk"
        );
    }

    #[test]
    fn test_chains_txout_deserialises() {
        let raw = r#"{
            "chains": {
                "BNB": {
                    "height": 12,
                    "tx_array": [{
                        "chain": "BNB",
                        "to": "tbnb1dest",
                        "vault_pubkey": "asgard-pk",
                        "coin": {"asset": "BNB.RUNE-A1F", "amount": 100},
                        "memo": "outbound:IN1",
                        "in_hash": "IN1",
                        "out_hash": ""
                    }]
                }
            }
        }"#;
        let parsed: ChainsTxOut = serde_json::from_str(raw).unwrap();
        let out = parsed.chains.get(&Chain::bnb()).unwrap();
        assert_eq!(out.height, 12);
        assert_eq!(out.tx_array.len(), 1);
        assert_eq!(out.tx_array[0].memo, "outbound:IN1");
    }
}
