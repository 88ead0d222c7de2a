// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The threshold-signing seam. The TSS protocol itself lives in an external
//! daemon; this module speaks its keysign contract and carries blame back
//! out. Vaults solely owned by this node short-circuit to a local key.

use crate::error::{ChainError, ChainResult};
use crate::thorchain_client::ThorchainClient;
use async_trait::async_trait;
use base64::Engine;
use bifrost_types::PubKey;
use secp256k1::{Message, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Signing failure; a non-empty blame list names the nodes that broke the
/// ceremony and must be reported to the ledger.
#[derive(Debug, Clone)]
pub struct KeysignError {
    pub blame: Vec<String>,
    pub reason: String,
}

impl KeysignError {
    pub fn into_chain_error(self) -> ChainError {
        if self.blame.is_empty() {
            ChainError::KeysignOpaque(self.reason)
        } else {
            ChainError::KeysignBlame(self.blame, self.reason)
        }
    }
}

#[async_trait]
pub trait KeySign: Send + Sync {
    /// Produce a signature over `msg` with the key behind `vault_pub_key`.
    async fn sign(&self, msg: &[u8], vault_pub_key: &PubKey) -> Result<Vec<u8>, KeysignError>;
}

#[derive(Debug, Serialize)]
struct KeysignRequest {
    pool_pub_key: String,
    message: String,
    signer_party: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BlameNode {
    pubkey: String,
}

#[derive(Debug, Deserialize, Default)]
struct Blame {
    #[serde(default)]
    fail_reason: String,
    #[serde(default)]
    blame_nodes: Vec<BlameNode>,
}

#[derive(Debug, Deserialize)]
struct KeysignResponse {
    #[serde(default)]
    signature: String,
    #[serde(default)]
    blame: Blame,
}

/// Client of the local TSS daemon. The signer party is the ledger's current
/// keysign party for the vault, fetched per request.
pub struct TssSigner {
    keysign_url: String,
    http: reqwest::Client,
    ledger: Arc<ThorchainClient>,
}

impl TssSigner {
    pub fn new(keysign_url: &str, ledger: Arc<ThorchainClient>) -> ChainResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120)) // a TSS round can block for a while
            .build()
            .map_err(|e| ChainError::Generic(format!("fail to build tss client: {e}")))?;
        Ok(TssSigner {
            keysign_url: keysign_url.to_string(),
            http,
            ledger,
        })
    }
}

impl TssSigner {
    /// Join a keygen ceremony with the given members, returning the new
    /// shared public key. The daemon blocks until the ceremony settles.
    pub async fn keygen(&self, keygen_url: &str, members: &[PubKey]) -> ChainResult<PubKey> {
        let request = serde_json::json!({
            "keys": members.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
        });
        let response = self
            .http
            .post(keygen_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::TransientRpc(format!("tss keygen unreachable: {e}")))?;
        let response: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainError::TransientRpc(format!("bad keygen response: {e}")))?;
        match response.get("pub_key").and_then(|v| v.as_str()) {
            Some(pk) if !pk.is_empty() => Ok(PubKey::new(pk)),
            _ => Err(ChainError::Generic(format!(
                "keygen produced no key: {response}"
            ))),
        }
    }
}

#[async_trait]
impl KeySign for TssSigner {
    async fn sign(&self, msg: &[u8], vault_pub_key: &PubKey) -> Result<Vec<u8>, KeysignError> {
        let party = self
            .ledger
            .get_keysign_party(vault_pub_key)
            .await
            .map_err(|e| KeysignError {
                blame: Vec::new(),
                reason: format!("fail to get keysign party: {e}"),
            })?;
        info!(vault = %vault_pub_key, party = party.len(), "starting tss keysign");

        let request = KeysignRequest {
            pool_pub_key: vault_pub_key.to_string(),
            message: base64::engine::general_purpose::STANDARD.encode(msg),
            signer_party: party.iter().map(|p| p.to_string()).collect(),
        };
        let response = self
            .http
            .post(&self.keysign_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| KeysignError {
                blame: Vec::new(),
                reason: format!("tss daemon unreachable: {e}"),
            })?;
        let response: KeysignResponse = response.json().await.map_err(|e| KeysignError {
            blame: Vec::new(),
            reason: format!("bad tss response: {e}"),
        })?;

        if response.signature.is_empty() {
            let blame: Vec<String> = response
                .blame
                .blame_nodes
                .into_iter()
                .map(|n| n.pubkey)
                .collect();
            warn!(?blame, reason = %response.blame.fail_reason, "tss keysign failed");
            return Err(KeysignError {
                blame,
                reason: response.blame.fail_reason,
            });
        }
        base64::engine::general_purpose::STANDARD
            .decode(&response.signature)
            .map_err(|e| KeysignError {
                blame: Vec::new(),
                reason: format!("undecodable tss signature: {e}"),
            })
    }
}

/// Signs with this node's own key; used for Yggdrasil vaults whose
/// membership is exactly this node, where no TSS round is needed.
pub struct LocalSigner {
    secret: SecretKey,
    pub_key: PubKey,
}

impl LocalSigner {
    pub fn from_seed_hex(seed_hex: &str, pub_key: PubKey) -> ChainResult<Self> {
        let bytes = hex::decode(seed_hex)
            .map_err(|e| ChainError::Generic(format!("bad key seed: {e}")))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| ChainError::Generic(format!("bad secret key: {e}")))?;
        Ok(LocalSigner { secret, pub_key })
    }

    /// The vault key this signer can sign for without a ceremony.
    pub fn pub_key(&self) -> &PubKey {
        &self.pub_key
    }

    pub fn can_sign_for(&self, vault_pub_key: &PubKey) -> bool {
        &self.pub_key == vault_pub_key
    }
}

#[async_trait]
impl KeySign for LocalSigner {
    async fn sign(&self, msg: &[u8], vault_pub_key: &PubKey) -> Result<Vec<u8>, KeysignError> {
        if !self.can_sign_for(vault_pub_key) {
            return Err(KeysignError {
                blame: Vec::new(),
                reason: format!("local signer does not own {vault_pub_key}"),
            });
        }
        let digest = Sha256::digest(msg);
        let message = Message::from_digest_slice(&digest).map_err(|e| KeysignError {
            blame: Vec::new(),
            reason: format!("bad digest: {e}"),
        })?;
        let secp = Secp256k1::new();
        let signature = secp.sign_ecdsa(&message, &self.secret);
        Ok(signature.serialize_compact().to_vec())
    }
}
