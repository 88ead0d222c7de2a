// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use bifrost_types::Chain;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config loading shared by the daemon and its tools. YAML by extension,
/// JSON otherwise.
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BifrostConfig {
    /// The port the metrics server would listen on.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Where the scan cursors and block metadata live.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    pub thorchain: ThorchainConfig,
    #[serde(default)]
    pub tss: TssConfig,
    pub chains: Vec<ChainConfig>,
}

impl Config for BifrostConfig {}

impl BifrostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("at least one chain must be configured");
        }
        for chain in &self.chains {
            if chain.rpc_host.is_empty() {
                anyhow::bail!("chain {} has no rpc host", chain.chain);
            }
        }
        if self.thorchain.rest_url.is_empty() {
            anyhow::bail!("thorchain rest url is required");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThorchainConfig {
    /// REST endpoint of the co-located ledger node.
    pub rest_url: String,
    /// This node's ledger account address; used as the observation signer.
    pub node_address: String,
    #[serde(default)]
    pub scanner: BlockScannerConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct TssConfig {
    /// Local TSS daemon keysign endpoint. Absent means every vault this
    /// node signs for must be solely owned (local signing only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keysign_url: Option<String>,
    /// Local TSS daemon keygen endpoint, used when the ledger schedules a
    /// ceremony this node is a member of.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keygen_url: Option<String>,
    /// Hex seed of the node's own key, for single-owner vault signing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_secret_hex: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    pub chain: Chain,
    pub rpc_host: String,
    /// RPC basic-auth, used by the bitcoin node.
    #[serde(default)]
    pub rpc_user: String,
    #[serde(default)]
    pub rpc_password: String,
    #[serde(default)]
    pub scanner: BlockScannerConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlockScannerConfig {
    /// 0 means resume from the ledger's last observed height, or the chain
    /// tip failing that.
    #[serde(default)]
    pub start_block_height: i64,
    /// Depth of the scanner-to-observer channel.
    #[serde(default = "default_block_scan_processors")]
    pub block_scan_processors: usize,
    #[serde(default = "default_block_height_discover_back_off_ms")]
    pub block_height_discover_back_off_ms: u64,
    #[serde(default = "default_block_retry_interval_secs")]
    pub block_retry_interval_secs: u64,
    #[serde(default = "default_http_request_timeout_secs")]
    pub http_request_timeout_secs: u64,
}

impl Default for BlockScannerConfig {
    fn default() -> Self {
        BlockScannerConfig {
            start_block_height: 0,
            block_scan_processors: default_block_scan_processors(),
            block_height_discover_back_off_ms: default_block_height_discover_back_off_ms(),
            block_retry_interval_secs: default_block_retry_interval_secs(),
            http_request_timeout_secs: default_http_request_timeout_secs(),
        }
    }
}

impl BlockScannerConfig {
    pub fn back_off(&self) -> Duration {
        Duration::from_millis(self.block_height_discover_back_off_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.block_retry_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_request_timeout_secs)
    }
}

fn default_metrics_port() -> u16 {
    9000
}

fn default_db_path() -> String {
    "bifrost-data".to_string()
}

fn default_block_scan_processors() -> usize {
    4
}

fn default_block_height_discover_back_off_ms() -> u64 {
    300
}

fn default_block_retry_interval_secs() -> u64 {
    10
}

fn default_http_request_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kebab_case_yaml() {
        let raw = r#"
metrics-port: 9100
thorchain:
  rest-url: "http://localhost:1317"
  node-address: "thor1node"
chains:
  - chain: BNB
    rpc-host: "http://localhost:26657"
    scanner:
      start-block-height: 100
  - chain: BTC
    rpc-host: "http://localhost:18443"
    rpc-user: "user"
    rpc-password: "pass"
"#;
        let config: BifrostConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.chains.len(), 2);
        assert_eq!(config.chains[0].chain, Chain::bnb());
        assert_eq!(config.chains[0].scanner.start_block_height, 100);
        // defaults fill in
        assert_eq!(config.chains[0].scanner.block_scan_processors, 4);
        assert_eq!(config.chains[1].rpc_user, "user");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_chains() {
        let raw = r#"
thorchain:
  rest-url: "http://localhost:1317"
  node-address: "thor1node"
chains: []
"#;
        let config: BifrostConfig = serde_yaml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
