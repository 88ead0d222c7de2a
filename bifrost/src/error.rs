// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Error taxonomy for the daemon side. Kinds, not call sites: recovery
/// policy hangs off the kind (retry, skip, halt, blame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// RPC hiccup; retry with backoff, never halt the pipeline.
    TransientRpc(String),
    /// The requested block is above the chain tip; retry silently.
    HeightUnavailable(i64),
    /// The payload can never be decoded; skip the tx and continue.
    PermanentDecode(String),
    /// TSS keysign failed naming culprits; post the blame upstream.
    KeysignBlame(Vec<String>, String),
    /// TSS keysign failed with no blame; opaque retry, no slashing.
    KeysignOpaque(String),
    /// The broadcast tx is already in the chain; treat as success.
    AlreadyOnChain,
    /// Local persistence failure; the scanner halts on these.
    Storage(String),
    /// Ledger REST error.
    Ledger(String),
    /// Address failed chain-specific validation.
    InvalidAddress(String),
    /// No adapter registered for the chain.
    UnknownChain(String),
    Generic(String),
}

impl ChainError {
    /// Short stable label for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ChainError::TransientRpc(_) => "transient_rpc",
            ChainError::HeightUnavailable(_) => "height_unavailable",
            ChainError::PermanentDecode(_) => "permanent_decode",
            ChainError::KeysignBlame(_, _) => "keysign_blame",
            ChainError::KeysignOpaque(_) => "keysign_opaque",
            ChainError::AlreadyOnChain => "already_on_chain",
            ChainError::Storage(_) => "storage",
            ChainError::Ledger(_) => "ledger",
            ChainError::InvalidAddress(_) => "invalid_address",
            ChainError::UnknownChain(_) => "unknown_chain",
            ChainError::Generic(_) => "generic",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::TransientRpc(_)
                | ChainError::HeightUnavailable(_)
                | ChainError::Ledger(_)
                | ChainError::KeysignOpaque(_)
        )
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::TransientRpc(msg) => write!(f, "transient rpc error: {msg}"),
            ChainError::HeightUnavailable(h) => {
                write!(f, "height {h} is above the current chain height")
            }
            ChainError::PermanentDecode(msg) => write!(f, "decode error: {msg}"),
            ChainError::KeysignBlame(nodes, reason) => {
                write!(f, "keysign failed ({reason}), blaming {nodes:?}")
            }
            ChainError::KeysignOpaque(reason) => write!(f, "keysign failed: {reason}"),
            ChainError::AlreadyOnChain => write!(f, "tx already in chain"),
            ChainError::Storage(msg) => write!(f, "storage error: {msg}"),
            ChainError::Ledger(msg) => write!(f, "ledger error: {msg}"),
            ChainError::InvalidAddress(msg) => write!(f, "invalid address: {msg}"),
            ChainError::UnknownChain(chain) => write!(f, "no adapter for chain {chain}"),
            ChainError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        ChainError::TransientRpc(e.to_string())
    }
}

impl From<sled::Error> for ChainError {
    fn from(e: sled::Error) -> Self {
        ChainError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        ChainError::PermanentDecode(e.to_string())
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
