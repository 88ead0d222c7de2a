// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use bifrost_types::TypeError;

/// Refund reason codes carried on refund events.
pub const CODE_OK: u32 = 0;
pub const CODE_INVALID_VAULT: u32 = 101;
pub const CODE_EMPTY_CHAIN: u32 = 102;
pub const CODE_INVALID_MEMO: u32 = 105;
pub const CODE_INSUFFICIENT_FUNDS: u32 = 107;
pub const CODE_SWAP_FAIL: u32 = 108;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThorError {
    /// No vault can cover the requested outbound. The caller must convert
    /// this into a refund of the originating inbound.
    #[error("vault does not have enough funds: has {held}, requires {needed}")]
    VaultInsufficientFunds { held: u64, needed: u64 },

    #[error("no active vault can send out funds")]
    EmptyVault,

    #[error("{0} not found")]
    NotFound(String),

    #[error("message not signed by an active observer")]
    NotAuthorized,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("swap failed: {0}")]
    SwapFailed(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Types(#[from] TypeError),
}

pub type ThorResult<T> = Result<T, ThorError>;
