// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ledger-side state machine pieces: the keeper (ordered key-value store),
//! the byzantine-tolerant observation voter, the outbound dispatch store,
//! event accounting, the end-of-block swap queue, slashing and the vault
//! lifecycle manager.
//!
//! Everything here runs inside the single-threaded block handler driven by
//! the ledger's consensus engine; the only internal lock is the outbound
//! store's block-list mutex, because several handlers may append outbounds
//! within one block.

pub mod block;
pub mod error;
pub mod event_manager;
pub mod gas;
pub mod handlers;
pub mod keeper;
pub mod node_account;
pub mod slasher;
pub mod swap;
pub mod swap_queue;
pub mod txout_store;
pub mod vault_manager;
pub mod voter;

pub use block::{ConstantValues, StateMachine};
pub use error::{ThorError, ThorResult};
pub use event_manager::EventManager;
pub use keeper::Keeper;
pub use node_account::{NodeAccount, NodeStatus};
pub use txout_store::TxOutStore;
pub use voter::ObservedTxVoter;
