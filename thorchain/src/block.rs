// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The block lifecycle: everything the consensus engine drives, in order.
//! Begin-block opens the outbound list, deliver applies observation
//! messages, end-block runs the swap queue, vault migration, both slashing
//! vectors, gas settlement and the stale-event sweep.

use crate::event_manager::EventManager;
use crate::gas::GasManager;
use crate::handlers::{Handlers, MsgObservedTxIn, MsgObservedTxOut};
use crate::keeper::Keeper;
use crate::slasher::Slasher;
use crate::swap_queue::SwapQueue;
use crate::txout_store::TxOutStore;
use crate::vault_manager::VaultManager;
use crate::ThorResult;
use tracing::error;

/// Network constants the handlers read each block.
#[derive(Debug, Clone, Copy)]
pub struct ConstantValues {
    /// Flat network fee per outbound, denominated in RUNE.
    pub transaction_fee: u64,
    /// Blocks an outbound may sit unsigned before its signers are slashed.
    pub signing_timeout: i64,
    /// Cadence (in blocks) of migration outbounds from retiring vaults.
    pub migrate_interval: i64,
    /// Blocks a pending event may age before it is force-failed.
    pub pending_event_max_age: i64,
}

impl Default for ConstantValues {
    fn default() -> Self {
        ConstantValues {
            transaction_fee: 100_000_000,
            signing_timeout: 300,
            migrate_interval: 360,
            pending_event_max_age: 1440,
        }
    }
}

/// The ledger-side state machine, owned by the single-threaded block
/// handler. No intra-block parallelism; the outbound store's internal mutex
/// covers concurrent appends from nested handlers.
pub struct StateMachine {
    pub keeper: Keeper,
    pub txout_store: TxOutStore,
    pub event_mgr: EventManager,
    pub swap_queue: SwapQueue,
    pub gas_mgr: GasManager,
    pub slasher: Slasher,
    pub vault_mgr: VaultManager,
    pub constants: ConstantValues,
}

impl StateMachine {
    pub fn new(constants: ConstantValues) -> Self {
        StateMachine {
            keeper: Keeper::new(),
            txout_store: TxOutStore::new(),
            event_mgr: EventManager::new(),
            swap_queue: SwapQueue::new(),
            gas_mgr: GasManager::new(),
            slasher: Slasher::new(),
            vault_mgr: VaultManager::new(),
            constants,
        }
    }

    pub fn handlers(&self) -> Handlers<'_> {
        Handlers {
            keeper: &self.keeper,
            txout_store: &self.txout_store,
            event_mgr: &self.event_mgr,
            swap_queue: &self.swap_queue,
            gas_mgr: &self.gas_mgr,
            slasher: &self.slasher,
        }
    }

    /// Open a new block: the previous block's outbound list seals here.
    pub fn begin_block(&self, height: i64) {
        self.txout_store
            .new_block(height, self.constants.transaction_fee);
        self.gas_mgr.begin_block();
    }

    pub fn deliver_observed_tx_in(&self, msg: &MsgObservedTxIn, height: i64) -> ThorResult<()> {
        self.handlers().handle_observed_tx_in(msg, height)
    }

    pub fn deliver_observed_tx_out(&self, msg: &MsgObservedTxOut, height: i64) -> ThorResult<()> {
        self.handlers().handle_observed_tx_out(msg, height)
    }

    /// End-of-block processing, in the order the components depend on each
    /// other: swaps enqueue outbounds, migrations enqueue outbounds, then
    /// the slashers judge what is still outstanding, then gas settles.
    pub fn end_block(&self, height: i64) -> ThorResult<()> {
        self.swap_queue
            .end_block(&self.keeper, &self.txout_store, &self.event_mgr, height)?;
        self.vault_mgr.end_block(
            &self.keeper,
            &self.txout_store,
            &self.event_mgr,
            height,
            self.constants.migrate_interval,
        )?;
        self.slasher.lack_of_observing(&self.keeper)?;
        self.slasher.lack_of_signing(
            &self.keeper,
            &self.txout_store,
            self.constants.signing_timeout,
            height,
        )?;
        self.gas_mgr
            .end_block(&self.keeper, &self.event_mgr, height)?;

        match self.event_mgr.sweep_stale_pending(
            &self.keeper,
            height,
            self.constants.pending_event_max_age,
        ) {
            Ok(_) => {}
            Err(e) => error!(height, error = %e, "fail to sweep stale pending events"),
        }
        Ok(())
    }
}
