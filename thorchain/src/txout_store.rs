// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Block-bucketed outbound dispatch: vault selection, transaction fee
//! deduction and the sealed per-block outbound list.

use crate::error::{ThorError, ThorResult};
use crate::event_manager::EventManager;
use crate::keeper::Keeper;
use bifrost_types::{
    Asset, Coin, Coins, Fee, Memo, ObservedTx, TxId, TxOut, TxOutItem, VaultStatus, Vaults,
};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct BlockCtx {
    height: i64,
    transaction_fee: u64,
}

/// Manages all outgoing transactions for the block being processed.
///
/// Multiple ledger handlers may append within one block, so the
/// read-modify-write of the block-out list is serialised by a mutex.
pub struct TxOutStore {
    ctx: Mutex<BlockCtx>,
    block_out_lock: Mutex<()>,
}

impl Default for TxOutStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TxOutStore {
    pub fn new() -> Self {
        TxOutStore {
            ctx: Mutex::new(BlockCtx {
                height: 0,
                transaction_fee: 0,
            }),
            block_out_lock: Mutex::new(()),
        }
    }

    /// Start a new block. The outbound list of the previous block is sealed:
    /// all later appends land in the new height.
    pub fn new_block(&self, height: i64, transaction_fee: u64) {
        let mut ctx = self.ctx.lock().expect("txout ctx lock poisoned");
        ctx.height = height;
        ctx.transaction_fee = transaction_fee;
    }

    fn block_ctx(&self) -> BlockCtx {
        *self.ctx.lock().expect("txout ctx lock poisoned")
    }

    pub fn height(&self) -> i64 {
        self.block_ctx().height
    }

    pub fn get_block_out(&self, keeper: &Keeper) -> ThorResult<TxOut> {
        keeper.get_tx_out(self.block_ctx().height)
    }

    pub fn get_outbound_items(&self, keeper: &Keeper) -> ThorResult<Vec<TxOutItem>> {
        Ok(self.get_block_out(keeper)?.tx_array)
    }

    /// Add an outbound to the current block, selecting a paying vault and
    /// deducting the network fee. Returns `Ok(false)` for silently dropped
    /// items (self-sends, empty coins); `VaultInsufficientFunds` is an error
    /// the caller must turn into a refund.
    pub fn try_add_tx_out_item(
        &self,
        keeper: &Keeper,
        event_mgr: &EventManager,
        toi: TxOutItem,
    ) -> ThorResult<bool> {
        let toi = match self.prepare_tx_out_item(keeper, event_mgr, toi)? {
            Some(toi) => toi,
            None => return Ok(false),
        };
        self.add_to_block_out(keeper, toi)?;
        Ok(true)
    }

    /// Blindly add an outbound, skipping vault selection and fee deduction.
    /// Used for vault-internal moves whose parameters are already decided.
    pub fn unsafe_add_tx_out_item(&self, keeper: &Keeper, toi: TxOutItem) -> ThorResult<()> {
        self.add_to_block_out(keeper, toi)
    }

    fn prepare_tx_out_item(
        &self,
        keeper: &Keeper,
        event_mgr: &EventManager,
        mut toi: TxOutItem,
    ) -> ThorResult<Option<TxOutItem>> {
        let BlockCtx {
            height: _,
            transaction_fee,
        } = self.block_ctx();

        if toi.memo.is_empty() {
            toi.memo = Memo::outbound(toi.in_hash.clone()).to_string();
        }

        // No vault picked yet: prefer a Yggdrasil float that observed the
        // inbound, fall back to the deepest Asgard.
        if toi.vault_pub_key.is_empty() {
            let actives = keeper.list_active_node_accounts()?;
            if !actives.is_empty() {
                let voter = keeper.get_observed_tx_voter(&toi.in_hash)?;
                if let Some(tx) = voter.get_tx(&actives) {
                    let yggs =
                        self.collect_yggdrasil_vaults(keeper, tx, &toi.chain.gas_asset())?;
                    if let Some(vault) = yggs.select_by_max_coin(&toi.coin.asset) {
                        if vault.balance_of(&toi.coin.asset) >= toi.coin.amount {
                            toi.vault_pub_key = vault.pub_key.clone();
                        }
                    }
                }
            }
        }

        if toi.vault_pub_key.is_empty() {
            let active = keeper.get_asgard_vaults_by_status(VaultStatus::Active)?;
            let vault = active
                .select_by_max_coin(&toi.coin.asset)
                .ok_or(ThorError::EmptyVault)?;
            let held = vault.balance_of(&toi.coin.asset);
            if toi.coin.amount > held {
                return Err(ThorError::VaultInsufficientFunds {
                    held,
                    needed: toi.coin.amount,
                });
            }
            toi.vault_pub_key = vault.pub_key.clone();
        }

        if toi.in_hash.as_str().is_empty() {
            toi.in_hash = TxId::blank();
        }

        // Never send from a vault to itself.
        let from_addr = toi.vault_pub_key.chain_address(&toi.chain);
        if from_addr.is_empty() || toi.to_address == from_addr {
            debug!(to = %toi.to_address, "dropping self-send outbound");
            return Ok(None);
        }

        let memo = toi.memo.parse::<Memo>();
        let fee_exempt = memo.as_ref().map(Memo::is_fee_exempt).unwrap_or(true);
        if !fee_exempt {
            if toi.coin.asset.is_rune() {
                let rune_fee = toi.coin.amount.min(transaction_fee);
                toi.coin.amount -= rune_fee;
                let fee = Fee::new(Coins::one(Coin::new(toi.coin.asset.clone(), rune_fee)), 0);
                event_mgr.update_event_fee(keeper, &toi.in_hash, &fee)?;
                keeper.add_fee_to_reserve(rune_fee)?;
            } else {
                let mut pool = keeper.get_pool(&toi.coin.asset)?;
                // translate the RUNE-denominated fee into the asset
                let mut asset_fee = pool.rune_value_in_asset(transaction_fee);
                let rune_fee = if toi.coin.amount <= asset_fee {
                    asset_fee = toi.coin.amount;
                    pool.asset_value_in_rune(asset_fee)
                } else {
                    transaction_fee
                };
                toi.coin.amount -= asset_fee;
                pool.balance_asset = pool.balance_asset.saturating_add(asset_fee);
                // the pool may lack RUNE to fully cover; the rest is absorbed
                let pool_deduct = rune_fee.min(pool.balance_rune);
                pool.balance_rune = pool.balance_rune.saturating_sub(rune_fee);
                let fee = Fee::new(
                    Coins::one(Coin::new(toi.coin.asset.clone(), asset_fee)),
                    pool_deduct,
                );
                event_mgr.update_event_fee(keeper, &toi.in_hash, &fee)?;
                keeper.set_pool(&pool)?;
                keeper.add_fee_to_reserve(rune_fee)?;
            }
        }

        // A yggdrasil-return outbound deliberately carries an empty coin;
        // the signer fills it from the on-chain account at sign time.
        let is_ygg_return = memo.as_ref().map(Memo::is_yggdrasil_return).unwrap_or(false);
        if toi.coin.is_empty() && !is_ygg_return {
            info!(memo = %toi.memo, "tx out item has zero coin");
            return Ok(None);
        }

        let mut voter = keeper.get_observed_tx_voter(&toi.in_hash)?;
        voter.add_action(toi.clone());
        keeper.set_observed_tx_voter(&voter)?;

        Ok(Some(toi))
    }

    fn add_to_block_out(&self, keeper: &Keeper, toi: TxOutItem) -> ThorResult<()> {
        let _guard = self.block_out_lock.lock().expect("block out lock poisoned");
        keeper.append_tx_out(self.block_ctx().height, &toi)
    }

    /// Yggdrasil vaults eligible to pay an outbound: they hold the gas asset
    /// of the destination chain, their owner signed the consensus inbound,
    /// and their balance is reduced by every outbound already queued against
    /// them in this block (the in-memory view, not persisted state).
    pub fn collect_yggdrasil_vaults(
        &self,
        keeper: &Keeper,
        tx: &ObservedTx,
        gas_asset: &Asset,
    ) -> ThorResult<Vaults> {
        let block = self.get_block_out(keeper)?;
        let mut vaults = Vec::new();
        for vault in keeper.get_vaults()?.iter() {
            if !vault.is_yggdrasil() {
                continue;
            }
            // without the destination chain's gas asset it cannot pay the
            // transaction fee
            if !vault.has_asset(gas_asset) {
                continue;
            }
            // liveness proxy: only floats whose owner observed the inbound
            let owner = match keeper.node_account_by_pub_key(&vault.pub_key)? {
                Some(na) => na,
                None => continue,
            };
            if !tx.has_signed(&owner.node_address) {
                continue;
            }
            let mut vault = vault.clone();
            let vault_pub_key = vault.pub_key.clone();
            for queued in block
                .tx_array
                .iter()
                .filter(|t| t.vault_pub_key == vault_pub_key)
            {
                vault.sub_funds_saturating(&Coins::one(queued.coin.clone()));
            }
            vaults.push(vault);
        }
        if vaults.is_empty() {
            debug!("no yggdrasil candidate for outbound");
        } else {
            debug!(candidates = vaults.len(), "collected yggdrasil candidates");
        }
        Ok(Vaults::new(vaults))
    }
}
