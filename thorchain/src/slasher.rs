// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Two independent slashing vectors: failing to observe a consensus inbound,
//! and failing to sign a dispatched outbound in time. Theft slashes bond
//! directly at the stolen coins' RUNE value.

use crate::error::ThorResult;
use crate::keeper::Keeper;
use crate::txout_store::TxOutStore;
use bifrost_types::{Asset, PubKey};
use tracing::{info, warn};

/// Slash points for missing an observation the rest of the set agreed on.
pub const LACK_OF_OBSERVATION_PENALTY: u64 = 2;
/// Slash points for sitting on an outbound past the signing timeout.
pub const LACK_OF_SIGNING_PENALTY: u64 = 2;

#[derive(Debug, Default)]
pub struct Slasher;

impl Slasher {
    pub fn new() -> Self {
        Slasher
    }

    /// Monetary slash for theft: debit the owner's bond by the coin's value
    /// in RUNE.
    pub fn slash_node_account(
        &self,
        keeper: &Keeper,
        observed_pub_key: &PubKey,
        asset: &Asset,
        amount: u64,
    ) -> ThorResult<()> {
        let rune_value = if asset.is_rune() {
            amount
        } else {
            keeper.get_pool(asset)?.asset_value_in_rune(amount)
        };
        match keeper.node_account_by_pub_key(observed_pub_key)? {
            Some(mut na) => {
                na.bond = na.bond.saturating_sub(rune_value);
                warn!(
                    node = %na.node_address,
                    asset = %asset,
                    amount,
                    rune_value,
                    "slashing node bond for unauthorised outbound"
                );
                keeper.set_node_account(&na)
            }
            None => {
                warn!(pub_key = %observed_pub_key, "no node account behind slashed vault");
                Ok(())
            }
        }
    }

    /// At end of block: every active signer that did not appear in any
    /// consensus observation this block accrues slash points. Clears the
    /// per-block observing set.
    pub fn lack_of_observing(&self, keeper: &Keeper) -> ThorResult<()> {
        let observing = keeper.get_observing_addresses()?;
        if observing.is_empty() {
            // no consensus reached this block, nothing to judge against
            return Ok(());
        }
        for mut na in keeper.list_active_node_accounts()? {
            if !observing.contains(&na.node_address) {
                na.add_slash_points(LACK_OF_OBSERVATION_PENALTY);
                keeper.set_node_account(&na)?;
            }
        }
        keeper.clear_observing_addresses();
        Ok(())
    }

    /// Outbounds dispatched more than `signing_timeout` blocks ago with no
    /// observed out-hash: slash the elected signers and re-queue the item in
    /// the current block.
    pub fn lack_of_signing(
        &self,
        keeper: &Keeper,
        txout_store: &TxOutStore,
        signing_timeout: i64,
        current_height: i64,
    ) -> ThorResult<()> {
        for height in keeper.get_tx_out_heights()? {
            if current_height - height <= signing_timeout || height == current_height {
                continue;
            }
            let mut block = keeper.get_tx_out(height)?;
            let mut moved = Vec::new();
            block.tx_array.retain(|item| {
                if item.out_hash.as_str().is_empty() {
                    moved.push(item.clone());
                    false
                } else {
                    true
                }
            });
            if moved.is_empty() {
                continue;
            }
            keeper.set_tx_out(&block)?;

            for item in moved {
                info!(
                    height,
                    in_hash = %item.in_hash,
                    "outbound unsigned past timeout, slashing elected signers"
                );
                if let Ok(vault) = keeper.get_vault(&item.vault_pub_key) {
                    for member in &vault.membership {
                        if let Some(mut na) = keeper.node_account_by_pub_key(member)? {
                            na.add_slash_points(LACK_OF_SIGNING_PENALTY);
                            keeper.set_node_account(&na)?;
                        }
                    }
                }
                txout_store.unsafe_add_tx_out_item(keeper, item)?;
            }
        }
        Ok(())
    }
}
