// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Block handlers: memo-to-message dispatch for consensus inbounds, the
//! refund path, and the observation handlers for both directions.

mod observed_tx_in;
mod observed_tx_out;

pub use observed_tx_in::MsgObservedTxIn;
pub use observed_tx_out::MsgObservedTxOut;

use crate::error::{
    ThorError, ThorResult, CODE_INSUFFICIENT_FUNDS, CODE_INVALID_MEMO, CODE_SWAP_FAIL,
};
use crate::event_manager::EventManager;
use crate::gas::GasManager;
use crate::keeper::Keeper;
use crate::slasher::Slasher;
use crate::swap::MsgSwap;
use crate::swap_queue::SwapQueue;
use crate::txout_store::TxOutStore;
use bifrost_types::event::{BondType, EventBond, EventGas, EventPool, EventStake, EventUnstake, GasType};
use bifrost_types::{
    Address, Asset, Coin, Memo, ObservedTx, Pool, PoolStatus, Tx, TxOutItem, VaultStatus,
};
use tracing::{info, warn};

/// Everything a block handler needs; wired once per process by the node.
pub struct Handlers<'a> {
    pub keeper: &'a Keeper,
    pub txout_store: &'a TxOutStore,
    pub event_mgr: &'a EventManager,
    pub swap_queue: &'a SwapQueue,
    pub gas_mgr: &'a GasManager,
    pub slasher: &'a Slasher,
}

/// A consensus inbound interpreted through its memo.
#[derive(Debug, Clone)]
pub enum Msg {
    Swap(MsgSwap),
    Stake {
        asset: Asset,
        staker: Address,
        tx: Tx,
    },
    Withdraw {
        asset: Asset,
        basis_points: u64,
        tx: Tx,
    },
    Add {
        asset: Asset,
        tx: Tx,
    },
    CreatePool {
        asset: Asset,
        tx: Tx,
    },
    Bond {
        node_address: Address,
        tx: Tx,
    },
    Leave {
        tx: Tx,
    },
    Reserve {
        tx: Tx,
    },
    GasTopup {
        tx: Tx,
    },
    /// Internal transfers (migrate, yggdrasil funding/return, ragnarok)
    /// only move vault balances; the credit already happened when the
    /// inbound was applied.
    Noop,
    /// Outbound-typed memos arriving as inbounds are never legitimate.
    Unauthorized,
}

/// Interpret a consensus inbound. Errors carry the refund code and reason.
pub fn process_one_tx_in(tx: &ObservedTx, signer: &str) -> Result<Msg, (u32, String)> {
    let memo: Memo = tx
        .tx
        .memo
        .parse()
        .map_err(|e| (CODE_INVALID_MEMO, format!("invalid memo: {e}")))?;

    let msg = match memo {
        Memo::Swap {
            asset,
            destination,
            slip_limit,
        } => {
            let destination = destination.unwrap_or_else(|| tx.tx.from_address.clone());
            if tx.tx.coins.is_empty() {
                return Err((CODE_SWAP_FAIL, "no coins to swap".to_string()));
            }
            Msg::Swap(MsgSwap {
                tx: tx.tx.clone(),
                target_asset: asset,
                destination,
                trade_target: slip_limit,
                signer: signer.to_string(),
            })
        }
        Memo::Stake {
            asset,
            cross_chain_address,
        } => Msg::Stake {
            staker: cross_chain_address.unwrap_or_else(|| tx.tx.from_address.clone()),
            asset,
            tx: tx.tx.clone(),
        },
        Memo::Withdraw {
            asset,
            basis_points,
        } => Msg::Withdraw {
            asset,
            basis_points: basis_points.unwrap_or(bifrost_types::memo::MAX_BASIS_POINTS),
            tx: tx.tx.clone(),
        },
        Memo::Add { asset } => Msg::Add {
            asset,
            tx: tx.tx.clone(),
        },
        Memo::Create { asset } => Msg::CreatePool {
            asset,
            tx: tx.tx.clone(),
        },
        Memo::Bond { node_address } => Msg::Bond {
            node_address,
            tx: tx.tx.clone(),
        },
        Memo::Leave => Msg::Leave { tx: tx.tx.clone() },
        Memo::Reserve => Msg::Reserve { tx: tx.tx.clone() },
        Memo::Gas => Msg::GasTopup { tx: tx.tx.clone() },
        Memo::Admin { ref key, ref value } => {
            info!(key = %key, value = %value, "ignoring admin memo from non-admin path");
            Msg::Noop
        }
        Memo::Migrate { .. }
        | Memo::YggdrasilFund { .. }
        | Memo::YggdrasilReturn { .. }
        | Memo::Ragnarok => Msg::Noop,
        Memo::Outbound { .. } | Memo::Refund { .. } => Msg::Unauthorized,
    };
    Ok(msg)
}

impl<'a> Handlers<'a> {
    /// A vault is current while it has not been fully retired.
    pub(crate) fn is_current_vault(&self, pk: &bifrost_types::PubKey) -> bool {
        match self.keeper.get_vault(pk) {
            Ok(vault) => vault.status != VaultStatus::Inactive,
            Err(_) => false,
        }
    }

    /// Refund an inbound: one outbound per refundable coin back to the
    /// sender, plus a pending refund event carrying the reason. Coins with
    /// no pool (and no RUNE ticker) cannot be priced and stay in the vault.
    pub fn refund_tx(
        &self,
        tx: &ObservedTx,
        height: i64,
        code: u32,
        reason: &str,
    ) -> ThorResult<()> {
        info!(tx_id = %tx.tx.id, code, reason, "refunding inbound");
        self.event_mgr
            .emit_refund_event(self.keeper, height, tx.tx.clone(), code, reason)?;

        for coin in tx.tx.coins.iter() {
            if coin.amount == 0 {
                continue;
            }
            if !coin.asset.is_rune() && !self.keeper.pool_exists(&coin.asset) {
                warn!(asset = %coin.asset, "cannot refund un-pooled asset");
                continue;
            }
            let mut toi = TxOutItem::new(
                tx.tx.chain.clone(),
                tx.tx.from_address.clone(),
                coin.clone(),
                tx.tx.id.clone(),
            );
            toi.vault_pub_key = tx.observed_pub_key.clone();
            toi.memo = Memo::Refund {
                in_hash: tx.tx.id.clone(),
            }
            .to_string();
            self.txout_store
                .try_add_tx_out_item(self.keeper, self.event_mgr, toi)?;
        }
        Ok(())
    }

    /// Execute an interpreted inbound message. Errors bubble up to the
    /// caller, which converts them into refunds.
    pub(crate) fn handle_msg(&self, msg: Msg, height: i64) -> ThorResult<()> {
        match msg {
            Msg::Swap(swap) => self.swap_queue.enqueue(self.keeper, swap),
            Msg::Stake { asset, staker, tx } => self.handle_stake(asset, staker, tx, height),
            Msg::Withdraw {
                asset,
                basis_points,
                tx,
            } => self.handle_withdraw(asset, basis_points, tx, height),
            Msg::Add { asset, tx } => self.handle_add(asset, tx, height),
            Msg::CreatePool { asset, tx } => self.handle_create_pool(asset, tx, height),
            Msg::Bond { node_address, tx } => self.handle_bond(node_address, tx, height),
            Msg::Leave { tx } => self.handle_leave(tx, height),
            Msg::Reserve { tx } => self.handle_reserve(tx, height),
            Msg::GasTopup { tx } => self.handle_gas_topup(tx, height),
            Msg::Noop => Ok(()),
            Msg::Unauthorized => Err(ThorError::NotAuthorized),
        }
    }

    fn handle_stake(&self, asset: Asset, staker: Address, tx: Tx, height: i64) -> ThorResult<()> {
        if asset.is_rune() {
            return Err(ThorError::InvalidMessage(
                "cannot stake the RUNE pool".to_string(),
            ));
        }
        let mut pool = self.keeper.get_pool(&asset)?;
        let rune_amount = tx.coins.amount_of(&Asset::rune());
        let asset_amount = tx.coins.amount_of(&asset);
        if rune_amount == 0 && asset_amount == 0 {
            return Err(ThorError::InvalidMessage("nothing staked".to_string()));
        }

        // units in RUNE value terms: symmetric deposits count both sides
        let units = rune_amount.saturating_add(pool.asset_value_in_rune(asset_amount));
        pool.balance_rune = pool.balance_rune.saturating_add(rune_amount);
        pool.balance_asset = pool.balance_asset.saturating_add(asset_amount);
        pool.pool_units = pool.pool_units.saturating_add(units);
        if pool.status == PoolStatus::Bootstrap && !pool.is_empty() {
            pool.status = PoolStatus::Enabled;
        }
        self.keeper.set_pool(&pool)?;

        let staker_units = self.keeper.get_staker_units(&asset, staker.as_str())?;
        self.keeper
            .set_staker_units(&asset, staker.as_str(), staker_units.saturating_add(units))?;

        self.event_mgr.emit_stake_event(
            self.keeper,
            height,
            tx,
            &EventStake {
                pool: asset,
                stake_units: units,
            },
        )?;
        Ok(())
    }

    fn handle_withdraw(
        &self,
        asset: Asset,
        basis_points: u64,
        tx: Tx,
        height: i64,
    ) -> ThorResult<()> {
        let mut pool = self.keeper.get_pool(&asset)?;
        let staker = tx.from_address.clone();
        let staker_units = self.keeper.get_staker_units(&asset, staker.as_str())?;
        if staker_units == 0 || pool.pool_units == 0 {
            return Err(ThorError::InvalidMessage(format!(
                "no stake units for {staker} in {asset}"
            )));
        }

        let withdraw_units =
            ((staker_units as u128 * basis_points as u128) / 10_000u128) as u64;
        let rune_out =
            ((pool.balance_rune as u128 * withdraw_units as u128) / pool.pool_units as u128) as u64;
        let asset_out = ((pool.balance_asset as u128 * withdraw_units as u128)
            / pool.pool_units as u128) as u64;

        pool.balance_rune = pool.balance_rune.saturating_sub(rune_out);
        pool.balance_asset = pool.balance_asset.saturating_sub(asset_out);
        pool.pool_units = pool.pool_units.saturating_sub(withdraw_units);
        self.keeper.set_pool(&pool)?;
        self.keeper.set_staker_units(
            &asset,
            staker.as_str(),
            staker_units.saturating_sub(withdraw_units),
        )?;

        self.event_mgr.emit_unstake_event(
            self.keeper,
            height,
            tx.clone(),
            &EventUnstake {
                pool: asset.clone(),
                stake_units: withdraw_units,
                basis_points,
            },
        )?;

        if rune_out > 0 {
            let rune = Asset::rune();
            let toi = TxOutItem::new(
                rune.chain.clone(),
                staker.clone(),
                Coin::new(rune, rune_out),
                tx.id.clone(),
            );
            self.txout_store
                .try_add_tx_out_item(self.keeper, self.event_mgr, toi)?;
        }
        if asset_out > 0 {
            let toi = TxOutItem::new(
                asset.chain.clone(),
                staker,
                Coin::new(asset, asset_out),
                tx.id,
            );
            self.txout_store
                .try_add_tx_out_item(self.keeper, self.event_mgr, toi)?;
        }
        Ok(())
    }

    fn handle_add(&self, asset: Asset, tx: Tx, height: i64) -> ThorResult<()> {
        let mut pool = self.keeper.get_pool(&asset)?;
        pool.balance_rune = pool
            .balance_rune
            .saturating_add(tx.coins.amount_of(&Asset::rune()));
        pool.balance_asset = pool.balance_asset.saturating_add(tx.coins.amount_of(&asset));
        self.keeper.set_pool(&pool)?;
        self.event_mgr.emit_add_event(self.keeper, height, tx, &asset)?;
        Ok(())
    }

    fn handle_create_pool(&self, asset: Asset, tx: Tx, height: i64) -> ThorResult<()> {
        if self.keeper.pool_exists(&asset) {
            return Err(ThorError::InvalidMessage(format!("pool {asset} exists")));
        }
        let pool = Pool::new(asset.clone());
        self.keeper.set_pool(&pool)?;
        self.event_mgr.emit_pool_event(
            self.keeper,
            height,
            tx.id,
            &EventPool {
                pool: asset,
                status: "Bootstrap".to_string(),
            },
        )?;
        Ok(())
    }

    fn handle_bond(&self, node_address: Address, tx: Tx, height: i64) -> ThorResult<()> {
        let bond = tx.coins.amount_of(&Asset::rune());
        if bond == 0 {
            return Err(ThorError::InvalidMessage("bond requires RUNE".to_string()));
        }
        let mut na = match self.keeper.get_node_account(node_address.as_str()) {
            Ok(na) => na,
            Err(_) => crate::node_account::NodeAccount::new(
                node_address.as_str(),
                crate::node_account::NodeStatus::Standby,
                Default::default(),
            ),
        };
        na.bond = na.bond.saturating_add(bond);
        self.keeper.set_node_account(&na)?;
        self.event_mgr.emit_bond_event(
            self.keeper,
            height,
            tx,
            &EventBond {
                amount: bond,
                bond_type: BondType::Paid,
            },
        )?;
        Ok(())
    }

    fn handle_leave(&self, tx: Tx, height: i64) -> ThorResult<()> {
        let mut na = self
            .keeper
            .get_node_account(tx.from_address.as_str())
            .map_err(|_| {
                ThorError::InvalidMessage(format!("{} is not a node operator", tx.from_address))
            })?;
        let bond = na.bond;
        na.bond = 0;
        na.status = crate::node_account::NodeStatus::Disabled;
        self.keeper.set_node_account(&na)?;

        if bond > 0 {
            let rune = Asset::rune();
            let toi = TxOutItem::new(
                rune.chain.clone(),
                tx.from_address.clone(),
                Coin::new(rune, bond),
                tx.id.clone(),
            );
            self.txout_store
                .try_add_tx_out_item(self.keeper, self.event_mgr, toi)?;
        }
        self.event_mgr.emit_bond_event(
            self.keeper,
            height,
            tx,
            &EventBond {
                amount: bond,
                bond_type: BondType::Returned,
            },
        )?;
        Ok(())
    }

    fn handle_reserve(&self, tx: Tx, height: i64) -> ThorResult<()> {
        let amount = tx.coins.amount_of(&Asset::rune());
        if amount == 0 {
            return Err(ThorError::InvalidMessage(
                "reserve contribution requires RUNE".to_string(),
            ));
        }
        self.keeper.add_fee_to_reserve(amount)?;
        self.event_mgr
            .emit_reserve_event(self.keeper, height, tx, amount)?;
        Ok(())
    }

    fn handle_gas_topup(&self, tx: Tx, height: i64) -> ThorResult<()> {
        self.event_mgr.emit_gas_event(
            self.keeper,
            height,
            &EventGas {
                gas: tx.coins.clone(),
                gas_type: GasType::Topup,
            },
        )?;
        Ok(())
    }
}

/// Map a handler error to a refund code.
pub(crate) fn refund_code(err: &ThorError) -> u32 {
    match err {
        ThorError::VaultInsufficientFunds { .. } | ThorError::EmptyVault => {
            CODE_INSUFFICIENT_FUNDS
        }
        ThorError::SwapFailed(_) => CODE_SWAP_FAIL,
        _ => CODE_INVALID_MEMO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_types::{Chain, Coins, PubKey, TxId};

    fn observed(memo: &str, coins: Vec<Coin>) -> ObservedTx {
        ObservedTx::new(
            Tx::new(
                TxId::new("IN1"),
                Chain::bnb(),
                Address::new("tbnb1sender"),
                Address::new("tbnb1vault"),
                Coins::new(coins),
                Coins::default(),
                memo,
            ),
            40,
            PubKey::new("vault-pk"),
        )
    }

    #[test]
    fn test_process_swap_defaults_destination_to_sender() {
        let tx = observed("swap:BNB.BNB", vec![Coin::new(Asset::rune(), 100)]);
        let msg = process_one_tx_in(&tx, "thor1node0").unwrap();
        match msg {
            Msg::Swap(swap) => {
                assert_eq!(swap.destination.as_str(), "tbnb1sender");
                assert_eq!(swap.target_asset, Asset::bnb());
            }
            other => panic!("expected swap, got {other:?}"),
        }
    }

    #[test]
    fn test_process_invalid_memo_yields_refund_code() {
        let tx = observed("garbage", vec![Coin::new(Asset::rune(), 100)]);
        let (code, reason) = process_one_tx_in(&tx, "thor1node0").unwrap_err();
        assert_eq!(code, CODE_INVALID_MEMO);
        assert!(reason.contains("invalid memo"));
    }

    #[test]
    fn test_outbound_memo_inbound_is_unauthorized() {
        let tx = observed("outbound:ABCD", vec![Coin::new(Asset::rune(), 100)]);
        assert!(matches!(
            process_one_tx_in(&tx, "thor1node0").unwrap(),
            Msg::Unauthorized
        ));
        let tx = observed("refund:ABCD", vec![Coin::new(Asset::rune(), 100)]);
        assert!(matches!(
            process_one_tx_in(&tx, "thor1node0").unwrap(),
            Msg::Unauthorized
        ));
    }

    #[test]
    fn test_internal_memos_are_noops() {
        for memo in ["migrate:10", "yggdrasil+:10", "yggdrasil-:10", "ragnarok"] {
            let tx = observed(memo, vec![Coin::new(Asset::bnb(), 100)]);
            assert!(
                matches!(process_one_tx_in(&tx, "thor1node0").unwrap(), Msg::Noop),
                "{memo} should be a noop"
            );
        }
    }
}
