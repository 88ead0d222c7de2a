// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Outbound observation handler: confirms dispatched outbounds exactly once,
//! debits the paying vault, settles gas, completes the pending events, and
//! treats unauthorised Yggdrasil spends as theft.

use super::Handlers;
use crate::error::{ThorError, ThorResult};
use crate::node_account::NodeAccount;
use crate::voter::ObservedTxVoter;
use bifrost_types::{EventStatus, Memo, ObservedTx, TxId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One node's batch of outbound observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgObservedTxOut {
    pub txs: Vec<ObservedTx>,
    pub signer: String,
}

impl<'a> Handlers<'a> {
    fn preflight_out(
        &self,
        mut voter: ObservedTxVoter,
        actives: &[NodeAccount],
        tx: &ObservedTx,
        signer: &str,
        height: i64,
    ) -> ThorResult<(ObservedTxVoter, bool)> {
        voter.add(tx.clone(), signer);
        let mut ok = false;
        // an outbound is processed exactly once, no matter how many further
        // confirmations arrive
        if voter.has_consensus(actives) && !voter.processed_out {
            ok = true;
            voter.height = height;
            voter.processed_out = true;
        }
        self.keeper.set_observed_tx_voter(&voter)?;
        Ok((voter, ok))
    }

    /// The memo of an observed outbound can be missing on chains that do not
    /// carry one reliably; recover it from the dispatched item it matches.
    fn fetch_memo(&self, tx: &ObservedTx) -> ThorResult<Option<String>> {
        for height in self.keeper.get_tx_out_heights()? {
            let block = self.keeper.get_tx_out(height)?;
            for item in &block.tx_array {
                if item.out_hash.as_str().is_empty()
                    && item.chain == tx.tx.chain
                    && item.to_address == tx.tx.to_address
                    && tx.tx.coins.amount_of(&item.coin.asset) == item.coin.amount
                {
                    return Ok(Some(item.memo.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Stamp the dispatched item this observation fulfils, so the signing
    /// slasher stops counting it. Also stamps the matching voter action.
    fn mark_outbound_complete(&self, in_hash: &TxId, tx: &ObservedTx) -> ThorResult<()> {
        'blocks: for height in self.keeper.get_tx_out_heights()? {
            let mut block = self.keeper.get_tx_out(height)?;
            for item in block.tx_array.iter_mut() {
                if item.in_hash == *in_hash
                    && item.out_hash.as_str().is_empty()
                    && item.chain == tx.tx.chain
                {
                    item.out_hash = tx.tx.id.clone();
                    self.keeper.set_tx_out(&block)?;
                    break 'blocks;
                }
            }
        }
        let mut voter = self.keeper.get_observed_tx_voter(in_hash)?;
        for action in voter.actions.iter_mut() {
            if action.out_hash.as_str().is_empty() && action.chain == tx.tx.chain {
                action.out_hash = tx.tx.id.clone();
                break;
            }
        }
        self.keeper.set_observed_tx_voter(&voter)
    }

    pub fn handle_observed_tx_out(&self, msg: &MsgObservedTxOut, height: i64) -> ThorResult<()> {
        let actives = self.keeper.list_active_node_accounts()?;
        if !actives.iter().any(|na| na.node_address == msg.signer) {
            return Err(ThorError::NotAuthorized);
        }

        for tx in &msg.txs {
            let mut tx = tx.clone();
            if tx.tx.memo.is_empty() {
                if let Some(memo) = self.fetch_memo(&tx)? {
                    tx.tx.memo = memo;
                }
            }

            if !self.keeper.vault_exists(&tx.observed_pub_key) {
                info!(pub_key = %tx.observed_pub_key, "outbound from unknown vault, skipping");
                continue;
            }

            let voter = self.keeper.get_observed_tx_voter(&tx.tx.id)?;
            let (voter, ok) = self.preflight_out(voter, &actives, &tx, &msg.signer, height)?;
            if !ok {
                if voter.height == height {
                    // already processed this block; still credit the observer
                    self.keeper
                        .add_observing_addresses(&[msg.signer.clone()])?;
                }
                continue;
            }
            info!(tx_id = %tx.tx.id, memo = %tx.tx.memo, "outbound reached consensus");

            // an empty or inbound-typed memo on funds moving out of a
            // yggdrasil float is theft
            let memo = tx.tx.memo.parse::<Memo>();
            let is_theft_shape = match &memo {
                Err(_) => true,
                Ok(m) => m.is_inbound(),
            };
            if is_theft_shape {
                let mut vault = self.keeper.get_vault(&tx.observed_pub_key)?;
                if vault.is_yggdrasil() {
                    warn!(vault = %vault.pub_key, tx_id = %tx.tx.id, "yggdrasil theft detected");
                    for coin in tx.tx.coins.iter().chain(tx.tx.gas.iter()) {
                        self.slasher.slash_node_account(
                            self.keeper,
                            &tx.observed_pub_key,
                            &coin.asset,
                            coin.amount,
                        )?;
                    }
                    vault.sub_funds_saturating(&tx.tx.coins);
                    // gas is not subsidised when it is theft
                    vault.sub_funds_saturating(&tx.tx.gas);
                    self.keeper.set_vault(&vault)?;
                } else {
                    warn!(tx_id = %tx.tx.id, memo = %tx.tx.memo, "unparseable outbound from non-yggdrasil vault");
                }
                continue;
            }
            let memo = memo.expect("checked above");

            // normal outbound gas is settled against the pools at end of
            // block, subsidised from the reserve
            self.gas_mgr.add_gas(&tx.tx.gas);

            let consensus = voter
                .get_tx(&actives)
                .cloned()
                .expect("consensus shape exists after preflight");

            let mut vault = self.keeper.get_vault(&tx.observed_pub_key)?;
            if let Err(e) = vault.sub_funds(&consensus.tx.coins) {
                // the funds left on-chain regardless; keep the record honest
                warn!(vault = %vault.pub_key, error = %e, "outbound exceeds recorded balance");
                vault.sub_funds_saturating(&consensus.tx.coins);
            }
            vault.sub_funds_saturating(&consensus.tx.gas);
            vault.outbound_tx_count += 1;
            if vault.is_asgard() && memo.is_migrate() {
                vault.remove_pending_tx_block_height(memo.block_height());
            }
            self.keeper.set_vault(&vault)?;

            self.keeper.add_observing_addresses(&consensus.signers)?;
            self.keeper
                .set_last_signed_out_height(&tx.tx.chain, tx.block_height)?;

            match memo {
                Memo::Outbound { in_hash } => {
                    self.mark_outbound_complete(&in_hash, &tx)?;
                    self.event_mgr.complete_events(
                        self.keeper,
                        height,
                        &in_hash,
                        vec![consensus.tx.clone()],
                        EventStatus::Success,
                    )?;
                }
                Memo::Refund { in_hash } => {
                    self.mark_outbound_complete(&in_hash, &tx)?;
                    self.event_mgr.complete_events(
                        self.keeper,
                        height,
                        &in_hash,
                        vec![consensus.tx.clone()],
                        EventStatus::Refund,
                    )?;
                }
                // internal moves have no event lifecycle
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_manager::EventManager;
    use crate::gas::GasManager;
    use crate::keeper::Keeper;
    use crate::node_account::NodeStatus;
    use crate::slasher::Slasher;
    use crate::swap_queue::SwapQueue;
    use crate::txout_store::TxOutStore;
    use bifrost_types::event::EventSwap;
    use bifrost_types::{
        Address, Asset, Chain, Coin, Coins, PubKey, PubKeySet, Tx, TxOutItem, Vault, VaultType,
        ONE,
    };

    struct Fixture {
        keeper: Keeper,
        txout_store: TxOutStore,
        event_mgr: EventManager,
        swap_queue: SwapQueue,
        gas_mgr: GasManager,
        slasher: Slasher,
    }

    impl Fixture {
        fn new(actives: usize) -> Self {
            let keeper = Keeper::new();
            for i in 0..actives {
                let na = NodeAccount::new(
                    &format!("thor1node{i}"),
                    NodeStatus::Active,
                    PubKeySet::new(
                        PubKey::new(&format!("pk{i}")),
                        PubKey::new(&format!("pk{i}")),
                    ),
                );
                keeper.set_node_account(&na).unwrap();
            }
            let txout_store = TxOutStore::new();
            txout_store.new_block(20, 2_000_000);
            Fixture {
                keeper,
                txout_store,
                event_mgr: EventManager::new(),
                swap_queue: SwapQueue::new(),
                gas_mgr: GasManager::new(),
                slasher: Slasher::new(),
            }
        }

        fn handlers(&self) -> Handlers<'_> {
            Handlers {
                keeper: &self.keeper,
                txout_store: &self.txout_store,
                event_mgr: &self.event_mgr,
                swap_queue: &self.swap_queue,
                gas_mgr: &self.gas_mgr,
                slasher: &self.slasher,
            }
        }
    }

    fn outbound_observation(memo: &str, vault_pk: &str, coins: Vec<Coin>, gas: Vec<Coin>) -> ObservedTx {
        ObservedTx::new(
            Tx::new(
                TxId::new("OUT1"),
                Chain::bnb(),
                Address::new("tbnb1vaultaddr"),
                Address::new("tbnb1user"),
                Coins::new(coins),
                Coins::new(gas),
                memo,
            ),
            88,
            PubKey::new(vault_pk),
        )
    }

    fn observe(fx: &Fixture, tx: &ObservedTx, signers: &[&str]) {
        for signer in signers {
            let msg = MsgObservedTxOut {
                txs: vec![tx.clone()],
                signer: signer.to_string(),
            };
            fx.handlers().handle_observed_tx_out(&msg, 20).unwrap();
        }
    }

    #[test]
    fn test_outbound_completes_event_and_debits_vault() {
        let fx = Fixture::new(4);
        let mut vault = Vault::new(
            PubKey::new("asgard-pk"),
            VaultType::Asgard,
            vec![PubKey::new("pk0")],
        );
        vault.add_funds(&Coins::new(vec![
            Coin::new(Asset::rune(), 100 * ONE),
            Coin::new(Asset::bnb(), 10 * ONE),
        ]));
        fx.keeper.set_vault(&vault).unwrap();

        // a pending swap event awaiting its outbound
        fx.event_mgr
            .emit_swap_event(
                &fx.keeper,
                18,
                Tx {
                    id: TxId::new("IN1"),
                    ..Tx::default()
                },
                &EventSwap {
                    pool: Asset::bnb(),
                    price_target: 0,
                    trade_slip: 0,
                    liquidity_fee: 0,
                },
            )
            .unwrap();

        // and the dispatched item it answers
        let mut toi = TxOutItem::new(
            Chain::bnb(),
            Address::new("tbnb1user"),
            Coin::new(Asset::rune(), 5 * ONE),
            TxId::new("IN1"),
        );
        toi.vault_pub_key = PubKey::new("asgard-pk");
        toi.memo = "outbound:IN1".to_string();
        fx.txout_store.unsafe_add_tx_out_item(&fx.keeper, toi).unwrap();

        let observed = outbound_observation(
            "outbound:IN1",
            "asgard-pk",
            vec![Coin::new(Asset::rune(), 5 * ONE)],
            vec![Coin::new(Asset::bnb(), 37500)],
        );
        observe(&fx, &observed, &["thor1node0", "thor1node1", "thor1node2"]);

        // the vault lost the coins and the gas
        let vault = fx.keeper.get_vault(&PubKey::new("asgard-pk")).unwrap();
        assert_eq!(vault.balance_of(&Asset::rune()), 95 * ONE);
        assert_eq!(vault.balance_of(&Asset::bnb()), 10 * ONE - 37500);
        assert_eq!(vault.outbound_tx_count, 1);

        // the pending swap event completed
        assert!(fx.keeper.get_all_pending_events().unwrap().is_empty());
        let event = fx.keeper.get_event(1).unwrap();
        assert_eq!(event.status, EventStatus::Success);
        assert_eq!(event.out_txs.len(), 1);

        // the dispatched item is stamped, so the slasher will not touch it
        let block = fx.keeper.get_tx_out(20).unwrap();
        assert_eq!(block.tx_array[0].out_hash, TxId::new("OUT1"));

        // and the voter only processes the outbound once
        let voter = fx.keeper.get_observed_tx_voter(&TxId::new("OUT1")).unwrap();
        assert!(voter.processed_out);
        assert_eq!(vault.outbound_tx_count, 1);
    }

    #[test]
    fn test_further_confirmations_do_not_reprocess() {
        let fx = Fixture::new(4);
        let mut vault = Vault::new(
            PubKey::new("asgard-pk"),
            VaultType::Asgard,
            vec![PubKey::new("pk0")],
        );
        vault.add_funds(&Coins::one(Coin::new(Asset::rune(), 100 * ONE)));
        fx.keeper.set_vault(&vault).unwrap();

        let observed = outbound_observation(
            "outbound:IN1",
            "asgard-pk",
            vec![Coin::new(Asset::rune(), 5 * ONE)],
            vec![],
        );
        observe(
            &fx,
            &observed,
            &["thor1node0", "thor1node1", "thor1node2", "thor1node3"],
        );
        let vault = fx.keeper.get_vault(&PubKey::new("asgard-pk")).unwrap();
        // a single debit despite four observations
        assert_eq!(vault.balance_of(&Asset::rune()), 95 * ONE);
        assert_eq!(vault.outbound_tx_count, 1);
    }

    #[test]
    fn test_yggdrasil_theft_slashes_and_debits() {
        let fx = Fixture::new(4);
        // the thief's node account, bonded
        let mut na = NodeAccount::new(
            "thor1thief",
            NodeStatus::Active,
            PubKeySet::new(PubKey::new("ygg-pk"), PubKey::new("ygg-pk")),
        );
        na.bond = 1000 * ONE;
        fx.keeper.set_node_account(&na).unwrap();

        let mut ygg = Vault::new(
            PubKey::new("ygg-pk"),
            VaultType::Yggdrasil,
            vec![PubKey::new("ygg-pk")],
        );
        ygg.add_funds(&Coins::new(vec![Coin::new(Asset::bnb(), 10 * ONE)]));
        fx.keeper.set_vault(&ygg).unwrap();

        // 2 RUNE per BNB pool pricing for the slash valuation
        let mut pool = fx.keeper.get_pool(&Asset::bnb()).unwrap();
        pool.balance_rune = 200 * ONE;
        pool.balance_asset = 100 * ONE;
        fx.keeper.set_pool(&pool).unwrap();

        // funds move out of the float with an inbound-typed memo
        let observed = outbound_observation(
            "stake:BNB.BNB",
            "ygg-pk",
            vec![Coin::new(Asset::bnb(), 3 * ONE)],
            vec![Coin::new(Asset::bnb(), 37500)],
        );
        observe(&fx, &observed, &["thor1node0", "thor1node1", "thor1node2"]);

        let ygg = fx.keeper.get_vault(&PubKey::new("ygg-pk")).unwrap();
        // both the coins and the gas are debited, no subsidy
        assert_eq!(ygg.balance_of(&Asset::bnb()), 7 * ONE - 37500);
        // no pending actions were consumed
        assert_eq!(ygg.outbound_tx_count, 0);

        // the thief's bond is slashed at RUNE value for coins and gas
        let na = fx.keeper.get_node_account("thor1thief").unwrap();
        let expected_slash = 2 * (3 * ONE + 37500);
        assert_eq!(na.bond, 1000 * ONE - expected_slash);
    }

    #[test]
    fn test_empty_memo_recovered_from_dispatched_item() {
        let fx = Fixture::new(4);
        let mut vault = Vault::new(
            PubKey::new("asgard-pk"),
            VaultType::Asgard,
            vec![PubKey::new("pk0")],
        );
        vault.add_funds(&Coins::one(Coin::new(Asset::rune(), 100 * ONE)));
        fx.keeper.set_vault(&vault).unwrap();

        let mut toi = TxOutItem::new(
            Chain::bnb(),
            Address::new("tbnb1user"),
            Coin::new(Asset::rune(), 5 * ONE),
            TxId::new("IN1"),
        );
        toi.vault_pub_key = PubKey::new("asgard-pk");
        toi.memo = "outbound:IN1".to_string();
        fx.txout_store.unsafe_add_tx_out_item(&fx.keeper, toi).unwrap();

        // the chain dropped the memo; it is recovered from the dispatch
        let observed = outbound_observation(
            "",
            "asgard-pk",
            vec![Coin::new(Asset::rune(), 5 * ONE)],
            vec![],
        );
        observe(&fx, &observed, &["thor1node0", "thor1node1", "thor1node2"]);

        let block = fx.keeper.get_tx_out(20).unwrap();
        assert_eq!(block.tx_array[0].out_hash, TxId::new("OUT1"));
    }

    #[test]
    fn test_non_active_signer_rejected() {
        let fx = Fixture::new(3);
        let observed = outbound_observation("outbound:IN1", "asgard-pk", vec![], vec![]);
        let msg = MsgObservedTxOut {
            txs: vec![observed],
            signer: "thor1stranger".to_string(),
        };
        let err = fx.handlers().handle_observed_tx_out(&msg, 20).unwrap_err();
        assert!(matches!(err, ThorError::NotAuthorized));
    }
}
