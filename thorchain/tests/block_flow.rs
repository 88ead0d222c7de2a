// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Whole-block flows: inbound consensus through the swap queue to a
//! scheduled outbound, refunds for unusable inbounds, and the insufficient
//! funds contract.

use bifrost_types::event::{REFUND_EVENT, SWAP_EVENT};
use bifrost_types::{
    Address, Asset, Chain, Coin, Coins, EventStatus, ObservedTx, PubKey, PubKeySet, Tx, TxId,
    TxOutItem, Vault, VaultType, ONE,
};
use thorchain::error::CODE_INSUFFICIENT_FUNDS;
use thorchain::gas::GasManager;
use thorchain::handlers::{Handlers, MsgObservedTxIn};
use thorchain::slasher::Slasher;
use thorchain::swap_queue::SwapQueue;
use thorchain::{EventManager, Keeper, NodeAccount, ThorError, TxOutStore};

const TRANSACTION_FEE: u64 = 2_000_000; // 0.02 RUNE
const HEIGHT: i64 = 12;

struct Chassis {
    keeper: Keeper,
    txout_store: TxOutStore,
    event_mgr: EventManager,
    swap_queue: SwapQueue,
    gas_mgr: GasManager,
    slasher: Slasher,
}

impl Chassis {
    fn new() -> Self {
        let keeper = Keeper::new();
        for i in 0..4 {
            let na = NodeAccount::new(
                &format!("thor1node{i}"),
                thorchain::NodeStatus::Active,
                PubKeySet::new(
                    PubKey::new(&format!("pk{i}")),
                    PubKey::new(&format!("pk{i}")),
                ),
            );
            keeper.set_node_account(&na).unwrap();
        }

        // Asgard custody plus a 2 RUNE : 1 BNB pool
        let mut vault = Vault::new(
            PubKey::new("asgard-pk"),
            VaultType::Asgard,
            (0..4).map(|i| PubKey::new(&format!("pk{i}"))).collect(),
        );
        vault.add_funds(&Coins::new(vec![
            Coin::new(Asset::rune(), 10_000 * ONE),
            Coin::new(Asset::bnb(), 7 * ONE),
        ]));
        keeper.set_vault(&vault).unwrap();

        let mut pool = keeper.get_pool(&Asset::bnb()).unwrap();
        pool.balance_rune = 2_000 * ONE;
        pool.balance_asset = 1_000 * ONE;
        keeper.set_pool(&pool).unwrap();

        let txout_store = TxOutStore::new();
        txout_store.new_block(HEIGHT, TRANSACTION_FEE);

        Chassis {
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

    fn observe(&self, tx: &ObservedTx, signers: &[&str]) {
        for signer in signers {
            let msg = MsgObservedTxIn {
                txs: vec![tx.clone()],
                signer: signer.to_string(),
            };
            self.handlers().handle_observed_tx_in(&msg, HEIGHT).unwrap();
        }
    }
}

fn inbound(id: &str, memo: &str, coin: Coin) -> ObservedTx {
    ObservedTx::new(
        Tx::new(
            TxId::new(id),
            Chain::bnb(),
            Address::new("tbnb1user"),
            Address::new("tbnb1asgardaddr"),
            Coins::one(coin),
            Coins::one(Coin::new(Asset::bnb(), 37_500)),
            memo,
        ),
        40,
        PubKey::new("asgard-pk"),
    )
}

#[test]
fn test_happy_path_swap_end_to_end() {
    let chassis = Chassis::new();
    let deposit = inbound(
        "T1",
        "swap:BNB.RUNE-A1F:tbnb1destdest:0",
        Coin::new(Asset::bnb(), ONE),
    );

    // threshold is 3 of 4: two observations change nothing yet
    chassis.observe(&deposit, &["thor1node0", "thor1node1"]);
    assert!(chassis.keeper.get_swap_queue().unwrap().is_empty());

    chassis.observe(&deposit, &["thor1node2"]);
    assert_eq!(chassis.keeper.get_swap_queue().unwrap().len(), 1);

    // end of block: the queue executes and schedules the outbound
    let expected_emit = {
        // pool state before the swap ran
        thorchain::swap::calc_asset_emission(1_000 * ONE, ONE, 2_000 * ONE)
    };
    chassis
        .swap_queue
        .end_block(
            &chassis.keeper,
            &chassis.txout_store,
            &chassis.event_mgr,
            HEIGHT,
        )
        .unwrap();
    assert!(chassis.keeper.get_swap_queue().unwrap().is_empty());

    let items = chassis
        .txout_store
        .get_outbound_items(&chassis.keeper)
        .unwrap();
    assert_eq!(items.len(), 1);
    let out = &items[0];
    assert_eq!(out.to_address.as_str(), "tbnb1destdest");
    assert!(out.coin.asset.is_rune());
    // the network fee came off the emitted coin and went to the reserve
    assert_eq!(out.coin.amount, expected_emit - TRANSACTION_FEE);
    assert_eq!(chassis.keeper.get_reserve().unwrap(), TRANSACTION_FEE);
    assert_eq!(out.memo, "outbound:T1");
    assert_eq!(out.vault_pub_key, PubKey::new("asgard-pk"));

    // the swap event is pending with the concrete fee attached
    let pending = chassis.keeper.get_all_pending_events().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_type, SWAP_EVENT);
    assert_eq!(
        pending[0].fee.coins.amount_of(&Asset::rune()),
        TRANSACTION_FEE
    );

    // and the voter carries exactly one action for the inbound
    let voter = chassis
        .keeper
        .get_observed_tx_voter(&TxId::new("T1"))
        .unwrap();
    assert_eq!(voter.actions.len(), 1);

    // the pool absorbed the deposit side
    let pool = chassis.keeper.get_pool(&Asset::bnb()).unwrap();
    assert_eq!(pool.balance_asset, 1_001 * ONE);
}

#[test]
fn test_bad_memo_refunds_full_amount_minus_fee() {
    let chassis = Chassis::new();
    let deposit = inbound("T2", "garbage", Coin::new(Asset::bnb(), ONE));
    chassis.observe(&deposit, &["thor1node0", "thor1node1", "thor1node2"]);

    let items = chassis
        .txout_store
        .get_outbound_items(&chassis.keeper)
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].to_address.as_str(), "tbnb1user");
    // pool prices 2 RUNE per BNB, so the 0.02 RUNE fee costs 0.01 BNB
    let bnb_fee = TRANSACTION_FEE / 2;
    assert_eq!(items[0].coin.amount, ONE - bnb_fee);
    assert_eq!(items[0].memo, "refund:T2");

    let pending = chassis.keeper.get_all_pending_events().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_type, REFUND_EVENT);
    assert_eq!(pending[0].status, EventStatus::Pending);
    let body: bifrost_types::event::EventRefund =
        serde_json::from_value(pending[0].body.clone()).unwrap();
    assert!(body.reason.contains("invalid memo"));
}

#[test]
fn test_insufficient_vault_funds_forces_a_refund() {
    let chassis = Chassis::new();

    // the ledger asks for 10 BNB; Asgard only holds 7
    let toi = TxOutItem::new(
        Chain::bnb(),
        Address::new("tbnb1merchant"),
        Coin::new(Asset::bnb(), 10 * ONE),
        TxId::new("T3"),
    );
    let err = chassis
        .txout_store
        .try_add_tx_out_item(&chassis.keeper, &chassis.event_mgr, toi)
        .unwrap_err();
    assert!(matches!(
        err,
        ThorError::VaultInsufficientFunds {
            held,
            needed,
        } if held == 7 * ONE && needed == 10 * ONE
    ));
    assert!(chassis
        .txout_store
        .get_outbound_items(&chassis.keeper)
        .unwrap()
        .is_empty());

    // the caller converts the failure into a refund of the inbound
    let deposit = inbound("T3", "withdraw:BNB.BNB", Coin::new(Asset::bnb(), ONE));
    chassis
        .handlers()
        .refund_tx(&deposit, HEIGHT, CODE_INSUFFICIENT_FUNDS, &err.to_string())
        .unwrap();

    let items = chassis
        .txout_store
        .get_outbound_items(&chassis.keeper)
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].memo, "refund:T3");
    assert_eq!(items[0].to_address.as_str(), "tbnb1user");

    let pending = chassis.keeper.get_all_pending_events().unwrap();
    assert_eq!(pending.len(), 1);
    let body: bifrost_types::event::EventRefund =
        serde_json::from_value(pending[0].body.clone()).unwrap();
    assert_eq!(body.code, CODE_INSUFFICIENT_FUNDS);
}
