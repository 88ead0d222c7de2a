// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The keeper: an ordered key-value store where every component owns a
//! disjoint key-prefix namespace, plus typed accessors over it.

use crate::error::{ThorError, ThorResult};
use crate::node_account::{NodeAccount, NodeStatus};
use crate::swap::MsgSwap;
use crate::voter::ObservedTxVoter;
use bifrost_types::{
    Asset, Chain, Event, EventStatus, Pool, PubKey, TxId, TxOut, TxOutItem, Vault, VaultStatus,
    VaultType, Vaults,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

mod prefix {
    pub const VAULT: &str = "vault/";
    pub const VOTER: &str = "voter/";
    pub const TXOUT: &str = "txout/";
    pub const POOL: &str = "pool/";
    pub const NODE_ACCOUNT: &str = "node_account/";
    pub const EVENT: &str = "event/";
    pub const PENDING_EVENT: &str = "pending_event/";
    pub const SWAP_QUEUE: &str = "swap_queue/";
    pub const STAKER: &str = "staker/";
    pub const KEYGEN_VOTER: &str = "keygen_voter/";
    pub const LAST_OBSERVED_IN: &str = "last_observed_in/";
    pub const LAST_SIGNED_OUT: &str = "last_signed_out/";
    pub const CHAINS: &str = "chains";
    pub const RESERVE: &str = "reserve";
    pub const EVENT_ID: &str = "event_id";
    pub const OBSERVING: &str = "observing";
}

/// Ordered KV store behind typed accessors. Readable from anywhere, written
/// only from the block handler path.
pub struct Keeper {
    store: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl Default for Keeper {
    fn default() -> Self {
        Self::new()
    }
}

impl Keeper {
    pub fn new() -> Self {
        Keeper {
            store: RwLock::new(BTreeMap::new()),
        }
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> ThorResult<Option<T>> {
        let store = self.store.read().expect("keeper lock poisoned");
        match store.get(key) {
            None => Ok(None),
            Some(buf) => serde_json::from_slice(buf)
                .map(Some)
                .map_err(|e| ThorError::Store(format!("unmarshal {key}: {e}"))),
        }
    }

    fn set<T: Serialize>(&self, key: &str, value: &T) -> ThorResult<()> {
        let buf = serde_json::to_vec(value)
            .map_err(|e| ThorError::Store(format!("marshal {key}: {e}")))?;
        let mut store = self.store.write().expect("keeper lock poisoned");
        store.insert(key.to_string(), buf);
        Ok(())
    }

    fn delete(&self, key: &str) {
        let mut store = self.store.write().expect("keeper lock poisoned");
        store.remove(key);
    }

    fn scan_prefix<T: DeserializeOwned>(&self, pfx: &str) -> ThorResult<Vec<(String, T)>> {
        let store = self.store.read().expect("keeper lock poisoned");
        let mut out = Vec::new();
        let range = store.range::<String, _>((Bound::Included(pfx.to_string()), Bound::Unbounded));
        for (key, buf) in range {
            if !key.starts_with(pfx) {
                break;
            }
            let value = serde_json::from_slice(buf)
                .map_err(|e| ThorError::Store(format!("unmarshal {key}: {e}")))?;
            out.push((key.clone(), value));
        }
        Ok(out)
    }

    // ---- vaults ----

    pub fn get_vault(&self, pk: &PubKey) -> ThorResult<Vault> {
        self.get(&format!("{}{}", prefix::VAULT, pk))?
            .ok_or_else(|| ThorError::NotFound(format!("vault {pk}")))
    }

    pub fn vault_exists(&self, pk: &PubKey) -> bool {
        matches!(self.get::<Vault>(&format!("{}{}", prefix::VAULT, pk)), Ok(Some(_)))
    }

    pub fn set_vault(&self, vault: &Vault) -> ThorResult<()> {
        self.set(&format!("{}{}", prefix::VAULT, vault.pub_key), vault)
    }

    pub fn get_vaults(&self) -> ThorResult<Vaults> {
        let items: Vec<(String, Vault)> = self.scan_prefix(prefix::VAULT)?;
        Ok(Vaults::new(items.into_iter().map(|(_, v)| v).collect()))
    }

    pub fn get_asgard_vaults_by_status(&self, status: VaultStatus) -> ThorResult<Vaults> {
        let vaults = self.get_vaults()?;
        Ok(Vaults::new(
            vaults
                .0
                .into_iter()
                .filter(|v| v.vault_type == VaultType::Asgard && v.status == status)
                .collect(),
        ))
    }

    // ---- observation voters ----

    pub fn get_observed_tx_voter(&self, tx_id: &TxId) -> ThorResult<ObservedTxVoter> {
        Ok(self
            .get(&format!("{}{}", prefix::VOTER, tx_id))?
            .unwrap_or_else(|| ObservedTxVoter::new(tx_id.clone())))
    }

    pub fn set_observed_tx_voter(&self, voter: &ObservedTxVoter) -> ThorResult<()> {
        self.set(&format!("{}{}", prefix::VOTER, voter.tx_id), voter)
    }

    // ---- outbound blocks ----

    pub fn get_tx_out(&self, height: i64) -> ThorResult<TxOut> {
        Ok(self
            .get(&format!("{}{:020}", prefix::TXOUT, height))?
            .unwrap_or_else(|| TxOut::new(height)))
    }

    pub fn set_tx_out(&self, tx_out: &TxOut) -> ThorResult<()> {
        self.set(&format!("{}{:020}", prefix::TXOUT, tx_out.height), tx_out)
    }

    /// All persisted outbound blocks in height order.
    pub fn get_tx_out_heights(&self) -> ThorResult<Vec<i64>> {
        let items: Vec<(String, TxOut)> = self.scan_prefix(prefix::TXOUT)?;
        Ok(items.into_iter().map(|(_, t)| t.height).collect())
    }

    // ---- pools ----

    pub fn get_pool(&self, asset: &Asset) -> ThorResult<Pool> {
        Ok(self
            .get(&format!("{}{}", prefix::POOL, asset))?
            .unwrap_or_else(|| Pool::new(asset.clone())))
    }

    pub fn pool_exists(&self, asset: &Asset) -> bool {
        matches!(
            self.get::<Pool>(&format!("{}{}", prefix::POOL, asset)),
            Ok(Some(_))
        )
    }

    pub fn set_pool(&self, pool: &Pool) -> ThorResult<()> {
        self.set(&format!("{}{}", prefix::POOL, pool.asset), pool)
    }

    // ---- node accounts ----

    pub fn get_node_account(&self, addr: &str) -> ThorResult<NodeAccount> {
        self.get(&format!("{}{}", prefix::NODE_ACCOUNT, addr))?
            .ok_or_else(|| ThorError::NotFound(format!("node account {addr}")))
    }

    pub fn set_node_account(&self, na: &NodeAccount) -> ThorResult<()> {
        self.set(&format!("{}{}", prefix::NODE_ACCOUNT, na.node_address), na)
    }

    pub fn list_node_accounts(&self) -> ThorResult<Vec<NodeAccount>> {
        let items: Vec<(String, NodeAccount)> = self.scan_prefix(prefix::NODE_ACCOUNT)?;
        Ok(items.into_iter().map(|(_, na)| na).collect())
    }

    pub fn list_active_node_accounts(&self) -> ThorResult<Vec<NodeAccount>> {
        Ok(self
            .list_node_accounts()?
            .into_iter()
            .filter(|na| na.status == NodeStatus::Active)
            .collect())
    }

    /// Find the node account holding the given signer key.
    pub fn node_account_by_pub_key(&self, pk: &PubKey) -> ThorResult<Option<NodeAccount>> {
        Ok(self
            .list_node_accounts()?
            .into_iter()
            .find(|na| na.holds_key(pk)))
    }

    // ---- chains & heights ----

    pub fn get_chains(&self) -> ThorResult<Vec<Chain>> {
        Ok(self.get(prefix::CHAINS)?.unwrap_or_default())
    }

    pub fn add_chain(&self, chain: &Chain) -> ThorResult<()> {
        let mut chains = self.get_chains()?;
        if !chains.contains(chain) {
            chains.push(chain.clone());
            self.set(prefix::CHAINS, &chains)?;
        }
        Ok(())
    }

    pub fn get_last_observed_in_height(&self, chain: &Chain) -> ThorResult<i64> {
        Ok(self
            .get(&format!("{}{}", prefix::LAST_OBSERVED_IN, chain))?
            .unwrap_or(0))
    }

    pub fn set_last_observed_in_height(&self, chain: &Chain, height: i64) -> ThorResult<()> {
        let current = self.get_last_observed_in_height(chain)?;
        if height > current {
            self.set(&format!("{}{}", prefix::LAST_OBSERVED_IN, chain), &height)?;
        }
        Ok(())
    }

    pub fn get_last_signed_out_height(&self, chain: &Chain) -> ThorResult<i64> {
        Ok(self
            .get(&format!("{}{}", prefix::LAST_SIGNED_OUT, chain))?
            .unwrap_or(0))
    }

    pub fn set_last_signed_out_height(&self, chain: &Chain, height: i64) -> ThorResult<()> {
        self.set(&format!("{}{}", prefix::LAST_SIGNED_OUT, chain), &height)
    }

    // ---- reserve ----

    pub fn get_reserve(&self) -> ThorResult<u64> {
        Ok(self.get(prefix::RESERVE)?.unwrap_or(0))
    }

    pub fn add_fee_to_reserve(&self, fee: u64) -> ThorResult<()> {
        let reserve = self.get_reserve()?;
        self.set(prefix::RESERVE, &(reserve.saturating_add(fee)))
    }

    /// Take up to `amount` from the reserve, returning what was actually
    /// available.
    pub fn sub_from_reserve(&self, amount: u64) -> ThorResult<u64> {
        let reserve = self.get_reserve()?;
        let taken = amount.min(reserve);
        self.set(prefix::RESERVE, &(reserve - taken))?;
        Ok(taken)
    }

    // ---- staker units ----

    pub fn get_staker_units(&self, asset: &Asset, addr: &str) -> ThorResult<u64> {
        Ok(self
            .get(&format!("{}{}/{}", prefix::STAKER, asset, addr))?
            .unwrap_or(0))
    }

    pub fn set_staker_units(&self, asset: &Asset, addr: &str, units: u64) -> ThorResult<()> {
        let key = format!("{}{}/{}", prefix::STAKER, asset, addr);
        if units == 0 {
            self.delete(&key);
            Ok(())
        } else {
            self.set(&key, &units)
        }
    }

    // ---- events ----

    pub fn get_event(&self, id: i64) -> ThorResult<Event> {
        self.get(&format!("{}{:020}", prefix::EVENT, id))?
            .ok_or_else(|| ThorError::NotFound(format!("event {id}")))
    }

    pub fn get_current_event_id(&self) -> ThorResult<i64> {
        Ok(self.get(prefix::EVENT_ID)?.unwrap_or(1))
    }

    fn next_event_id(&self) -> ThorResult<i64> {
        let current = self.get_current_event_id()?;
        self.set(prefix::EVENT_ID, &(current + 1))?;
        Ok(current)
    }

    /// Insert or update an event. A zero id is assigned the next monotonic
    /// id; the pending index tracks events by their inbound hash until they
    /// complete.
    pub fn upsert_event(&self, event: &Event) -> ThorResult<i64> {
        let mut event = event.clone();
        if event.id == 0 {
            event.id = self.next_event_id()?;
        }
        self.set(&format!("{}{:020}", prefix::EVENT, event.id), &event)?;

        let pending_key = format!("{}{}", prefix::PENDING_EVENT, event.in_tx.id);
        if event.status == EventStatus::Pending {
            let mut ids: Vec<i64> = self.get(&pending_key)?.unwrap_or_default();
            if !ids.contains(&event.id) {
                ids.push(event.id);
            }
            self.set(&pending_key, &ids)?;
        } else {
            // remove this id from the pending index; drop the key when empty
            let mut ids: Vec<i64> = self.get(&pending_key)?.unwrap_or_default();
            ids.retain(|id| *id != event.id);
            if ids.is_empty() {
                self.delete(&pending_key);
            } else {
                self.set(&pending_key, &ids)?;
            }
        }
        Ok(event.id)
    }

    pub fn get_pending_event_ids(&self, tx_id: &TxId) -> ThorResult<Vec<i64>> {
        Ok(self
            .get(&format!("{}{}", prefix::PENDING_EVENT, tx_id))?
            .unwrap_or_default())
    }

    pub fn get_all_pending_events(&self) -> ThorResult<Vec<Event>> {
        let items: Vec<(String, Vec<i64>)> = self.scan_prefix(prefix::PENDING_EVENT)?;
        let mut events = Vec::new();
        for (_, ids) in items {
            for id in ids {
                events.push(self.get_event(id)?);
            }
        }
        Ok(events)
    }

    // ---- swap queue ----

    pub fn set_swap_queue_item(&self, msg: &MsgSwap) -> ThorResult<()> {
        self.set(&format!("{}{}", prefix::SWAP_QUEUE, msg.tx.id), msg)
    }

    pub fn get_swap_queue(&self) -> ThorResult<Vec<MsgSwap>> {
        let items: Vec<(String, MsgSwap)> = self.scan_prefix(prefix::SWAP_QUEUE)?;
        Ok(items.into_iter().map(|(_, m)| m).collect())
    }

    pub fn remove_swap_queue_item(&self, tx_id: &TxId) {
        self.delete(&format!("{}{}", prefix::SWAP_QUEUE, tx_id));
    }

    // ---- keygen voters ----

    pub fn get_keygen_voter(&self, id: &str) -> ThorResult<Option<crate::vault_manager::KeygenVoter>> {
        self.get(&format!("{}{}", prefix::KEYGEN_VOTER, id))
    }

    pub fn set_keygen_voter(&self, id: &str, voter: &crate::vault_manager::KeygenVoter) -> ThorResult<()> {
        self.set(&format!("{}{}", prefix::KEYGEN_VOTER, id), voter)
    }

    // ---- observing addresses (liveness tracking within one block) ----

    pub fn add_observing_addresses(&self, addrs: &[String]) -> ThorResult<()> {
        let mut current: Vec<String> = self.get(prefix::OBSERVING)?.unwrap_or_default();
        for addr in addrs {
            if !current.contains(addr) {
                current.push(addr.clone());
            }
        }
        self.set(prefix::OBSERVING, &current)
    }

    pub fn get_observing_addresses(&self) -> ThorResult<Vec<String>> {
        Ok(self.get(prefix::OBSERVING)?.unwrap_or_default())
    }

    pub fn clear_observing_addresses(&self) {
        self.delete(prefix::OBSERVING);
    }

    // ---- raw append used by the outbound store under its own lock ----

    pub fn append_tx_out(&self, height: i64, toi: &TxOutItem) -> ThorResult<()> {
        let mut block = self.get_tx_out(height)?;
        block.tx_array.push(toi.clone());
        self.set_tx_out(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_types::{Coin, Coins, Tx};

    #[test]
    fn test_vault_round_trip() {
        let keeper = Keeper::new();
        let pk = PubKey::new("vault-pk");
        assert!(!keeper.vault_exists(&pk));

        let mut vault = Vault::new(pk.clone(), VaultType::Asgard, vec![PubKey::new("m1")]);
        vault.add_funds(&Coins::one(Coin::new(Asset::bnb(), 100)));
        keeper.set_vault(&vault).unwrap();

        assert!(keeper.vault_exists(&pk));
        assert_eq!(keeper.get_vault(&pk).unwrap(), vault);
        assert_eq!(keeper.get_vaults().unwrap().0.len(), 1);
    }

    #[test]
    fn test_last_observed_in_height_is_monotonic() {
        let keeper = Keeper::new();
        let chain = Chain::bnb();
        keeper.set_last_observed_in_height(&chain, 10).unwrap();
        keeper.set_last_observed_in_height(&chain, 5).unwrap();
        assert_eq!(keeper.get_last_observed_in_height(&chain).unwrap(), 10);
        keeper.set_last_observed_in_height(&chain, 11).unwrap();
        assert_eq!(keeper.get_last_observed_in_height(&chain).unwrap(), 11);
    }

    #[test]
    fn test_event_ids_assigned_monotonically() {
        let keeper = Keeper::new();
        let mut in_tx = Tx::default();
        in_tx.id = TxId::new("IN1");
        let event = Event::new(
            bifrost_types::event::SWAP_EVENT,
            5,
            in_tx,
            serde_json::Value::Null,
            EventStatus::Pending,
        );
        let first = keeper.upsert_event(&event).unwrap();
        let second = keeper.upsert_event(&event).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(
            keeper.get_pending_event_ids(&TxId::new("IN1")).unwrap(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_pending_index_cleared_on_completion() {
        let keeper = Keeper::new();
        let mut in_tx = Tx::default();
        in_tx.id = TxId::new("IN1");
        let event = Event::new(
            bifrost_types::event::SWAP_EVENT,
            5,
            in_tx,
            serde_json::Value::Null,
            EventStatus::Pending,
        );
        let id = keeper.upsert_event(&event).unwrap();

        let mut done = keeper.get_event(id).unwrap();
        done.status = EventStatus::Success;
        keeper.upsert_event(&done).unwrap();

        assert!(keeper
            .get_pending_event_ids(&TxId::new("IN1"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_reserve_accumulates() {
        let keeper = Keeper::new();
        keeper.add_fee_to_reserve(100).unwrap();
        keeper.add_fee_to_reserve(23).unwrap();
        assert_eq!(keeper.get_reserve().unwrap(), 123);
    }

    #[test]
    fn test_chains_dedup() {
        let keeper = Keeper::new();
        keeper.add_chain(&Chain::bnb()).unwrap();
        keeper.add_chain(&Chain::bnb()).unwrap();
        keeper.add_chain(&Chain::btc()).unwrap();
        assert_eq!(keeper.get_chains().unwrap().len(), 2);
    }
}
