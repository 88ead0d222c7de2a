// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Vault lifecycle: keygen consensus creates the next Asgard vault, the old
//! one retires, and scheduled `migrate` outbounds drain it until it can be
//! marked inactive.

use crate::error::{ThorError, ThorResult};
use crate::event_manager::EventManager;
use crate::keeper::Keeper;
use crate::node_account::NodeAccount;
use crate::txout_store::TxOutStore;
use crate::voter::has_super_majority;
use bifrost_types::{Memo, PubKey, TxId, TxOutItem, Vault, VaultStatus, VaultType};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Vote record for one keygen result, keyed by the reported key and
/// membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenVoter {
    pub id: String,
    pub pub_key: PubKey,
    pub membership: Vec<PubKey>,
    pub signers: Vec<String>,
    /// Ledger height consensus was reached at; 0 = not yet.
    pub height: i64,
}

impl KeygenVoter {
    pub fn new(id: &str, pub_key: PubKey, membership: Vec<PubKey>) -> Self {
        KeygenVoter {
            id: id.to_string(),
            pub_key,
            membership,
            signers: Vec::new(),
            height: 0,
        }
    }

    pub fn add(&mut self, signer: &str) {
        if !self.signers.iter().any(|s| s == signer) {
            self.signers.push(signer.to_string());
        }
    }

    pub fn has_consensus(&self, actives: &[NodeAccount]) -> bool {
        let count = self
            .signers
            .iter()
            .filter(|s| actives.iter().any(|na| &na.node_address == *s))
            .count();
        has_super_majority(count, actives.len())
    }
}

/// Identity of a keygen result: the shared key plus its sorted membership.
pub fn keygen_id(pub_key: &PubKey, membership: &[PubKey]) -> String {
    let mut members: Vec<&str> = membership.iter().map(PubKey::as_str).collect();
    members.sort_unstable();
    format!("{}|{}", pub_key, members.join(","))
}

#[derive(Debug, Default)]
pub struct VaultManager;

impl VaultManager {
    pub fn new() -> Self {
        VaultManager
    }

    /// Record one node's report of a completed Asgard keygen. Once a
    /// supermajority agrees, the new vault goes Active and the previous
    /// Active vault starts retiring. Returns whether a rotation happened.
    pub fn handle_keygen(
        &self,
        keeper: &Keeper,
        pub_key: PubKey,
        membership: Vec<PubKey>,
        signer: &str,
        height: i64,
    ) -> ThorResult<bool> {
        if pub_key.is_empty() || membership.is_empty() {
            return Err(ThorError::InvalidMessage("empty keygen result".to_string()));
        }
        let actives = keeper.list_active_node_accounts()?;
        let id = keygen_id(&pub_key, &membership);
        let mut voter = keeper
            .get_keygen_voter(&id)?
            .unwrap_or_else(|| KeygenVoter::new(&id, pub_key.clone(), membership.clone()));
        voter.add(signer);

        let rotate = voter.has_consensus(&actives) && voter.height == 0;
        if rotate {
            voter.height = height;
            self.rotate(keeper, &pub_key, membership, height)?;
        }
        keeper.set_keygen_voter(&id, &voter)?;
        Ok(rotate)
    }

    fn rotate(
        &self,
        keeper: &Keeper,
        pub_key: &PubKey,
        membership: Vec<PubKey>,
        height: i64,
    ) -> ThorResult<()> {
        for mut old in keeper
            .get_asgard_vaults_by_status(VaultStatus::Active)?
            .0
            .into_iter()
        {
            old.set_status(VaultStatus::Retiring)?;
            keeper.set_vault(&old)?;
            info!(vault = %old.pub_key, "asgard vault retiring");
        }
        let vault = Vault::new(pub_key.clone(), VaultType::Asgard, membership);
        keeper.set_vault(&vault)?;
        info!(vault = %pub_key, height, "new asgard vault active");
        Ok(())
    }

    /// Drive retiring vaults at end of block: empty ones become Inactive,
    /// funded ones emit `migrate` outbounds at every `migrate_interval`
    /// heights.
    pub fn end_block(
        &self,
        keeper: &Keeper,
        txout_store: &TxOutStore,
        event_mgr: &EventManager,
        height: i64,
        migrate_interval: i64,
    ) -> ThorResult<()> {
        let retiring = keeper.get_asgard_vaults_by_status(VaultStatus::Retiring)?;
        if retiring.is_empty() {
            return Ok(());
        }
        let active = keeper.get_asgard_vaults_by_status(VaultStatus::Active)?;
        let target = match active.0.first() {
            Some(vault) => vault.clone(),
            None => return Ok(()), // nowhere to migrate to yet
        };

        for mut vault in retiring.0.into_iter() {
            if vault.is_empty() {
                vault.set_status(VaultStatus::Inactive)?;
                keeper.set_vault(&vault)?;
                info!(vault = %vault.pub_key, "retiring vault drained, now inactive");
                continue;
            }
            if migrate_interval <= 0 || height % migrate_interval != 0 {
                continue;
            }
            let memo = Memo::Migrate {
                block_height: height,
            };
            for coin in vault.coins.clone().iter() {
                if coin.amount == 0 {
                    continue;
                }
                let chain = coin.asset.chain.clone();
                let mut toi = TxOutItem::new(
                    chain.clone(),
                    target.pub_key.chain_address(&chain),
                    coin.clone(),
                    TxId::blank(),
                );
                toi.vault_pub_key = vault.pub_key.clone();
                toi.memo = memo.to_string();
                txout_store.try_add_tx_out_item(keeper, event_mgr, toi)?;
            }
            vault.add_pending_tx_block_height(height);
            keeper.set_vault(&vault)?;
        }
        Ok(())
    }
}
