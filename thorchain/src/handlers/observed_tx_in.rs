// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Inbound observation handler: votes observations toward consensus, credits
//! the observed vault, interprets the memo, and refunds anything that cannot
//! be acted on.

use super::{process_one_tx_in, refund_code, Handlers, Msg};
use crate::error::{ThorError, ThorResult, CODE_EMPTY_CHAIN, CODE_INVALID_VAULT};
use crate::node_account::{NodeAccount, NodeStatus};
use crate::voter::ObservedTxVoter;
use bifrost_types::ObservedTx;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// One node's batch of inbound observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgObservedTxIn {
    pub txs: Vec<ObservedTx>,
    pub signer: String,
}

impl<'a> Handlers<'a> {
    /// Whether the message signer is an active observer. A signer from a
    /// standby node flips its observer-liveness flag and the message is
    /// accepted without further processing.
    fn validate_observer(&self, signer: &str) -> ThorResult<bool> {
        let actives = self.keeper.list_active_node_accounts()?;
        if actives.iter().any(|na| na.node_address == signer) {
            return Ok(false);
        }
        match self.keeper.get_node_account(signer) {
            Ok(mut na) if na.status == NodeStatus::Standby => {
                na.observer_active = true;
                self.keeper.set_node_account(&na)?;
                Ok(true)
            }
            _ => Err(ThorError::NotAuthorized),
        }
    }

    fn preflight_in(
        &self,
        mut voter: ObservedTxVoter,
        actives: &[NodeAccount],
        tx: &ObservedTx,
        signer: &str,
        height: i64,
    ) -> ThorResult<(ObservedTxVoter, bool)> {
        voter.add(tx.clone(), signer);
        let mut ok = false;
        if voter.has_consensus(actives) && voter.height == 0 {
            ok = true;
            voter.height = height;
        }
        self.keeper.set_observed_tx_voter(&voter)?;
        Ok((voter, ok))
    }

    pub fn handle_observed_tx_in(&self, msg: &MsgObservedTxIn, height: i64) -> ThorResult<()> {
        if self.validate_observer(&msg.signer)? {
            // a new observer coming alive is a success with no side effects
            return Ok(());
        }
        let actives = self.keeper.list_active_node_accounts()?;

        for tx in &msg.txs {
            if !self.keeper.vault_exists(&tx.observed_pub_key) {
                return Err(ThorError::InvalidMessage(format!(
                    "observed pubkey {} is not associated with a valid vault",
                    tx.observed_pub_key
                )));
            }

            let voter = self.keeper.get_observed_tx_voter(&tx.tx.id)?;
            let (voter, ok) = self.preflight_in(voter, &actives, tx, &msg.signer, height)?;
            if !ok {
                continue;
            }
            let consensus = voter
                .get_tx(&actives)
                .cloned()
                .expect("consensus shape exists after preflight");
            info!(tx_id = %consensus.tx.id, memo = %consensus.tx.memo, "inbound reached consensus");

            // the observed vault takes custody of the deposited coins
            let mut vault = self.keeper.get_vault(&tx.observed_pub_key)?;
            vault.add_funds(&consensus.tx.coins);
            self.keeper.set_vault(&vault)?;

            // refund checks before the memo is interpreted
            if !self.is_current_vault(&tx.observed_pub_key) {
                let reason = format!("vault {} is not current vault", tx.observed_pub_key);
                self.refund_tx(&consensus, height, CODE_INVALID_VAULT, &reason)?;
                continue;
            }
            if tx.tx.chain.is_empty() {
                self.refund_tx(&consensus, height, CODE_EMPTY_CHAIN, "chain is empty")?;
                continue;
            }

            let msg_in = match process_one_tx_in(&consensus, &msg.signer) {
                Ok(m) => m,
                Err((code, reason)) => {
                    self.refund_tx(&consensus, height, code, &reason)?;
                    continue;
                }
            };
            if matches!(msg_in, Msg::Unauthorized) {
                return Err(ThorError::NotAuthorized);
            }

            self.keeper
                .set_last_observed_in_height(&tx.tx.chain, tx.block_height)?;
            self.keeper.add_chain(&tx.tx.chain)?;
            // track who observed, for the liveness slasher
            self.keeper.add_observing_addresses(&consensus.signers)?;

            if let Err(e) = self.handle_msg(msg_in, height) {
                error!(tx_id = %consensus.tx.id, error = %e, "inbound handler failed, refunding");
                self.refund_tx(&consensus, height, refund_code(&e), &e.to_string())?;
            }
        }
        Ok(())
    }
}
