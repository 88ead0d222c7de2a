// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The byzantine-fault-tolerant observation aggregator: collapses N
//! independent reports of one external transaction into one authoritative
//! record once a supermajority agrees on its exact shape.

use crate::node_account::NodeAccount;
use bifrost_types::{ObservedTx, TxId, TxOutItem};
use serde::{Deserialize, Serialize};

/// Supermajority threshold. The odd literal is deliberate and load-bearing:
/// it is compared with `>=`, so e.g. 2 of 3 signers pass.
pub const CONSENSUS_MAJORITY: f64 = 0.6666665;

/// Whether `signers` out of `total` trusted accounts form a supermajority.
/// More signers than trusted accounts can never form one.
pub fn has_super_majority(signers: usize, total: usize) -> bool {
    if total == 0 || signers > total {
        return false;
    }
    (signers as f64 / total as f64) >= CONSENSUS_MAJORITY
}

/// Per-transaction voting record, keyed by the external tx id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTxVoter {
    pub tx_id: TxId,
    /// Distinct observation shapes, each carrying the signers that reported
    /// exactly that shape. Insertion-ordered: the first shape to cross the
    /// threshold defines consensus.
    pub txs: Vec<ObservedTx>,
    /// Ledger height at which consensus was first reached; 0 = not yet.
    pub height: i64,
    /// Outbound items queued in response to this inbound.
    pub actions: Vec<TxOutItem>,
    /// Set once the outbound-side observation has been processed, so later
    /// confirmations are ignored.
    pub processed_out: bool,
}

impl ObservedTxVoter {
    pub fn new(tx_id: TxId) -> Self {
        ObservedTxVoter {
            tx_id,
            txs: Vec::new(),
            height: 0,
            actions: Vec::new(),
            processed_out: false,
        }
    }

    /// Record `signer`'s report. Appends the signer to the matching shape,
    /// or opens a new shape if none matches byte-for-byte. Re-reports from
    /// the same signer for the same shape are ignored, which is what makes
    /// re-emitted blocks after a scanner restart harmless.
    pub fn add(&mut self, tx: ObservedTx, signer: &str) {
        for existing in self.txs.iter_mut() {
            if existing.same_shape(&tx) {
                if !existing.has_signed(signer) {
                    existing.signers.push(signer.to_string());
                }
                return;
            }
        }
        let mut shape = tx;
        shape.signers = vec![signer.to_string()];
        self.txs.push(shape);
    }

    fn shape_signer_count(shape: &ObservedTx, actives: &[NodeAccount]) -> usize {
        shape
            .signers
            .iter()
            .filter(|s| actives.iter().any(|na| &na.node_address == *s))
            .count()
    }

    /// Whether some shape has been reported by a supermajority of the
    /// active signer set.
    pub fn has_consensus(&self, actives: &[NodeAccount]) -> bool {
        self.txs
            .iter()
            .any(|shape| has_super_majority(Self::shape_signer_count(shape, actives), actives.len()))
    }

    /// The consensus shape, if one exists. First-to-cross wins when two
    /// supermajorities could exist simultaneously.
    pub fn get_tx(&self, actives: &[NodeAccount]) -> Option<&ObservedTx> {
        self.txs
            .iter()
            .find(|shape| has_super_majority(Self::shape_signer_count(shape, actives), actives.len()))
    }

    pub fn add_action(&mut self, toi: TxOutItem) {
        self.actions.push(toi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_account::NodeStatus;
    use bifrost_types::{Address, Chain, Coin, Coins, PubKey, PubKeySet, Tx};

    fn actives(n: usize) -> Vec<NodeAccount> {
        (0..n)
            .map(|i| {
                NodeAccount::new(
                    &format!("thor1node{i}"),
                    NodeStatus::Active,
                    PubKeySet::default(),
                )
            })
            .collect()
    }

    fn observation(memo: &str) -> ObservedTx {
        ObservedTx::new(
            Tx::new(
                TxId::new("T1"),
                Chain::bnb(),
                Address::new("tbnb1user"),
                Address::new("tbnb1asgard"),
                Coins::one(Coin::new(bifrost_types::Asset::bnb(), 100_000_000)),
                Coins::default(),
                memo,
            ),
            42,
            PubKey::new("asgard-pk"),
        )
    }

    #[test]
    fn test_majority_threshold() {
        // the source literal 0.6666665 makes 2-of-3 pass
        assert!(has_super_majority(2, 3));
        assert!(has_super_majority(3, 4));
        assert!(has_super_majority(4, 4));
        assert!(!has_super_majority(2, 4));
        assert!(!has_super_majority(1, 3));
        // more signers than trusted accounts never passes
        assert!(!has_super_majority(5, 4));
        assert!(!has_super_majority(0, 0));
    }

    #[test]
    fn test_consensus_at_two_thirds() {
        let nas = actives(4);
        let mut voter = ObservedTxVoter::new(TxId::new("T1"));

        voter.add(observation("swap:BNB.RUNE-A1F:tbnb1dest1234"), "thor1node0");
        assert!(!voter.has_consensus(&nas));
        voter.add(observation("swap:BNB.RUNE-A1F:tbnb1dest1234"), "thor1node1");
        assert!(!voter.has_consensus(&nas));
        voter.add(observation("swap:BNB.RUNE-A1F:tbnb1dest1234"), "thor1node2");
        assert!(voter.has_consensus(&nas));

        let tx = voter.get_tx(&nas).unwrap();
        assert_eq!(tx.signers.len(), 3);
    }

    #[test]
    fn test_duplicate_signer_not_double_counted() {
        let nas = actives(3);
        let mut voter = ObservedTxVoter::new(TxId::new("T1"));
        voter.add(observation("memo"), "thor1node0");
        voter.add(observation("memo"), "thor1node0");
        voter.add(observation("memo"), "thor1node0");
        assert!(!voter.has_consensus(&nas));
        assert_eq!(voter.txs.len(), 1);
        assert_eq!(voter.txs[0].signers.len(), 1);
    }

    #[test]
    fn test_disagreeing_shapes_tracked_separately() {
        let nas = actives(3);
        let mut voter = ObservedTxVoter::new(TxId::new("T1"));
        voter.add(observation("swap:BNB.BNB:tbnb1dest1234"), "thor1node0");
        voter.add(observation("swap:BNB.BNB:tbnb1other567"), "thor1node1");
        assert_eq!(voter.txs.len(), 2);
        assert!(!voter.has_consensus(&nas));

        voter.add(observation("swap:BNB.BNB:tbnb1dest1234"), "thor1node2");
        assert!(voter.has_consensus(&nas));
        let tx = voter.get_tx(&nas).unwrap();
        assert_eq!(tx.tx.memo, "swap:BNB.BNB:tbnb1dest1234");
    }

    #[test]
    fn test_inactive_signers_do_not_count() {
        let nas = actives(3);
        let mut voter = ObservedTxVoter::new(TxId::new("T1"));
        voter.add(observation("memo"), "thor1node0");
        voter.add(observation("memo"), "thor1stranger");
        voter.add(observation("memo"), "thor1unknown");
        assert!(!voter.has_consensus(&nas));
    }

    #[test]
    fn test_first_supermajority_wins() {
        let nas = actives(6);
        let mut voter = ObservedTxVoter::new(TxId::new("T1"));
        for i in 0..4 {
            voter.add(observation("shape-a"), &format!("thor1node{i}"));
        }
        // a later, larger supermajority for a different shape does not
        // displace the first one
        for i in 0..6 {
            voter.add(observation("shape-b"), &format!("thor1node{i}"));
        }
        let tx = voter.get_tx(&nas).unwrap();
        assert_eq!(tx.tx.memo, "shape-a");
    }
}
