// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use bifrost_types::{PubKey, PubKeySet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    WhiteListed,
    Standby,
    Ready,
    Active,
    Disabled,
}

/// A validator's ledger record: liveness, membership keys, bond and accrued
/// slash points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAccount {
    pub node_address: String,
    pub status: NodeStatus,
    pub pub_key_set: PubKeySet,
    pub bond: u64,
    pub slash_points: u64,
    /// Whether this node has been seen observing at all; flipped on the
    /// first observation from a standby node.
    pub observer_active: bool,
    pub active_block_height: i64,
}

impl NodeAccount {
    pub fn new(node_address: &str, status: NodeStatus, pub_key_set: PubKeySet) -> Self {
        NodeAccount {
            node_address: node_address.to_string(),
            status,
            pub_key_set,
            bond: 0,
            slash_points: 0,
            observer_active: false,
            active_block_height: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    pub fn holds_key(&self, pk: &PubKey) -> bool {
        self.pub_key_set.contains(pk)
    }

    pub fn add_slash_points(&mut self, points: u64) {
        self.slash_points = self.slash_points.saturating_add(points);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_points_accumulate() {
        let mut na = NodeAccount::new("thor1node", NodeStatus::Active, PubKeySet::default());
        na.add_slash_points(2);
        na.add_slash_points(3);
        assert_eq!(na.slash_points, 5);
    }
}
