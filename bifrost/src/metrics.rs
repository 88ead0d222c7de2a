// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGaugeVec, Registry,
};

const LATENCY_SEC_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

#[derive(Clone, Debug)]
pub struct BifrostMetrics {
    pub(crate) blocks_scanned: IntCounterVec,
    pub(crate) scan_errors: IntCounterVec,
    pub(crate) scan_position: IntGaugeVec,
    pub(crate) retry_blocks: IntCounterVec,
    pub(crate) txs_observed: IntCounterVec,
    pub(crate) observations_posted: IntCounter,
    pub(crate) txout_signed: IntCounterVec,
    pub(crate) broadcasts: IntCounterVec,
    pub(crate) keysign_failures: IntCounter,
    pub(crate) block_fetch_duration: HistogramVec,
    pub(crate) sign_duration: HistogramVec,
}

impl BifrostMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            blocks_scanned: register_int_counter_vec_with_registry!(
                "bifrost_blocks_scanned",
                "Total blocks scanned per chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            scan_errors: register_int_counter_vec_with_registry!(
                "bifrost_scan_errors",
                "Scanner errors per chain and kind",
                &["chain", "kind"],
                registry,
            )
            .unwrap(),
            scan_position: register_int_gauge_vec_with_registry!(
                "bifrost_scan_position",
                "Persisted scan cursor per chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            retry_blocks: register_int_counter_vec_with_registry!(
                "bifrost_retry_blocks",
                "Failed blocks re-emitted per chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            txs_observed: register_int_counter_vec_with_registry!(
                "bifrost_txs_observed",
                "Candidate transactions surviving the observation filter",
                &["chain"],
                registry,
            )
            .unwrap(),
            observations_posted: register_int_counter_with_registry!(
                "bifrost_observations_posted",
                "Observation batches posted to the ledger",
                registry,
            )
            .unwrap(),
            txout_signed: register_int_counter_vec_with_registry!(
                "bifrost_txout_signed",
                "Outbound items signed per chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            broadcasts: register_int_counter_vec_with_registry!(
                "bifrost_broadcasts",
                "Broadcast attempts per chain and result",
                &["chain", "result"],
                registry,
            )
            .unwrap(),
            keysign_failures: register_int_counter_with_registry!(
                "bifrost_keysign_failures",
                "TSS keysign failures posted to the ledger",
                registry,
            )
            .unwrap(),
            block_fetch_duration: register_histogram_vec_with_registry!(
                "bifrost_block_fetch_duration_seconds",
                "Block fetch latency per chain",
                &["chain"],
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            sign_duration: register_histogram_vec_with_registry!(
                "bifrost_sign_duration_seconds",
                "Signing latency per chain",
                &["chain"],
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let registry = Registry::new();
        let metrics = BifrostMetrics::new(&registry);
        metrics.blocks_scanned.with_label_values(&["BNB"]).inc();
        metrics
            .scan_errors
            .with_label_values(&["BNB", "transient_rpc"])
            .inc();
        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "bifrost_blocks_scanned"));
    }
}
