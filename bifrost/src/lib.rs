// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The off-chain companion of the network ledger: per-chain block scanning,
//! observation filtering and posting, outbound signing through TSS, and the
//! worker wiring that keeps it all running.

pub mod block_scanner;
pub mod chains;
pub mod config;
pub mod error;
pub mod ledger_scanner;
pub mod metrics;
pub mod node;
pub mod observer;
pub mod pubkey_manager;
pub mod signer;
pub mod storage;
pub mod thorchain_client;
pub mod tss;

pub use error::{ChainError, ChainResult};

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // The following delay sequence (in secs) will be used, applied with jitter
        // 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 30, 60, 120, 120 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(120),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        tracing::debug!("retrying due to error: {:?}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    async fn example_func_ok() -> anyhow::Result<u32> {
        Ok(7)
    }

    async fn example_func_err() -> anyhow::Result<()> {
        Err(anyhow::anyhow!("nope"))
    }

    #[tokio::test]
    async fn test_retry_with_max_elapsed_time() {
        let max_elapsed_time = Duration::from_millis(20);
        let v = retry_with_max_elapsed_time!(example_func_ok(), max_elapsed_time)
            .unwrap()
            .unwrap();
        assert_eq!(v, 7);

        let max_elapsed_time = Duration::from_secs(2);
        let instant = std::time::Instant::now();
        retry_with_max_elapsed_time!(example_func_err(), max_elapsed_time).unwrap_err();
        assert!(instant.elapsed() < Duration::from_secs(10));
    }
}
