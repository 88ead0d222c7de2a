// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

use bifrost::config::{BifrostConfig, Config};
use bifrost::node::BifrostNode;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bifrost", about = "Off-chain observer and signer node")]
struct Args {
    /// Path to the node config (YAML or JSON).
    #[arg(short, long, default_value = "bifrost.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = BifrostConfig::load(&args.config)?;

    let registry = prometheus::Registry::new();
    let node = BifrostNode::start(config, &registry).await?;
    tracing::info!("bifrost node started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    node.stop().await;
    Ok(())
}
