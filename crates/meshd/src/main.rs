//! meshd - mesh node daemon
//!
//! Wires the Drop Folder Store, Replication Engine, Discovery, Dispatch,
//! Role Manager, and Resource Governor under one supervisor tree.

use clap::Parser;
use mesh_net::peer::PeerId;
use mesh_net::transport::LoopbackNetwork;
use meshd::config::Config;
use meshd::core::Core;
use meshd::power::StaticPowerSampler;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(&config);

    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!("meshd v{}", env!("CARGO_PKG_VERSION"));

    // Production transports (QUIC, Wi-Fi Direct, Tor) are external,
    // out-of-scope integrations (§1, §4.12); until one is wired in,
    // every node runs as the sole member of its own loopback network.
    let network = LoopbackNetwork::new();
    let transport = Arc::new(network.join(PeerId::from_public_key_encoded("meshd-local")));
    let power = Arc::new(StaticPowerSampler::default());

    let core = match Core::new(config, transport, power).await {
        Ok(core) => Arc::new(core),
        Err(e) => {
            error!("failed to initialize core: {e}");
            return ExitCode::FAILURE;
        }
    };

    let handles = core.start();

    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal");
    handles.shutdown();
    handles.join().await;

    ExitCode::SUCCESS
}

fn init_logging(config: &Config) {
    let filter =
        EnvFilter::from_default_env().add_directive(if config.verbose { "meshd=debug" } else { "meshd=info" }.parse().unwrap());

    if config.log_format == "json" {
        tracing_subscriber::registry().with(fmt::layer().json()).with(filter).init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }
}
