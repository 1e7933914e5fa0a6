//! The router binary: forwards packets between hosts, decrementing TTL,
//! and never runs a transport layer of its own (§4.4).

use netlab::cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::initialize();
    let topology = args.load_topology()?;

    netlab_core::node::Node::bind_router(&topology, args.channel_profile()).await?;
    tracing::info!(router = %topology.router, "router forwarding loop started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("router shutting down");
    Ok(())
}
