//! The chat server binary: accepts Alice and Bob's connections and relays
//! between them (§4.7).

use netlab::chat::server::Server;
use netlab::cli;
use netlab_core::addr::Vip;
use netlab_core::physical::retransmit_timeout;
use netlab_core::shutdown::Shutdown;
use netlab_core::transport::{Multiplexer, RetryPolicy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::initialize();
    let topology = args.load_topology()?;
    let profile = args.channel_profile();

    let node = netlab_core::node::Node::bind(&topology, &Vip::new("SERVER"), profile).await?;
    let shutdown = Shutdown::new();
    let mux = Multiplexer::spawn(node.host, RetryPolicy::unbounded(retransmit_timeout(&profile)), shutdown);

    let server = Server::new(mux);
    tracing::info!("chat server listening");

    tokio::select! {
        result = server.run() => {
            if let Err(err) = result {
                tracing::error!(?err, "server loop ended with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("server shutting down");
            server.shutdown().await;
        }
    }

    Ok(())
}
