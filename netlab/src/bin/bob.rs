//! Bob's chat client binary (§4.7).

use netlab::chat::client::Client;
use netlab::cli;
use netlab::ui::{ConsoleUi, Ui};
use netlab_core::addr::{Port, Vip};
use netlab_core::physical::retransmit_timeout;
use netlab_core::shutdown::Shutdown;
use netlab_core::transport::{Multiplexer, RetryPolicy};

/// Bob's local port for the connection to the server.
const LOCAL_PORT: u16 = 10001;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::initialize();
    let topology = args.load_topology()?;
    let profile = args.channel_profile();
    let local_vip = Vip::new("HOST_B");

    let node = netlab_core::node::Node::bind(&topology, &local_vip, profile).await?;
    let shutdown = Shutdown::new();
    let mux = Multiplexer::spawn(node.host, RetryPolicy::unbounded(retransmit_timeout(&profile)), shutdown);

    let client = Client::connect(
        mux.clone(),
        local_vip.to_string(),
        topology.binding(&Vip::new("SERVER")).map(|n| n.vip()).unwrap_or_else(|| Vip::new("SERVER")),
        Port::new(LOCAL_PORT)?,
    )
    .await?;

    let ui: Box<dyn Ui> = pick_ui(args.gui);
    let result = client.run(ui).await;
    mux.shutdown().await;
    result?;
    Ok(())
}

#[cfg(feature = "gui")]
fn pick_ui(gui: bool) -> Box<dyn Ui> {
    if gui {
        Box::new(netlab::ui::GuiUi::new())
    } else {
        Box::new(ConsoleUi::new())
    }
}

#[cfg(not(feature = "gui"))]
fn pick_ui(gui: bool) -> Box<dyn Ui> {
    if gui {
        tracing::warn!("--gui requested but the gui feature was not compiled in; falling back to console");
    }
    Box::new(ConsoleUi::new())
}
