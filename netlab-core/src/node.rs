//! Assembles one node's stack (physical, link, network layers) from a
//! [`Topology`], the way the teacher's `internet`/`machine` modules wire a
//! simulation's machines up from its network description.

use crate::addr::Vip;
use crate::link::{ArpEntry, LinkLayer};
use crate::network::{Host, RoutingTable};
use crate::physical::{ChannelProfile, PhysicalLayer};
use crate::topology::Topology;
use rustc_hash::FxHashMap;
use std::io;
use std::sync::Arc;

/// A fully wired node, ready to hand its packet service to a
/// [`crate::transport::Multiplexer`].
pub struct Node {
    pub host: Arc<Host>,
}

/// Builds the static ARP table every node shares: every node's VIP
/// resolves to its MAC and loopback address, since this topology puts
/// everyone on one simulated LAN segment (§4.5, §9).
fn arp_table(topology: &Topology) -> FxHashMap<Vip, ArpEntry> {
    topology
        .nodes
        .iter()
        .map(|n| (n.vip(), ArpEntry { mac: n.mac(), addr: n.socket_addr() }))
        .collect()
}

impl Node {
    /// Binds `vip`'s physical layer and wires its link and network layers
    /// from `topology`, routing every other node through the router
    /// (§4.4, §9).
    pub async fn bind(
        topology: &Topology,
        vip: &Vip,
        profile: ChannelProfile,
    ) -> io::Result<Self> {
        let binding = topology
            .binding(vip)
            .unwrap_or_else(|| panic!("no topology binding for {vip}"));

        let physical = Arc::new(PhysicalLayer::bind(binding.socket_addr(), profile).await?);
        let link = Arc::new(LinkLayer::new(physical, arp_table(topology)));

        let routing = if vip.as_str() == topology.router {
            // The router's table maps every host directly to itself; it
            // is driven by `Router::spawn`, not by a `Host`.
            RoutingTable::new()
        } else {
            RoutingTable::all_through(
                topology.nodes.iter().map(|n| n.vip()),
                topology.router_vip(),
            )
        };

        let host = Host::spawn(vip.clone(), link, routing);
        Ok(Self { host })
    }

    /// Binds and spawns the router's forwarding loop instead of a host
    /// packet service; the router has no transport layer of its own.
    pub async fn bind_router(topology: &Topology, profile: ChannelProfile) -> io::Result<()> {
        let router_vip = topology.router_vip();
        let binding = topology
            .binding(&router_vip)
            .expect("topology must bind its own router");
        let physical = Arc::new(PhysicalLayer::bind(binding.socket_addr(), profile).await?);
        let link = Arc::new(LinkLayer::new(physical, arp_table(topology)));
        // The router is adjacent to every host directly, so each host
        // routes to itself as next hop (§4.4).
        let mut routing = RoutingTable::new();
        for node in topology.hosts() {
            routing.insert(node.vip(), node.vip());
        }
        crate::network::Router::spawn(link, routing);
        Ok(())
    }
}
