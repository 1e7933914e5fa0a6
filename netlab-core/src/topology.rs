//! Static topology: the table of (VIP, MAC, loopback port) bindings that the
//! network and link layers derive their routing/ARP tables from (§3a, §6,
//! design note in §9: "Static tables are intentionally data, not
//! behaviour").

use crate::addr::{Mac, NumericIp, Vip};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// One node's binding: its virtual IP, its link-layer MAC, and the UDP
/// loopback port its physical layer listens on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeBinding {
    pub vip: String,
    pub mac: [u8; 6],
    pub port: u16,
}

impl NodeBinding {
    pub fn vip(&self) -> Vip {
        Vip::new(self.vip.clone())
    }

    pub fn mac(&self) -> Mac {
        Mac::new(self.mac)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let octets = NumericIp::LOCALHOST.to_bytes();
        SocketAddr::from((octets, self.port))
    }
}

/// The full static topology: every node's binding, plus which node plays
/// the router role. Hosts route everything through the router; the router
/// has direct adjacency to every host (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub router: String,
    pub nodes: Vec<NodeBinding>,
}

impl Topology {
    /// The bundled default topology for this chat example: a router and
    /// three hosts (`SERVER`, `HOST_A`, `HOST_B`) on loopback.
    pub fn default_loopback() -> Self {
        Self {
            router: "ROUTER".to_string(),
            nodes: vec![
                NodeBinding { vip: "ROUTER".to_string(), mac: [0x02, 0, 0, 0, 0, 0], port: 9000 },
                NodeBinding { vip: "SERVER".to_string(), mac: [0x02, 0, 0, 0, 0, 1], port: 9001 },
                NodeBinding { vip: "HOST_A".to_string(), mac: [0x02, 0, 0, 0, 0, 2], port: 9002 },
                NodeBinding { vip: "HOST_B".to_string(), mac: [0x02, 0, 0, 0, 0, 3], port: 9003 },
            ],
        }
    }

    pub fn binding(&self, vip: &Vip) -> Option<&NodeBinding> {
        self.nodes.iter().find(|n| n.vip == vip.as_str())
    }

    pub fn router_vip(&self) -> Vip {
        Vip::new(self.router.clone())
    }

    pub fn hosts(&self) -> impl Iterator<Item = &NodeBinding> {
        self.nodes.iter().filter(move |n| n.vip != self.router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topology_has_distinct_ports() {
        let topo = Topology::default_loopback();
        let mut ports: Vec<u16> = topo.nodes.iter().map(|n| n.port).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), topo.nodes.len());
    }

    #[test]
    fn binding_lookup() {
        let topo = Topology::default_loopback();
        assert!(topo.binding(&Vip::new("HOST_A")).is_some());
        assert!(topo.binding(&Vip::new("NOPE")).is_none());
    }
}
