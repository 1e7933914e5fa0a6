//! The network layer: packets addressed by virtual IP, forwarded through a
//! router that decrements a hop counter (§4.4).

use crate::addr::Vip;
use crate::error::NetworkError;
use crate::link::LinkLayer;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default hop budget. The core has no dependency on the exact value
/// beyond that it exceeds the topology diameter (§4.4).
pub const DEFAULT_TTL: u8 = 4;

/// A network PDU: carries a segment, the source/dest VIP, and a hop
/// budget. Transport never sees this type or its TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Packet {
    source_vip: Vip,
    dest_vip: Vip,
    ttl: u8,
    payload: Vec<u8>,
}

impl Packet {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.payload.len());
        encode_label(&mut out, self.source_vip.as_str());
        encode_label(&mut out, self.dest_vip.as_str());
        out.push(self.ttl);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let mut pos = 0;
        let source_vip = Vip::new(decode_label(bytes, &mut pos)?);
        let dest_vip = Vip::new(decode_label(bytes, &mut pos)?);
        let ttl = *bytes.get(pos)?;
        pos += 1;
        let len_bytes = bytes.get(pos..pos + 4)?;
        let len = u32::from_be_bytes(len_bytes.try_into().ok()?) as usize;
        pos += 4;
        let payload = bytes.get(pos..pos + len)?.to_vec();
        Some(Self { source_vip, dest_vip, ttl, payload })
    }
}

fn encode_label(out: &mut Vec<u8>, label: &str) {
    let bytes = label.as_bytes();
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

fn decode_label(bytes: &[u8], pos: &mut usize) -> Option<String> {
    let len = *bytes.get(*pos)? as usize;
    *pos += 1;
    let slice = bytes.get(*pos..*pos + len)?;
    *pos += len;
    String::from_utf8(slice.to_vec()).ok()
}

/// A static next-hop routing table: VIP -> next-hop VIP.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    next_hop: FxHashMap<Vip, Vip>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dest: Vip, next_hop: Vip) {
        self.next_hop.insert(dest, next_hop);
    }

    /// A table where every destination routes through a single next hop
    /// (the shape every host's table takes in this topology: direct to the
    /// router).
    pub fn all_through(nodes: impl IntoIterator<Item = Vip>, next_hop: Vip) -> Self {
        let mut table = Self::new();
        for node in nodes {
            table.insert(node, next_hop.clone());
        }
        table
    }

    pub fn next_hop(&self, dest: &Vip) -> Option<&Vip> {
        self.next_hop.get(dest)
    }
}

/// The packet service interface a host exposes to the transport layer
/// (§2.2): `send(destination_vip, segment_bytes)` and a blocking
/// `receive()`.
pub struct Host {
    vip: Vip,
    link: Arc<LinkLayer>,
    routing: RoutingTable,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl Host {
    /// Spawns the background reader task that demultiplexes incoming
    /// packets addressed to `vip` from everything else, and constructs the
    /// host's packet-service handle.
    pub fn spawn(vip: Vip, link: Arc<LinkLayer>, routing: RoutingTable) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(64);
        let host = Arc::new(Self {
            vip: vip.clone(),
            link: link.clone(),
            routing,
            inbox: tokio::sync::Mutex::new(rx),
        });
        tokio::spawn(async move {
            loop {
                let bytes = match link.recv().await {
                    Ok(b) => b,
                    Err(_) => break,
                };
                let Some(packet) = Packet::decode(&bytes) else {
                    tracing::warn!("dropped undecodable packet");
                    continue;
                };
                if packet.dest_vip != vip {
                    tracing::warn!(dest = %packet.dest_vip, "dropped packet not addressed to this host");
                    continue;
                }
                if tx.send(packet.payload).await.is_err() {
                    break;
                }
            }
        });
        host
    }

    pub fn vip(&self) -> &Vip {
        &self.vip
    }

    /// Wraps `segment_bytes` into a packet with `ttl = DEFAULT_TTL` and
    /// forwards it to the static next hop for `dest`.
    pub async fn send(&self, dest: &Vip, segment_bytes: Vec<u8>) -> Result<(), NetworkError> {
        let next_hop = self.routing.next_hop(dest).ok_or(NetworkError::NoRoute)?;
        let packet = Packet {
            source_vip: self.vip.clone(),
            dest_vip: dest.clone(),
            ttl: DEFAULT_TTL,
            payload: segment_bytes,
        };
        self.link.send(next_hop, packet.encode()).await?;
        Ok(())
    }

    /// Blocks until a packet targeted at the local VIP arrives, returning
    /// its payload (an encoded segment).
    pub async fn recv(&self) -> Result<Vec<u8>, NetworkError> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or(NetworkError::Link(crate::error::LinkError::ChannelClosed))
    }
}

/// What the router does with one decoded packet: forward it (with its TTL
/// already decremented) to `next_hop`, or drop it silently. Split out of
/// [`Router::spawn`]'s loop so the TTL/routing decision is unit-testable
/// without a real link layer (§4.4).
enum Forward<'a> {
    To { packet: Packet, next_hop: &'a Vip },
    TtlExpired,
    NoRoute,
}

fn decide_forward<'a>(mut packet: Packet, routing: &'a RoutingTable) -> Forward<'a> {
    if packet.ttl == 0 {
        return Forward::TtlExpired;
    }
    packet.ttl -= 1;
    match routing.next_hop(&packet.dest_vip) {
        Some(next_hop) => Forward::To { packet, next_hop },
        None => Forward::NoRoute,
    }
}

/// The router: decrements TTL and forwards; never surfaces data upward
/// (§4.4).
pub struct Router;

impl Router {
    /// Spawns the router's forwarding loop. Runs for the lifetime of the
    /// process; there is no handle to join because the router never
    /// produces a result the caller needs.
    pub fn spawn(link: Arc<LinkLayer>, routing: RoutingTable) {
        tokio::spawn(async move {
            loop {
                let bytes = match link.recv().await {
                    Ok(b) => b,
                    Err(_) => break,
                };
                let Some(packet) = Packet::decode(&bytes) else {
                    tracing::warn!("router dropped undecodable packet");
                    continue;
                };
                let dest = packet.dest_vip.clone();
                match decide_forward(packet, &routing) {
                    Forward::To { packet, next_hop } => {
                        if let Err(err) = link.send(next_hop, packet.encode()).await {
                            tracing::warn!(?err, "router failed to forward packet");
                        }
                    }
                    Forward::TtlExpired => {
                        tracing::debug!(%dest, "router dropped packet: ttl expired");
                    }
                    Forward::NoRoute => {
                        tracing::warn!(%dest, "router has no route");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_round_trips() {
        let packet = Packet {
            source_vip: Vip::new("HOST_A"),
            dest_vip: Vip::new("HOST_B"),
            ttl: 3,
            payload: vec![1, 2, 3, 4],
        };
        let encoded = packet.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn packet_decode_rejects_truncated() {
        assert!(Packet::decode(&[1, b'A']).is_none());
    }

    #[test]
    fn routing_table_all_through() {
        let table = RoutingTable::all_through(
            [Vip::new("HOST_A"), Vip::new("HOST_B")],
            Vip::new("ROUTER"),
        );
        assert_eq!(table.next_hop(&Vip::new("HOST_A")), Some(&Vip::new("ROUTER")));
        assert_eq!(table.next_hop(&Vip::new("NOPE")), None);
    }

    #[test]
    fn router_drops_packet_with_expired_ttl() {
        let routing = RoutingTable::all_through([Vip::new("HOST_B")], Vip::new("HOST_B"));
        let packet = Packet {
            source_vip: Vip::new("HOST_A"),
            dest_vip: Vip::new("HOST_B"),
            ttl: 0,
            payload: vec![1],
        };
        assert!(matches!(decide_forward(packet, &routing), Forward::TtlExpired));
    }

    #[test]
    fn router_decrements_ttl_and_forwards_to_next_hop() {
        let routing = RoutingTable::all_through([Vip::new("HOST_B")], Vip::new("HOST_B"));
        let packet = Packet {
            source_vip: Vip::new("HOST_A"),
            dest_vip: Vip::new("HOST_B"),
            ttl: 2,
            payload: vec![1],
        };
        match decide_forward(packet, &routing) {
            Forward::To { packet, next_hop } => {
                assert_eq!(packet.ttl, 1);
                assert_eq!(next_hop, &Vip::new("HOST_B"));
            }
            _ => panic!("expected a forward decision"),
        }
    }

    #[test]
    fn router_drops_packet_with_no_route() {
        let routing = RoutingTable::new();
        let packet = Packet {
            source_vip: Vip::new("HOST_A"),
            dest_vip: Vip::new("HOST_B"),
            ttl: 2,
            payload: vec![1],
        };
        assert!(matches!(decide_forward(packet, &routing), Forward::NoRoute));
    }
}
