//! [`ConnectionKey`], the four-tuple identifying a connection (§3).

use crate::addr::{Port, Vip};

/// Identifies a connection at one endpoint: the remote peer and both
/// ports. The local VIP is implicit from the owning host, so it is not
/// part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub remote_vip: Vip,
    pub remote_port: Port,
    pub local_port: Port,
}

impl ConnectionKey {
    pub fn new(remote_vip: Vip, remote_port: Port, local_port: Port) -> Self {
        Self { remote_vip, remote_port, local_port }
    }

    /// Computes the key from a segment's perspective as the receiver: the
    /// sender becomes the remote peer (§4.3's reader loop).
    pub fn from_incoming(segment: &crate::segment::Segment) -> Self {
        Self {
            remote_vip: segment.source_vip.clone(),
            remote_port: segment.source_port,
            local_port: segment.dest_port,
        }
    }
}
