//! A small, didactic simulation of a layered network stack: a lossy
//! datagram substrate, a link layer with CRC framing and static ARP, a
//! network layer with static routing and a TTL, and a reliable transport
//! layer built on stop-and-wait with connection multiplexing.
//!
//! # Organization
//!
//! - [`addr`] holds the address value types shared by every layer.
//! - [`physical`] simulates the lossy, delaying, corrupting datagram
//!   substrate that every other layer sits on.
//! - [`link`] frames packets with a CRC and resolves next hops via a
//!   static ARP table.
//! - [`network`] addresses packets by virtual IP, routes them through a
//!   [`network::Router`], and exposes the packet service a host's
//!   transport layer sends and receives through.
//! - [`transport`] is the core: connection multiplexing, the three-way
//!   handshake, fragmented stop-and-wait data transfer, and the four-way
//!   teardown.
//! - [`topology`] describes the static VIP/MAC/port bindings a simulation
//!   run is configured from, and [`node`] wires one node's layers up from
//!   it.

pub mod addr;
pub mod error;
pub mod link;
pub mod network;
pub mod node;
pub mod physical;
pub mod segment;
pub mod shutdown;
pub mod topology;
pub mod transport;

pub use error::{LinkError, NetworkError, TransportError};
pub use shutdown::{ExitStatus, Shutdown};

use dashmap::DashMap;
use std::hash::BuildHasherDefault;

pub type FxDashMap<K, V> = DashMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
