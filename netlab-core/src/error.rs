//! The error taxonomy shared across the simulated stack.
//!
//! Each layer gets its own error enum so that a caller can match on exactly
//! what went wrong at that layer. Transient per-segment failures (loss,
//! corruption, a dropped frame) are never represented here: they are
//! recovered internally by retransmission and do not escape `receive`.

use thiserror::Error;

/// Errors surfaced by the physical/link collaborators.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("the underlying datagram substrate is gone")]
    ChannelClosed,
    #[error("no ARP entry for the requested next hop")]
    UnknownNextHop,
}

/// Errors surfaced by the network layer (hosts and the router).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("no route to the requested virtual IP")]
    NoRoute,
}

/// The transport-layer error taxonomy (§7 of the specification).
#[derive(Debug, Error)]
pub enum TransportError {
    /// An undecodable segment. Dropped locally; never surfaced to a
    /// connection's state machine.
    #[error("segment could not be decoded")]
    BadFormat,

    /// `connect()` was called for a key that already has a live connection.
    #[error("a connection already exists for this key")]
    DuplicateConnection,

    /// `send`/`receive` called while the connection is not ESTABLISHED.
    #[error("the connection is not open")]
    NotConnected,

    /// Only possible when a retry cap is configured.
    #[error("the handshake did not complete within the retry budget")]
    HandshakeFailed,

    /// The lower layer is permanently gone; surfaced once to every blocked
    /// caller by closing their queues.
    #[error("the underlying packet service is gone")]
    ChannelClosed,

    #[error(transparent)]
    Network(#[from] NetworkError),
}
