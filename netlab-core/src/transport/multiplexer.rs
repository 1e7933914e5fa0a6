//! Demultiplexes incoming segments to connections by [`ConnectionKey`], and
//! hands out new connections for active and passive opens (§4.2, §4.3).

use crate::addr::{Port, Vip};
use crate::error::TransportError;
use crate::network::Host;
use crate::segment::Segment;
use crate::shutdown::Shutdown;
use crate::FxDashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::connection::{Connection, RetryPolicy};
use super::key::ConnectionKey;

/// Owns every live connection on one host and the reader task that feeds
/// them from the packet service (§2.2, §4.3).
pub struct Multiplexer {
    host: Arc<Host>,
    connections: FxDashMap<ConnectionKey, Arc<Connection>>,
    /// SYNs that arrived on ports nobody has called `accept` for yet.
    pending: Mutex<mpsc::Receiver<(ConnectionKey, Segment)>>,
    pending_tx: mpsc::Sender<(ConnectionKey, Segment)>,
    retry: RetryPolicy,
    shutdown: Shutdown,
}

impl Multiplexer {
    /// Spawns the reader task and returns the multiplexer handle. `shutdown`
    /// is cloned into the reader task and into every connection this
    /// multiplexer hands out, so a single `shutdown()` call tears down all
    /// of them (§4.3).
    pub fn spawn(host: Arc<Host>, retry: RetryPolicy, shutdown: Shutdown) -> Arc<Self> {
        let (pending_tx, pending_rx) = mpsc::channel(64);
        let mux = Arc::new(Self {
            host: host.clone(),
            connections: FxDashMap::default(),
            pending: Mutex::new(pending_rx),
            pending_tx,
            retry,
            shutdown: shutdown.clone(),
        });

        let reader = mux.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for_shutdown() => break,
                    bytes = reader.host.recv() => {
                        let Ok(bytes) = bytes else { break };
                        reader.on_datagram(bytes).await;
                    }
                }
            }
        });

        mux
    }

    /// Stops the reader, closes every live connection in parallel and waits
    /// for each to finish its teardown, then releases this multiplexer's
    /// hold on the packet service (§4.3). Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.shut_down();

        let conns: Vec<Arc<Connection>> =
            self.connections.iter().map(|entry| entry.value().clone()).collect();
        let closes = conns.into_iter().map(|conn| async move {
            if let Err(err) = conn.close().await {
                tracing::warn!(key = ?conn.key, ?err, "error closing connection during shutdown");
            }
        });
        futures::future::join_all(closes).await;

        self.connections.clear();
    }

    /// Classifies one arriving segment per §4.3: an existing connection
    /// dispatches to it; a bare SYN on an unknown key queues for `accept`;
    /// a FIN on an unknown key gets a defensive ACK (the connection must
    /// already be gone, but the peer still deserves a reply); anything
    /// else undecodable or otherwise unmatched is dropped.
    async fn on_datagram(&self, bytes: Vec<u8>) {
        let segment = match Segment::decode(&bytes) {
            Ok(s) => s,
            Err(_) => {
                tracing::debug!("dropped undecodable segment");
                return;
            }
        };
        let key = ConnectionKey::from_incoming(&segment);

        if let Some(conn) = self.connections.get(&key) {
            let conn = conn.clone();
            conn.dispatch(segment).await;
            return;
        }

        if segment.flags.syn && !segment.flags.ack {
            if self.pending_tx.send((key, segment)).await.is_err() {
                tracing::warn!("dropped SYN: accept queue is gone");
            }
            return;
        }

        if segment.flags.fin {
            tracing::debug!(?key, "acking FIN for a connection that no longer exists");
            let ack = Segment::control(
                segment.dest_vip,
                segment.source_vip,
                segment.dest_port,
                segment.source_port,
                crate::segment::Flags::ACK,
            );
            if let Err(err) = self.host.send(&key.remote_vip, ack.encode()).await {
                tracing::warn!(?err, "failed to ack stray FIN");
            }
            return;
        }

        tracing::debug!(?key, "dropped segment for unknown connection");
    }

    fn send_fn(&self, remote_vip: Vip) -> super::connection::SendFn {
        let host = self.host.clone();
        Arc::new(move |bytes: Vec<u8>| {
            let host = host.clone();
            let remote_vip = remote_vip.clone();
            Box::pin(async move {
                host.send(&remote_vip, bytes)
                    .await
                    .map_err(TransportError::Network)
            })
        })
    }

    fn on_close_fn(self: &Arc<Self>, key: ConnectionKey) -> super::connection::CloseNotify {
        let mux = self.clone();
        Arc::new(move || {
            mux.connections.remove(&key);
        })
    }

    /// Active open: dials `remote_vip:remote_port` from `local_port`,
    /// running the handshake to completion before returning the connection.
    pub async fn connect(
        self: &Arc<Self>,
        remote_vip: Vip,
        remote_port: Port,
        local_port: Port,
    ) -> Result<Arc<Connection>, TransportError> {
        let key = ConnectionKey::new(remote_vip.clone(), remote_port, local_port);
        if self.connections.contains_key(&key) {
            return Err(TransportError::DuplicateConnection);
        }

        let conn = Connection::new(
            key.clone(),
            self.host.vip().clone(),
            local_port,
            self.send_fn(remote_vip),
            self.on_close_fn(key.clone()),
            self.retry,
            self.shutdown.clone(),
        );
        self.connections.insert(key.clone(), conn.clone());
        if let Err(err) = conn.connect().await {
            self.connections.remove(&key);
            return Err(err);
        }
        Ok(conn)
    }

    /// Passive open: blocks until a SYN lands on `local_port`, then runs the
    /// rest of the handshake and returns the new connection (§4.3).
    pub async fn accept(self: &Arc<Self>, local_port: Port) -> Result<Arc<Connection>, TransportError> {
        loop {
            let (key, segment) = {
                let mut rx = self.pending.lock().await;
                rx.recv().await.ok_or(TransportError::ChannelClosed)?
            };
            if key.local_port != local_port {
                // Not for this listener; re-queue for whoever is waiting
                // on that port.
                if self.pending_tx.send((key, segment)).await.is_err() {
                    return Err(TransportError::ChannelClosed);
                }
                continue;
            }
            if self.connections.contains_key(&key) {
                continue;
            }

            let conn = Connection::new(
                key.clone(),
                self.host.vip().clone(),
                local_port,
                self.send_fn(key.remote_vip.clone()),
                self.on_close_fn(key.clone()),
                self.retry,
                self.shutdown.clone(),
            );
            self.connections.insert(key.clone(), conn.clone());
            if let Err(err) = conn.accept_from().await {
                self.connections.remove(&key);
                return Err(err);
            }
            return Ok(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_key_from_incoming_swaps_source_and_dest() {
        let segment = Segment::control(
            Vip::new("HOST_A"),
            Vip::new("SERVER"),
            Port::new(1000).unwrap(),
            Port::new(2000).unwrap(),
            crate::segment::Flags::SYN,
        );
        let key = ConnectionKey::from_incoming(&segment);
        assert_eq!(key.remote_vip, Vip::new("HOST_A"));
        assert_eq!(key.remote_port, Port::new(1000).unwrap());
        assert_eq!(key.local_port, Port::new(2000).unwrap());
    }
}
