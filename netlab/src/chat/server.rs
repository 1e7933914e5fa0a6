//! The chat server: accepts client connections, relays addressed
//! envelopes between them, and periodically broadcasts the online list
//! (§4.7).

use crate::chat::Envelope;
use crate::error::ChatError;
use netlab_core::addr::Port;
use netlab_core::transport::{Connection, Multiplexer};
use netlab_core::FxDashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// The server's well-known listening port in this topology (§6).
pub const CHAT_PORT: u16 = 10002;

/// How often the server rebroadcasts the online list.
const USERLIST_INTERVAL: Duration = Duration::from_secs(10);

fn now() -> i64 {
    // The simulation has no wall clock dependency in its core; the
    // application layer stamps envelopes using the one place it is
    // allowed to read the system time.
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct Server {
    mux: Arc<Multiplexer>,
    clients: FxDashMap<String, Arc<Connection>>,
}

impl Server {
    pub fn new(mux: Arc<Multiplexer>) -> Arc<Self> {
        Arc::new(Self { mux, clients: FxDashMap::default() })
    }

    /// Runs forever: accepts new clients and, concurrently, rebroadcasts
    /// the online list at [`USERLIST_INTERVAL`]. Returns only if the
    /// multiplexer's accept queue is torn down.
    pub async fn run(self: &Arc<Self>) -> Result<(), ChatError> {
        let port = Port::new(CHAT_PORT).expect("CHAT_PORT is nonzero");
        let broadcaster = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(USERLIST_INTERVAL);
            loop {
                ticker.tick().await;
                broadcaster.broadcast_userlist().await;
            }
        });

        loop {
            let conn = self.mux.accept(port).await?;
            let remote = conn.key.remote_vip.to_string();
            self.clients.insert(remote.clone(), conn.clone());
            tracing::info!(client = %remote, "client connected");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.serve_client(remote.clone(), conn).await {
                    tracing::warn!(client = %remote, ?err, "client session ended with an error");
                }
            });
        }
    }

    async fn serve_client(
        self: &Arc<Self>,
        name: String,
        conn: Arc<Connection>,
    ) -> Result<(), ChatError> {
        loop {
            let Some(bytes) = conn.receive().await? else {
                break;
            };
            let envelope = Envelope::from_bytes(&bytes)?;
            self.route(&name, envelope).await;
        }
        self.clients.remove(&name);
        tracing::info!(client = %name, "client disconnected");
        Ok(())
    }

    async fn route(&self, from: &str, envelope: Envelope) {
        let recipient = envelope.recipient().map(str::to_string);
        match recipient {
            Some(to) if to != from => {
                if let Some(conn) = self.clients.get(&to) {
                    if let Err(err) = conn.send(&envelope.to_bytes()).await {
                        tracing::warn!(%to, ?err, "failed to relay envelope");
                    }
                } else {
                    tracing::debug!(%to, "dropped envelope for unknown recipient");
                }
            }
            _ => {
                // No addressed recipient (or self-addressed): broadcast to
                // everyone else.
                for entry in self.clients.iter() {
                    if entry.key() != from {
                        if let Err(err) = entry.value().send(&envelope.to_bytes()).await {
                            tracing::warn!(to = %entry.key(), ?err, "failed to broadcast envelope");
                        }
                    }
                }
            }
        }
    }

    async fn broadcast_userlist(&self) {
        let users: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        let envelope = Envelope::userlist(users, now());
        for entry in self.clients.iter() {
            if let Err(err) = entry.value().send(&envelope.to_bytes()).await {
                tracing::warn!(to = %entry.key(), ?err, "failed to push userlist");
            }
        }
    }

    /// Shuts the server down: notifies every connected client, then hands
    /// off to the multiplexer's own `shutdown()` to stop its reader and
    /// close every connection in parallel (§4.3). This is the only
    /// teardown path; there is no application-level `__SHUTDOWN__`
    /// sentinel in the base contract (§9).
    pub async fn shutdown(&self) {
        let envelope = Envelope::system("server is shutting down", now());
        for entry in self.clients.iter() {
            let _ = entry.value().send(&envelope.to_bytes()).await;
        }
        self.mux.shutdown().await;
        self.clients.clear();
    }
}
