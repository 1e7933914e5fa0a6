//! Shared client logic for the two named chat peers (§4.7). Connects once
//! to the server, then runs a reader task feeding the UI and a writer
//! loop turning UI events into outgoing envelopes.

use crate::chat::Envelope;
use crate::error::ChatError;
use crate::ui::{Ui, UiEvent, UiOutput};
use base64::Engine;
use netlab_core::addr::Port;
use serde::de::Error as _;
use netlab_core::transport::{Connection, Multiplexer};
use std::path::PathBuf;
use std::sync::Arc;

use super::server::CHAT_PORT;

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct Client {
    local_vip: String,
    conn: Arc<Connection>,
}

impl Client {
    /// Connects to the server's chat port from `local_port`, completing
    /// the handshake before returning.
    pub async fn connect(
        mux: Arc<Multiplexer>,
        local_vip: String,
        server_vip: netlab_core::addr::Vip,
        local_port: Port,
    ) -> Result<Self, ChatError> {
        let server_port = Port::new(CHAT_PORT).expect("CHAT_PORT is nonzero");
        let conn = mux.connect(server_vip, server_port, local_port).await?;
        Ok(Self { local_vip, conn })
    }

    /// Runs the client until the UI signals quit or the connection
    /// closes, whichever happens first.
    pub async fn run(self, ui: Box<dyn Ui>) -> Result<(), ChatError> {
        let (output_tx, mut event_rx) = ui.run();
        let local_vip = self.local_vip.clone();

        let reader_conn = self.conn.clone();
        let reader_local = local_vip.clone();
        let reader = tokio::spawn(async move {
            loop {
                match reader_conn.receive().await {
                    Ok(Some(bytes)) => {
                        if let Ok(envelope) = Envelope::from_bytes(&bytes) {
                            if let Some(output) = render(&reader_local, envelope).await {
                                if output_tx.send(output).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(?err, "connection error while reading");
                        break;
                    }
                }
            }
        });

        while let Some(event) = event_rx.recv().await {
            match event {
                UiEvent::Quit => break,
                UiEvent::SendText { recipient, content } => {
                    let envelope = Envelope::text(
                        local_vip.clone(),
                        recipient.unwrap_or_default(),
                        content,
                        now(),
                    );
                    if let Err(err) = self.conn.send(&envelope.to_bytes()).await {
                        tracing::warn!(?err, "failed to send text");
                    }
                }
                UiEvent::SendFile { recipient, name, mime, data } => {
                    let size = data.len() as u64;
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
                    let envelope = Envelope::File {
                        sender: Some(local_vip.clone()),
                        recipient,
                        timestamp: now(),
                        name,
                        mime,
                        size,
                        data: encoded,
                    };
                    if let Err(err) = self.conn.send(&envelope.to_bytes()).await {
                        tracing::warn!(?err, "failed to send file");
                    }
                }
            }
        }

        reader.abort();
        self.conn.close().await?;
        Ok(())
    }
}

/// Turns an incoming envelope into something the UI should show,
/// persisting `file` payloads to disk first (§6).
async fn render(local_vip: &str, envelope: Envelope) -> Option<UiOutput> {
    match envelope {
        Envelope::Text { sender, content, .. } => Some(UiOutput::Message {
            from: sender.unwrap_or_else(|| "?".to_string()),
            content,
        }),
        Envelope::System { content, .. } => Some(UiOutput::System(content)),
        Envelope::Userlist { users, .. } => Some(UiOutput::Userlist(users)),
        Envelope::File { sender, name, data, .. } => {
            let from = sender.unwrap_or_else(|| "?".to_string());
            match save_file(local_vip, &name, &data).await {
                Ok(path) => Some(UiOutput::FileReceived { from, name, path: path.to_string_lossy().to_string() }),
                Err(err) => {
                    tracing::warn!(?err, %name, "failed to save received file");
                    None
                }
            }
        }
    }
}

async fn save_file(local_vip: &str, name: &str, data_b64: &str) -> Result<PathBuf, ChatError> {
    let dir = PathBuf::from("downloads").join(local_vip);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(name);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data_b64)
        .map_err(|_| ChatError::BadEnvelope(serde::de::Error::custom("invalid base64 in file envelope")))?;
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
