//! Application-level error taxonomy (§7): wraps transport failures and
//! adds the chat application's own terminal conditions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Transport(#[from] netlab_core::TransportError),

    #[error("malformed envelope: {0}")]
    BadEnvelope(#[from] serde_json::Error),

    #[error("failed to write received file")]
    FileIo(#[from] std::io::Error),

    #[error("topology has no binding for {0}")]
    UnknownNode(String),

    #[error("topology file could not be parsed")]
    TopologyFormat(#[from] ron::Error),
}
