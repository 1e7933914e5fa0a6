//! The JSON message envelope every chat application exchanges over a
//! connection (§6).

use serde::{Deserialize, Serialize};

/// One chat message, in any of its four shapes. `#[serde(tag = "type")]`
/// gives exactly the `{"type": "...", ...}` shape of §6's external
/// interface, with the "always present, sometimes null" `sender`/
/// `recipient`/`timestamp` fields flattened onto every variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Text {
        sender: Option<String>,
        recipient: Option<String>,
        timestamp: i64,
        content: String,
    },
    File {
        sender: Option<String>,
        recipient: Option<String>,
        timestamp: i64,
        name: String,
        mime: String,
        size: u64,
        data: String,
    },
    System {
        sender: Option<String>,
        recipient: Option<String>,
        timestamp: i64,
        content: String,
    },
    Userlist {
        sender: Option<String>,
        recipient: Option<String>,
        timestamp: i64,
        users: Vec<String>,
    },
}

impl Envelope {
    pub fn text(sender: impl Into<String>, recipient: impl Into<String>, content: impl Into<String>, now: i64) -> Self {
        Self::Text {
            sender: Some(sender.into()),
            recipient: Some(recipient.into()),
            timestamp: now,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>, now: i64) -> Self {
        Self::System { sender: None, recipient: None, timestamp: now, content: content.into() }
    }

    pub fn userlist(users: Vec<String>, now: i64) -> Self {
        Self::Userlist { sender: None, recipient: None, timestamp: now, users }
    }

    pub fn recipient(&self) -> Option<&str> {
        match self {
            Envelope::Text { recipient, .. }
            | Envelope::File { recipient, .. }
            | Envelope::System { recipient, .. }
            | Envelope::Userlist { recipient, .. } => recipient.as_deref(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("envelope is always representable as JSON")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_envelope_round_trips() {
        let e = Envelope::text("HOST_A", "HOST_B", "hi", 0);
        let bytes = e.to_bytes();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), e);
    }

    #[test]
    fn system_envelope_has_no_sender() {
        let e = Envelope::system("server shutting down", 42);
        let json = serde_json::to_value(&e).unwrap();
        assert!(json["sender"].is_null());
        assert_eq!(json["type"], "system");
    }

    #[test]
    fn userlist_envelope_round_trips() {
        let e = Envelope::userlist(vec!["HOST_A".into(), "HOST_B".into()], 7);
        let bytes = e.to_bytes();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), e);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Envelope::from_bytes(b"not json").is_err());
    }
}
