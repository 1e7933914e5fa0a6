//! The default front end: line-based stdin/stdout (§4.8).

use super::{Ui, UiEvent, UiOutput};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Console commands beyond plain text:
/// - `/msg <recipient> <text>` sends a private text to one peer.
/// - `/file <path> [recipient]` sends the file at `path`, whole chat by default.
/// - `/quit` leaves the session.
/// Anything else is sent as a broadcast text message.
pub struct ConsoleUi;

impl ConsoleUi {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleUi {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line(line: &str) -> UiEvent {
    if let Some(rest) = line.strip_prefix("/msg ") {
        if let Some((recipient, content)) = rest.split_once(' ') {
            return UiEvent::SendText {
                recipient: Some(recipient.to_string()),
                content: content.to_string(),
            };
        }
    }
    if let Some(rest) = line.strip_prefix("/file ") {
        let mut parts = rest.split_whitespace();
        if let Some(path) = parts.next() {
            let recipient = parts.next().map(str::to_string);
            match std::fs::read(path) {
                Ok(data) => {
                    let name = std::path::Path::new(path)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| path.to_string());
                    return UiEvent::SendFile {
                        recipient,
                        name,
                        mime: "application/octet-stream".to_string(),
                        data,
                    };
                }
                Err(err) => {
                    tracing::warn!(?err, %path, "could not read file for /file command");
                    return UiEvent::SendText {
                        recipient: None,
                        content: format!("(could not read {path}: {err})"),
                    };
                }
            }
        }
    }
    if line.trim() == "/quit" {
        return UiEvent::Quit;
    }
    UiEvent::SendText { recipient: None, content: line.to_string() }
}

impl Ui for ConsoleUi {
    fn run(self: Box<Self>) -> (mpsc::Sender<UiOutput>, mpsc::Receiver<UiEvent>) {
        let (output_tx, mut output_rx) = mpsc::channel::<UiOutput>(32);
        let (event_tx, event_rx) = mpsc::channel::<UiEvent>(32);

        tokio::spawn(async move {
            while let Some(output) = output_rx.recv().await {
                match output {
                    UiOutput::Message { from, content } => println!("{from}: {content}"),
                    UiOutput::FileReceived { from, name, path } => {
                        println!("{from} sent a file: {name} (saved to {path})")
                    }
                    UiOutput::System(content) => println!("* {content}"),
                    UiOutput::Userlist(users) => println!("* online: {}", users.join(", ")),
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let event = parse_line(&line);
                        let quit = matches!(event, UiEvent::Quit);
                        if event_tx.send(event).await.is_err() || quit {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        let _ = event_tx.send(UiEvent::Quit).await;
                        break;
                    }
                }
            }
        });

        (output_tx, event_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_line_is_a_broadcast_text() {
        match parse_line("hello there") {
            UiEvent::SendText { recipient: None, content } => assert_eq!(content, "hello there"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn msg_command_addresses_a_recipient() {
        match parse_line("/msg HOST_B hi bob") {
            UiEvent::SendText { recipient: Some(r), content } => {
                assert_eq!(r, "HOST_B");
                assert_eq!(content, "hi bob");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn quit_command_is_recognized() {
        assert!(matches!(parse_line("/quit"), UiEvent::Quit));
    }
}
