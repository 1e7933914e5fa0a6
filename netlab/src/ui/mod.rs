//! `Ui`: the boundary between the chat application loop and whatever
//! front end is rendering it (§4.8). Mirrors how the teacher's
//! `Application` trait stays transport-agnostic over `Udp`/`Tcp` — here
//! the application loop stays UI-agnostic over console/GUI front ends.

use tokio::sync::mpsc;

mod console;
pub use console::ConsoleUi;

#[cfg(feature = "gui")]
mod gui;
#[cfg(feature = "gui")]
pub use gui::GuiUi;

/// Something the user did.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// The user typed a line of text to send to `recipient` (or broadcast,
    /// if `None`).
    SendText { recipient: Option<String>, content: String },
    /// The user asked to send a file already read from disk.
    SendFile { recipient: Option<String>, name: String, mime: String, data: Vec<u8> },
    /// The user closed the window / pressed Ctrl-D.
    Quit,
}

/// Something the application wants displayed.
#[derive(Debug, Clone)]
pub enum UiOutput {
    Message { from: String, content: String },
    FileReceived { from: String, name: String, path: String },
    System(String),
    Userlist(Vec<String>),
}

/// A front end for the chat client: consumes [`UiOutput`], produces
/// [`UiEvent`]. Implementations run their own input loop and push through
/// the returned channels; the application loop never blocks on a
/// particular front end's I/O model.
pub trait Ui: Send {
    /// Starts the front end, returning a sender for output to display and
    /// a receiver for events the user generates.
    fn run(self: Box<Self>) -> (mpsc::Sender<UiOutput>, mpsc::Receiver<UiEvent>);
}
