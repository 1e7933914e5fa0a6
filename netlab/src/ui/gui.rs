//! A windowed front end selected by `--gui` (§4.8): a scrollback and an
//! input box, built on `eframe`/`egui`.

use super::{Ui, UiEvent, UiOutput};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub struct GuiUi;

impl GuiUi {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GuiUi {
    fn default() -> Self {
        Self::new()
    }
}

struct App {
    scrollback: Arc<Mutex<Vec<String>>>,
    input: String,
    events: mpsc::Sender<UiEvent>,
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                for line in self.scrollback.lock().unwrap().iter() {
                    ui.label(line);
                }
            });
            ui.separator();
            let response = ui.text_edit_singleline(&mut self.input);
            if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                let line = std::mem::take(&mut self.input);
                if !line.trim().is_empty() {
                    let _ = self.events.try_send(UiEvent::SendText { recipient: None, content: line });
                }
            }
        });
        ctx.request_repaint();
    }

    fn on_close_event(&mut self) -> bool {
        let _ = self.events.try_send(UiEvent::Quit);
        true
    }
}

impl Ui for GuiUi {
    fn run(self: Box<Self>) -> (mpsc::Sender<UiOutput>, mpsc::Receiver<UiEvent>) {
        let (output_tx, mut output_rx) = mpsc::channel::<UiOutput>(32);
        let (event_tx, event_rx) = mpsc::channel::<UiEvent>(32);

        let scrollback = Arc::new(Mutex::new(Vec::new()));
        let render_scrollback = scrollback.clone();

        tokio::spawn(async move {
            while let Some(output) = output_rx.recv().await {
                let line = match output {
                    UiOutput::Message { from, content } => format!("{from}: {content}"),
                    UiOutput::FileReceived { from, name, path } => {
                        format!("{from} sent a file: {name} (saved to {path})")
                    }
                    UiOutput::System(content) => format!("* {content}"),
                    UiOutput::Userlist(users) => format!("* online: {}", users.join(", ")),
                };
                render_scrollback.lock().unwrap().push(line);
            }
        });

        std::thread::spawn(move || {
            let options = eframe::NativeOptions::default();
            let _ = eframe::run_native(
                "netlab chat",
                options,
                Box::new(move |_cc| {
                    Box::new(App { scrollback, input: String::new(), events: event_tx })
                }),
            );
        });

        (output_tx, event_rx)
    }
}
