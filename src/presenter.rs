use std::sync::{Mutex, PoisonError};

use module_bridge::engine::ViewHandle;
use uuid::Uuid;

/// What the host UI can do. The rest of the host only talks to this.
pub trait Presenter: Send + Sync {
    /// Show the module's surface full screen.
    fn present(&self, view: &ViewHandle);
    fn dismiss(&self, view: &ViewHandle);
    /// Modal dialog with a single acknowledge action.
    fn show_dialog(&self, title: &str, message: &str);
    fn notify(&self, message: &str);
    fn notify_error(&self, message: &str);
}

/// Presenter for a terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePresenter;

impl Presenter for ConsolePresenter {
    fn present(&self, view: &ViewHandle) {
        println!("▶ module `{}` presented (surface {})", view.engine_id(), view.id());
    }

    fn dismiss(&self, view: &ViewHandle) {
        println!("◀ module `{}` dismissed", view.engine_id());
    }

    fn show_dialog(&self, title: &str, message: &str) {
        println!("┌ {title}");
        println!("│ {message}");
        println!("└ [OK]");
    }

    fn notify(&self, message: &str) {
        println!("{message}");
    }

    fn notify_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterEvent {
    Presented(Uuid),
    Dismissed(Uuid),
    Dialog { title: String, message: String },
    Notice(String),
    Error(String),
}

/// Keeps everything it is asked to show.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    events: Mutex<Vec<PresenterEvent>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PresenterEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dialogs(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PresenterEvent::Dialog { title, message } => Some((title, message)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PresenterEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: PresenterEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, view: &ViewHandle) {
        self.record(PresenterEvent::Presented(view.id()));
    }

    fn dismiss(&self, view: &ViewHandle) {
        self.record(PresenterEvent::Dismissed(view.id()));
    }

    fn show_dialog(&self, title: &str, message: &str) {
        self.record(PresenterEvent::Dialog {
            title: title.to_owned(),
            message: message.to_owned(),
        });
    }

    fn notify(&self, message: &str) {
        self.record(PresenterEvent::Notice(message.to_owned()));
    }

    fn notify_error(&self, message: &str) {
        self.record(PresenterEvent::Error(message.to_owned()));
    }
}
