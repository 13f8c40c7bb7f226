//! Frontend that records everything for assertions.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use slirc::dcc::DccView;
use slirc::ui::{Frontend, Target};

#[derive(Clone, Default)]
pub struct RecordingFrontend {
    pub texts: Arc<Mutex<Vec<(Target, String)>>>,
    pub views: Arc<Mutex<Vec<DccView>>>,
    /// Answer to every confirmation.
    pub accept: bool,
    pub download_dir: PathBuf,
}

#[allow(dead_code)]
impl RecordingFrontend {
    pub fn new(download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            ..Self::default()
        }
    }

    /// Whether any printed line contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.texts.lock().iter().any(|(_, text)| text.contains(needle))
    }

    pub fn lines(&self) -> Vec<String> {
        self.texts.lock().iter().map(|(_, text)| text.clone()).collect()
    }
}

impl Frontend for RecordingFrontend {
    fn print_text(&mut self, target: &Target, text: &str, _timestamp: DateTime<Local>) {
        self.texts.lock().push((target.clone(), text.to_owned()));
    }

    fn update_dcc(&mut self, transfer: &DccView) {
        self.views.lock().push(transfer.clone());
    }

    fn confirm(&mut self, _prompt: &str) -> bool {
        self.accept
    }

    fn default_download_dir(&self) -> PathBuf {
        self.download_dir.clone()
    }
}
