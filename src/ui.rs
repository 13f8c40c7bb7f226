//! Frontend boundary.
//!
//! The engine never draws anything. It hands text and transfer snapshots to
//! a [`Frontend`], and asks it yes/no questions.

use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::dcc::DccView;
use crate::server::ServerId;

/// Where a line of text belongs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Whatever window has focus.
    Front,
    /// The server tab.
    Server(ServerId),
    /// A channel or query tab.
    Session(ServerId, String),
    /// A DCC chat.
    DccChat(String),
}

pub trait Frontend: Send {
    fn print_text(&mut self, target: &Target, text: &str, timestamp: DateTime<Local>);

    fn update_dcc(&mut self, transfer: &DccView);

    /// Yes/no question (incoming DCC offers). A frontend that cannot ask
    /// synchronously answers `false` and lets the user run `/dcc get`.
    fn confirm(&mut self, prompt: &str) -> bool;

    fn default_download_dir(&self) -> PathBuf;
}

/// Frontend that forwards text to stdout. Used by the binary.
#[derive(Debug, Default)]
pub struct TerminalFrontend;

impl Frontend for TerminalFrontend {
    fn print_text(&mut self, target: &Target, text: &str, timestamp: DateTime<Local>) {
        let stamp = timestamp.format("%H:%M:%S");
        match target {
            Target::Session(_, name) => println!("{} [{}] {}", stamp, name, text),
            Target::DccChat(nick) => println!("{} [={}] {}", stamp, nick, text),
            Target::Server(_) | Target::Front => println!("{} {}", stamp, text),
        }
    }

    fn update_dcc(&mut self, transfer: &DccView) {
        tracing::debug!(
            dcc_id = transfer.id,
            state = %transfer.state,
            pos = transfer.pos,
            size = transfer.size,
            cps = transfer.cps,
            "transfer update"
        );
    }

    fn confirm(&mut self, prompt: &str) -> bool {
        println!("{} (use /dcc get or /dcc chat to accept)", prompt);
        false
    }

    fn default_download_dir(&self) -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Downloads")
    }
}
