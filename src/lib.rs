//! slirc - Straylight IRC client engine
//!
//! Server sessions, channel mode tracking, notify lists and DCC file
//! transfers, driven by one event loop. Drawing is left to a [`ui::Frontend`].

pub mod client;
pub mod command;
pub mod dcc;
pub mod error;
pub mod events;
pub mod mode;
pub mod net;
pub mod notify;
pub mod prefs;
pub mod server;
pub mod ui;

pub use client::{Client, Focus};

/// Client version, as `%v` and CTCP VERSION report it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
