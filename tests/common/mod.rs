//! Integration test common infrastructure.
//!
//! A scripted IRC server on loopback, a frontend that records what it is
//! shown, and helpers to drive a [`Client`] until a condition holds.

pub mod frontend;
pub mod server;

#[allow(unused_imports)]
pub use frontend::RecordingFrontend;
#[allow(unused_imports)]
pub use server::{TestConn, TestServer};

use std::time::Duration;

use slirc::Client;
use tokio::time::{Instant, sleep};

/// Run the client's event loop until `done` holds. Send queues are flushed
/// every 20ms. Panics after `limit`.
#[allow(dead_code)]
pub async fn pump_until<F>(client: &mut Client, limit: Duration, mut done: F)
where
    F: FnMut(&Client) -> bool,
{
    let deadline = Instant::now() + limit;
    while !done(client) {
        assert!(Instant::now() < deadline, "condition not reached within {:?}", limit);
        tokio::select! {
            () = client.process_next() => {}
            _ = sleep(Duration::from_millis(20)) => client.flush_all(),
        }
    }
    client.flush_all();
}
