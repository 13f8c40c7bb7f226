//! slirc - terminal front end.
//!
//! `slirc [config-dir] [network|host ...]`: reads commands from stdin and
//! prints everything to stdout.

use slirc::notify::NotifyEngine;
use slirc::prefs::{self, NetworkList, Prefs};
use slirc::ui::TerminalFrontend;
use slirc::{Client, Focus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let config_dir = args
        .next()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(prefs::config_dir);

    let prefs = Prefs::load(config_dir.join("slirc.conf")).map_err(|e| {
        error!(dir = %config_dir.display(), error = %e, "Failed to load preferences");
        e
    })?;
    let networks = NetworkList::load(config_dir.join("networks.toml")).map_err(|e| {
        error!(dir = %config_dir.display(), error = %e, "Failed to load network list");
        e
    })?;
    let notify = NotifyEngine::load(config_dir.join("notify.conf")).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load notify list");
        NotifyEngine::new()
    });

    info!(
        version = slirc::VERSION,
        config = %config_dir.display(),
        networks = networks.networks.len(),
        "Starting slirc"
    );

    let mut client = Client::new(prefs, networks, notify, Box::new(TerminalFrontend));
    client.config_dir = Some(config_dir);
    if let Err(e) = client.start_identd().await {
        warn!(error = %e, "identd not started");
    }

    for target in args {
        client.input(&Focus::default(), &format!("/server {}", target));
    }

    let (input_tx, input_rx) = mpsc::unbounded_channel();

    // Stdin reader
    {
        let tx = input_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        });
    }

    // Ctrl-C quits cleanly
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = input_tx.send(String::from("/quit"));
        }
    });

    client.run(input_rx).await;
    info!("slirc shut down");
    Ok(())
}
