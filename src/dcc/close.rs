//! Ending a transfer.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::receive::unique_path;
use super::{DccAction, DccEngine, DccId, DccState, DccType};
use crate::events::TextEvent;
use crate::prefs::Prefs;

/// Move `from` into `dir`, renaming to `name.N` on collision. Falls back to
/// copy and delete across filesystems.
fn move_into(from: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let name = from
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;
    fs::create_dir_all(dir)?;
    let mut dest = dir.join(name);
    if dest.exists() {
        dest = unique_path(&dest);
    }
    if fs::rename(from, &dest).is_err() {
        fs::copy(from, &dest)?;
        fs::remove_file(from)?;
    }
    Ok(dest)
}

impl DccEngine {
    /// Put a transfer into a terminal state, or with `destroy` also drop it
    /// from the list. Closing an already closed transfer only honours
    /// `destroy`.
    pub fn close(&mut self, prefs: &Prefs, id: DccId, state: DccState, destroy: bool) {
        let Some(idx) = self.transfers.iter().position(|t| t.id == id) else {
            return;
        };

        let t = &mut self.transfers[idx];
        let was = t.state;
        let changed = !was.is_terminal() && state != was;
        if changed {
            t.stop_io();
            if was == DccState::Active {
                match t.kind {
                    DccType::Send => self.send_cps_sum -= t.cps,
                    DccType::Recv => self.get_cps_sum -= t.cps,
                    _ => {}
                }
            }
            t.state = state;
            t.throttled = 0;
            debug!(dcc_id = id, from = %was, to = %state, "transfer closed");

            if state == DccState::Done && t.kind == DccType::Recv {
                self.move_completed(prefs, idx);
            }
        }

        if destroy {
            if let Some(t) = self.transfers.get_mut(idx) {
                t.stop_io();
            }
            self.transfers.remove(idx);
            self.actions.push(DccAction::Removed(id));
        } else if changed {
            self.actions.push(DccAction::Update(id));
        }
    }

    fn move_completed(&mut self, prefs: &Prefs, idx: usize) {
        let Some(completed) = prefs.get_path("dcc_completed_dir") else {
            return;
        };
        let t = &mut self.transfers[idx];
        if t.path.parent() == Some(completed.as_path()) {
            return;
        }
        match move_into(&t.path, &completed) {
            Ok(dest) => {
                debug!(dcc_id = t.id, to = %dest.display(), "moved to completed dir");
                t.path = dest;
            }
            Err(e) => {
                warn!(dcc_id = t.id, error = %e, "cannot move finished file");
                let event = TextEvent::DccMoveFailed {
                    file: t.file.clone(),
                    error: e.to_string(),
                };
                self.print(event);
            }
        }
    }
}
