//! Rate accounting, throttling, and the once-a-second sweep.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{DccAction, DccEngine, DccId, DccState, DccType};
use crate::events::TextEvent;
use crate::prefs::Prefs;

/// Averaging window in seconds.
pub const CPS_AVG_WINDOW: u64 = 10;

impl DccEngine {
    /// Update a transfer's rate and throttle bits. Called once a second for
    /// every active transfer.
    pub fn calc_cps(&mut self, prefs: &Prefs, id: DccId, now: Instant) {
        let send_limit = prefs.get_int("dcc_global_max_send_cps");
        let get_limit = prefs.get_int("dcc_global_max_get_cps");
        let Some(t) = self.transfers.iter_mut().find(|t| t.id == id) else {
            return;
        };

        let (pos, bit, sum, limit) = if t.kind == DccType::Send {
            // midpoint of what we sent and what the peer has
            ((t.pos + t.ack) / 2, 0x1, &mut self.send_cps_sum, send_limit)
        } else {
            (t.pos, 0x2, &mut self.get_cps_sum, get_limit)
        };

        match t.firstcpstime {
            None => t.firstcpstime = Some(now),
            Some(first) => {
                let timediff = now.saturating_duration_since(t.lastcpstime).as_millis() as f64;
                let window = (CPS_AVG_WINDOW * 1000) as f64;
                let startdiff = (now.saturating_duration_since(first).as_millis() as f64).clamp(1000.0, window);
                if timediff > 0.0 {
                    let weight = (timediff / startdiff).clamp(0.0, 1.0);
                    let posdiff = pos.saturating_sub(t.lastcpspos) as f64;
                    let old = t.cps;
                    t.cps = (posdiff * 1000.0 / timediff * weight + t.cps as f64 * (1.0 - weight)) as i64;
                    *sum += t.cps - old;
                }
            }
        }
        t.lastcpspos = pos;
        t.lastcpstime = now;

        let was = t.throttled;
        t.throttled &= !0x2;
        if limit > 0 && *sum >= limit {
            self.global_throttle |= bit;
            if t.maxcps >= 0 {
                t.throttled |= 0x2;
            }
        } else {
            self.global_throttle &= !bit;
        }
        if t.maxcps > 0 && t.cps > t.maxcps {
            t.throttled |= 0x1;
        } else {
            t.throttled &= !0x1;
        }

        if was != t.throttled {
            debug!(dcc_id = id, cps = t.cps, throttled = t.throttled, "throttle changed");
            if let Some(tx) = &t.throttle_tx {
                tx.send_replace(t.throttled);
            }
        }
    }

    /// Rates, stalls, offer timeouts, and removal of finished entries.
    pub fn check_timeouts(&mut self, prefs: &Prefs, now: Instant) {
        let stall = prefs.get_int("dcc_stall_timeout");
        let timeout = prefs.get_int("dcc_timeout");
        let remove = prefs.get_bool("dcc_remove");
        let secs = |n: i64| Duration::from_secs(n.max(0) as u64);

        let snapshot: Vec<(DccId, DccState, DccType)> =
            self.transfers.iter().map(|t| (t.id, t.state, t.kind)).collect();
        for (id, state, kind) in snapshot {
            match state {
                DccState::Active => {
                    self.calc_cps(prefs, id, now);
                    self.actions.push(DccAction::Update(id));
                    if !matches!(kind, DccType::Send | DccType::Recv) || stall <= 0 {
                        continue;
                    }
                    let Some(t) = self.get(id) else { continue };
                    // Over its own cap the worker is paused by us. The
                    // global cap lifts as soon as the rate sum drops.
                    if t.throttled & 0x1 == 0 && now.saturating_duration_since(t.last_activity) > secs(stall) {
                        info!(dcc_id = id, nick = %t.nick, file = %t.file, "transfer stalled");
                        let event = TextEvent::DccStall {
                            kind,
                            nick: t.nick.clone(),
                            file: t.file.clone(),
                        };
                        self.print(event);
                        self.close(prefs, id, DccState::Aborted, false);
                    }
                }
                DccState::Queued => {
                    if !matches!(kind, DccType::Send | DccType::ChatSend) || timeout <= 0 {
                        continue;
                    }
                    let Some(t) = self.get(id) else { continue };
                    if now.saturating_duration_since(t.offer_time) > secs(timeout) {
                        info!(dcc_id = id, nick = %t.nick, "offer timed out");
                        let event = TextEvent::DccTimeout {
                            nick: t.nick.clone(),
                            file: t.label().to_owned(),
                        };
                        self.print(event);
                        self.close(prefs, id, DccState::Aborted, false);
                    }
                }
                DccState::Done | DccState::Failed | DccState::Aborted if remove => {
                    self.close(prefs, id, state, true);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcc::Transfer;
    use crate::dcc::tests::engine;
    use crate::server::ServerId;

    fn active(engine: &mut DccEngine, kind: DccType, now: Instant) -> DccId {
        let mut t = Transfer::new(0, kind, ServerId(1), "bob", now);
        t.state = DccState::Active;
        t.size = 1 << 30;
        engine.push_transfer(t)
    }

    fn advance(engine: &mut DccEngine, id: DccId, bytes: u64) {
        let t = engine.get_mut(id).unwrap();
        t.pos += bytes;
        t.ack = t.pos;
    }

    #[tokio::test]
    async fn test_steady_rate_converges() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let start = Instant::now();
        let id = active(&mut engine, DccType::Recv, start);

        engine.calc_cps(&prefs, id, start);
        for s in 1..=20 {
            advance(&mut engine, id, 1000);
            engine.calc_cps(&prefs, id, start + Duration::from_secs(s));
        }
        let cps = engine.get(id).unwrap().cps;
        assert!((990..=1000).contains(&cps), "cps {}", cps);
        assert_eq!(engine.get_cps_sum, cps);
        assert_eq!(engine.send_cps_sum, 0);
    }

    #[tokio::test]
    async fn test_own_cap_sets_and_clears_bit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let start = Instant::now();
        let id = active(&mut engine, DccType::Send, start);
        engine.get_mut(id).unwrap().maxcps = 500;

        engine.calc_cps(&prefs, id, start);
        advance(&mut engine, id, 5000);
        engine.calc_cps(&prefs, id, start + Duration::from_secs(1));
        assert_eq!(engine.get(id).unwrap().throttled & 0x1, 0x1);

        // nothing moves while throttled; the average decays below the cap
        for s in 2..=12 {
            engine.calc_cps(&prefs, id, start + Duration::from_secs(s));
        }
        assert_eq!(engine.get(id).unwrap().throttled, 0);
    }

    #[tokio::test]
    async fn test_global_cap() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let mut prefs = Prefs::default();
        prefs.set_int("dcc_global_max_get_cps", 100).unwrap();
        let start = Instant::now();
        let id = active(&mut engine, DccType::Recv, start);

        engine.calc_cps(&prefs, id, start);
        advance(&mut engine, id, 1000);
        engine.calc_cps(&prefs, id, start + Duration::from_secs(1));
        assert_eq!(engine.global_throttle, 0x2);
        assert_eq!(engine.get(id).unwrap().throttled, 0x2);

        // a negative own cap exempts the transfer from the global one
        engine.get_mut(id).unwrap().maxcps = -1;
        advance(&mut engine, id, 1000);
        engine.calc_cps(&prefs, id, start + Duration::from_secs(2));
        assert_eq!(engine.global_throttle, 0x2);
        assert_eq!(engine.get(id).unwrap().throttled, 0);
    }

    #[tokio::test]
    async fn test_stall_and_offer_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let mut prefs = Prefs::default();
        prefs.set_int("dcc_stall_timeout", 5).unwrap();
        prefs.set_int("dcc_timeout", 10).unwrap();
        let start = Instant::now();
        let stalled = active(&mut engine, DccType::Recv, start);
        let offered = engine.push_transfer(Transfer::new(0, DccType::Send, ServerId(1), "carol", start));

        engine.check_timeouts(&prefs, start + Duration::from_secs(3));
        assert_eq!(engine.get(stalled).unwrap().state, DccState::Active);

        engine.check_timeouts(&prefs, start + Duration::from_secs(6));
        assert_eq!(engine.get(stalled).unwrap().state, DccState::Aborted);
        assert_eq!(engine.get(offered).unwrap().state, DccState::Queued);

        engine.check_timeouts(&prefs, start + Duration::from_secs(11));
        assert_eq!(engine.get(offered).unwrap().state, DccState::Aborted);
        let texts: Vec<_> = engine
            .take_actions()
            .into_iter()
            .filter_map(|a| match a {
                DccAction::Print { event, .. } => Some(event),
                _ => None,
            })
            .collect();
        assert!(texts.iter().any(|e| matches!(e, TextEvent::DccStall { .. })));
        assert!(texts.iter().any(|e| matches!(e, TextEvent::DccTimeout { .. })));
    }

    #[tokio::test]
    async fn test_stall_ignores_global_throttle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let mut prefs = Prefs::default();
        prefs.set_int("dcc_stall_timeout", 5).unwrap();
        prefs.set_int("dcc_global_max_get_cps", 100).unwrap();
        let start = Instant::now();
        let capped = active(&mut engine, DccType::Recv, start);
        let t = engine.get_mut(capped).unwrap();
        t.maxcps = 10;
        t.cps = 1000;
        let dead = active(&mut engine, DccType::Recv, start);
        engine.get_cps_sum = 1000;

        engine.check_timeouts(&prefs, start + Duration::from_secs(6));
        let t = engine.get(capped).unwrap();
        assert_eq!((t.state, t.throttled), (DccState::Active, 0x3));
        assert_eq!(engine.get(dead).unwrap().state, DccState::Aborted);
    }

    #[tokio::test]
    async fn test_remove_finished() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let mut prefs = Prefs::default();
        let now = Instant::now();
        let id = engine.push_transfer(Transfer::new(0, DccType::Recv, ServerId(1), "bob", now));
        engine.close(&prefs, id, DccState::Failed, false);

        engine.check_timeouts(&prefs, now);
        assert!(engine.get(id).is_some());

        prefs.set_bool("dcc_remove", true).unwrap();
        engine.check_timeouts(&prefs, now);
        assert!(engine.get(id).is_none());
        assert!(engine.take_actions().contains(&DccAction::Removed(id)));
    }
}
