//! Outbound send queue with priority-based throttling.

use std::collections::VecDeque;

/// Lines are sent at most this many seconds ahead of the wall clock.
const MAX_AHEAD: i64 = 10;

/// Priority of an outgoing line: 2 default, 1 PRIVMSG/NOTICE, 0 WHO and
/// mode queries.
pub fn priority(line: &str) -> usize {
    let mut words = line.split(' ');
    let command = words.next().unwrap_or_default();
    if command.eq_ignore_ascii_case("PRIVMSG") || command.eq_ignore_ascii_case("NOTICE") {
        1
    } else if command.eq_ignore_ascii_case("WHO") {
        0
    } else if command.eq_ignore_ascii_case("MODE") {
        match words.nth(1) {
            Some(modes) if modes.starts_with(['+', '-']) => 2,
            _ => 0,
        }
    } else {
        2
    }
}

#[derive(Debug)]
pub struct SendQueue {
    queues: [VecDeque<String>; 3],
    next_send: i64,
    prev_now: i64,
    throttle: bool,
}

impl SendQueue {
    pub fn new(throttle: bool) -> Self {
        SendQueue {
            queues: Default::default(),
            next_send: 0,
            prev_now: 0,
            throttle,
        }
    }

    pub fn set_throttle(&mut self, throttle: bool) {
        self.throttle = throttle;
    }

    pub fn push(&mut self, line: String) {
        let prio = priority(&line);
        self.queues[prio].push_back(line);
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    pub fn clear(&mut self) {
        self.queues.iter_mut().for_each(VecDeque::clear);
        self.next_send = 0;
    }

    fn front(&mut self) -> Option<&mut VecDeque<String>> {
        self.queues.iter_mut().rev().find(|q| !q.is_empty())
    }

    /// Lines that may be written now, highest priority first. `now` is the
    /// wall clock in seconds.
    pub fn poll(&mut self, now: i64) -> Vec<String> {
        let mut out = Vec::new();
        if !self.throttle {
            while let Some(line) = self.front().and_then(VecDeque::pop_front) {
                out.push(line);
            }
            return out;
        }

        loop {
            let prev_now = self.prev_now;
            let next_send = &mut self.next_send;
            let Some(queue) = self.queues.iter_mut().rev().find(|q| !q.is_empty()) else {
                break;
            };
            if *next_send < now {
                *next_send = now;
            }
            if *next_send - now >= MAX_AHEAD {
                if now >= prev_now {
                    break;
                }
                // clock went backwards
                *next_send = now;
            }
            let Some(line) = queue.pop_front() else {
                break;
            };
            let rest = line.split_once(' ').map(|(_, rest)| rest.len()).unwrap_or(0);
            *next_send += 2 + (rest / 120) as i64;
            self.prev_now = now;
            out.push(line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities() {
        assert_eq!(priority("PRIVMSG #a :hi"), 1);
        assert_eq!(priority("notice bob :hi"), 1);
        assert_eq!(priority("WHO #a"), 0);
        assert_eq!(priority("MODE #a"), 0);
        assert_eq!(priority("MODE #a b"), 0);
        assert_eq!(priority("MODE #a +o bob"), 2);
        assert_eq!(priority("MODE #a -v bob"), 2);
        assert_eq!(priority("JOIN #a"), 2);
    }

    #[test]
    fn test_who_dequeued_last() {
        let mut queue = SendQueue::new(true);
        queue.push("WHO #rust".into());
        queue.push("PRIVMSG #rust :one".into());
        queue.push("PRIVMSG #rust :two".into());
        queue.push("PRIVMSG #rust :three".into());
        let sent = queue.poll(1000);
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[3], "WHO #rust");
        assert!(sent[..3].iter().all(|l| l.starts_with("PRIVMSG")));
    }

    #[test]
    fn test_throttle_holds_lines() {
        let mut queue = SendQueue::new(true);
        for i in 0..10 {
            queue.push(format!("PRIVMSG #a :{}", i));
        }
        // 2 seconds per short line, at most 10 seconds ahead
        let sent = queue.poll(1000);
        assert_eq!(sent.len(), 5);
        assert_eq!(queue.len(), 5);
        assert!(queue.poll(1000).is_empty());
        assert_eq!(queue.poll(1002).len(), 1);
    }

    #[test]
    fn test_long_lines_cost_more() {
        let mut queue = SendQueue::new(true);
        queue.push(format!("PRIVMSG #a :{}", "x".repeat(480)));
        queue.push("PRIVMSG #a :short".into());
        queue.push("PRIVMSG #a :short".into());
        // 2 + 484/120 = 6 seconds for the first line, then 2 each
        let sent = queue.poll(0);
        assert_eq!(sent.len(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clock_skew_resets() {
        let mut queue = SendQueue::new(true);
        for _ in 0..6 {
            queue.push("PRIVMSG #a :x".into());
        }
        assert_eq!(queue.poll(1000).len(), 5);
        // Clock jumped backwards: the schedule restarts from now.
        assert_eq!(queue.poll(500).len(), 1);
    }

    #[test]
    fn test_unthrottled_sends_everything() {
        let mut queue = SendQueue::new(false);
        for _ in 0..50 {
            queue.push("PRIVMSG #a :x".into());
        }
        queue.push("JOIN #b".into());
        let sent = queue.poll(0);
        assert_eq!(sent.len(), 51);
        assert_eq!(sent[0], "JOIN #b");
    }
}
