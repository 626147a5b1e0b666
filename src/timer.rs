//! One-shot timer wheel keyed by wall-clock deadline .
//!
//! Deadlines are tracked with `Instant` rather than `SystemTime`: the
//! spec's "wall-clock seconds" requirement only needs monotonic ordering,
//! which `Instant` gives without the leap-second/clock-step hazard a
//! `SystemTime`-based deadline would carry.

use std::time::{Duration, Instant};

pub type TimerId = u64;

struct Entry<T> {
    id: TimerId,
    deadline: Instant,
    data: T,
}

/// Generic over the payload carried by a fired timer. The source's
/// `(callback, data)` pair becomes a typed payload the caller matches on
/// after `tick` returns it — see `reactor::TimerAction`.
pub struct TimerWheel<T> {
    entries: Vec<Entry<T>>,
    next_id: TimerId,
}

impl<T> TimerWheel<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), next_id: 0 }
    }

    /// Schedules `data` to fire at `now + delay`. Returns a handle usable
    /// with `cancel`.
    pub fn start(&mut self, delay: Duration, data: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry { id, deadline: Instant::now() + delay, data });
        id
    }

    /// Removes a pending timer without firing it. A no-op if the timer
    /// already fired or was never present.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos).data)
    }

    /// The earliest pending deadline, or `None` if no timers are armed.
    pub fn min_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Fires and removes every timer whose deadline has passed, in
    /// insertion order among the ones that fire. Surviving timers are
    /// left untouched.
    pub fn tick(&mut self, now: Instant) -> Vec<T> {
        let mut fired = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].deadline <= now {
                fired.push(self.entries.remove(i).data);
            } else {
                i += 1;
            }
        }
        fired
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_insertion_order_among_ready_timers() {
        let mut wheel = TimerWheel::new();
        wheel.start(Duration::ZERO, "a");
        wheel.start(Duration::ZERO, "b");
        wheel.start(Duration::ZERO, "c");
        let fired = wheel.tick(Instant::now());
        assert_eq!(fired, vec!["a", "b", "c"]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut wheel = TimerWheel::new();
        let id = wheel.start(Duration::ZERO, "doomed");
        assert_eq!(wheel.cancel(id), Some("doomed"));
        let fired = wheel.tick(Instant::now());
        assert!(fired.is_empty());
    }

    #[test]
    fn cancel_after_fire_is_a_no_op() {
        let mut wheel = TimerWheel::new();
        let id = wheel.start(Duration::ZERO, "gone");
        let fired = wheel.tick(Instant::now());
        assert_eq!(fired, vec!["gone"]);
        assert_eq!(wheel.cancel(id), None);
    }

    #[test]
    fn min_deadline_reflects_surviving_timers() {
        let mut wheel: TimerWheel<&str> = TimerWheel::new();
        assert_eq!(wheel.min_deadline(), None);
        let soon = wheel.start(Duration::from_millis(10), "soon");
        let later = wheel.start(Duration::from_secs(10), "later");
        assert!(wheel.min_deadline().is_some());
        wheel.cancel(soon);
        wheel.cancel(later);
        assert_eq!(wheel.min_deadline(), None);
    }

    #[test]
    fn only_expired_timers_fire() {
        let mut wheel = TimerWheel::new();
        wheel.start(Duration::ZERO, "expired");
        wheel.start(Duration::from_secs(60), "future");
        let fired = wheel.tick(Instant::now());
        assert_eq!(fired, vec!["expired"]);
        assert!(wheel.min_deadline().is_some());
    }
}
