//! # Motor watchdog
//!
//! Fail-safe timer that cuts motor power if no control message arrives
//! within a deadline. The watchdog is fed by motor and watchdog-config
//! messages only; ping traffic deliberately does not feed it. All methods
//! take the current time explicitly so the timer can be driven by simulated
//! time under test.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Watchdog timer over the incoming control message stream.
pub struct Watchdog {
    enabled: bool,
    timeout: Duration,
    last_feed: Instant,
    tripped: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Watchdog {
    pub fn new(enabled: bool, timeout_s: f64, now: Instant) -> Self {
        Self {
            enabled,
            timeout: Duration::from_secs_f64(timeout_s),
            last_feed: now,
            tripped: false,
        }
    }

    /// Reset the timer. Called on every accepted motor message.
    pub fn feed(&mut self, now: Instant) {
        self.last_feed = now;
        self.tripped = false;
    }

    /// Apply new settings. Receiving a settings message also counts as a
    /// feed.
    pub fn configure(&mut self, enabled: bool, timeout_s: f64, now: Instant) {
        self.enabled = enabled;
        self.timeout = Duration::from_secs_f64(timeout_s);
        self.feed(now);
    }

    /// Check the timer, returning `true` exactly once when the deadline
    /// passes. Further checks return `false` until the next feed, so the
    /// caller's fail-safe action and its log line fire on the trip edge
    /// only.
    pub fn check(&mut self, now: Instant) -> bool {
        if !self.enabled || self.tripped {
            return false;
        }

        if now.duration_since(self.last_feed) >= self.timeout {
            self.tripped = true;
            return true;
        }

        false
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_trips_once_after_timeout() {
        let t0 = Instant::now();
        let mut wd = Watchdog::new(true, 1.0, t0);

        assert!(!wd.check(t0 + Duration::from_millis(500)));

        // Trips exactly once at the deadline
        assert!(wd.check(t0 + Duration::from_millis(1000)));
        assert!(wd.is_tripped());

        // Not re-asserted on subsequent ticks
        assert!(!wd.check(t0 + Duration::from_millis(1500)));
        assert!(!wd.check(t0 + Duration::from_millis(5000)));
    }

    #[test]
    fn test_feed_resets_timer() {
        let t0 = Instant::now();
        let mut wd = Watchdog::new(true, 1.0, t0);

        wd.feed(t0 + Duration::from_millis(900));
        assert!(!wd.check(t0 + Duration::from_millis(1500)));

        // Expires relative to the last feed
        assert!(wd.check(t0 + Duration::from_millis(1900)));

        // Feeding clears the tripped state and re-arms
        wd.feed(t0 + Duration::from_millis(2000));
        assert!(!wd.is_tripped());
        assert!(wd.check(t0 + Duration::from_millis(3000)));
    }

    #[test]
    fn test_disabled_never_trips() {
        let t0 = Instant::now();
        let mut wd = Watchdog::new(false, 1.0, t0);

        assert!(!wd.check(t0 + Duration::from_secs(100)));

        // Enabling via configure also feeds
        wd.configure(true, 1.0, t0 + Duration::from_secs(100));
        assert!(!wd.check(t0 + Duration::from_millis(100_500)));
        assert!(wd.check(t0 + Duration::from_secs(101)));
    }
}
