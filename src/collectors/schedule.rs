use std::time::{Duration, Instant};

/// Collection schedule of one descriptor.
///
/// A zero interval means "collect on every round" and the schedule is then always
/// active. A positive interval starts inactive; the collector activates it once the
/// interval has elapsed since it last fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    interval: Duration,
    active: bool,
    last_fired: Option<Instant>,
}

impl Schedule {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: interval.is_zero(),
            last_fired: None,
        }
    }

    #[must_use]
    pub const fn always() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub const fn every(interval: Duration) -> Self {
        Self::new(interval)
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether collection is gated by an interval at all.
    #[must_use]
    pub const fn is_gated(&self) -> bool {
        !self.interval.is_zero()
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }

    pub const fn activate(&mut self) {
        self.active = true;
    }

    /// Ungated schedules stay active.
    pub const fn deactivate(&mut self) {
        if self.is_gated() {
            self.active = false;
        }
    }

    /// True when `interval` has elapsed since the last fire, or it never fired.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.last_fired {
            None => true,
            Some(fired) => now.saturating_duration_since(fired) >= self.interval,
        }
    }

    pub const fn mark_fired(&mut self, now: Instant) {
        self.last_fired = Some(now);
    }

    /// Activate when expired; returns the resulting active state.
    pub fn activate_if_expired(&mut self, now: Instant) -> bool {
        if self.is_gated() && !self.active && self.is_expired(now) {
            self.activate();
        }
        self.active
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::always()
    }
}
