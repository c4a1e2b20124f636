//! Event loop configuration.
//!
//! # Tuning Guidelines
//!
//! - **Short timers (< 1s)**: the default 1024 slots cover one second of
//!   millisecond ticks, so most timers land in their slot on the first pass.
//! - **Long timers**: still fine with fewer slots; a timer just survives a few
//!   extra passes over its slot.
//! - **External stop flag**: `idle_poll` bounds how long the loop sleeps
//!   without looking at it.

use core::num::NonZeroUsize;
use std::time::Duration;

use crate::runtime::timing::PowerOfTwo;

/// Configuration for an [`EventLoop`](crate::runtime::EventLoop).
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    /// Number of timing wheel slots.
    ///
    /// **Default**: 1024
    pub slots: PowerOfTwo,

    /// Maximum number of timers pending at once.
    ///
    /// **Default**: 4096
    pub max_timers: NonZeroUsize,

    /// Longest single sleep while waiting for the next timer.
    ///
    /// The external stop flag is checked at least this often.
    ///
    /// **Default**: 50ms
    pub idle_poll: Duration,
}

impl LoopConfig {
    /// Creates a configuration with validation.
    ///
    /// # Panics
    ///
    /// Panics if `slots` is not a power of two, `max_timers == 0` or `idle_poll` is zero.
    #[must_use]
    fn new_validated(slots: usize, max_timers: usize, idle_poll: Duration) -> Self {
        let Some(slots) = PowerOfTwo::new(slots) else {
            panic!("slots must be a power of two");
        };
        let Some(max_timers) = NonZeroUsize::new(max_timers) else {
            panic!("max_timers must be > 0");
        };
        assert!(!idle_poll.is_zero(), "idle_poll must be > 0");

        Self {
            slots,
            max_timers,
            idle_poll,
        }
    }

    /// Notices the stop flag quickly; for interactive tools.
    #[must_use]
    pub fn responsive() -> Self {
        Self::new_validated(1024, 4096, Duration::from_millis(5))
    }

    /// Sleeps long stretches; for mostly idle processes.
    #[must_use]
    pub fn relaxed() -> Self {
        Self::new_validated(256, 1024, Duration::from_millis(500))
    }

    /// Builder-style setter for the slot count.
    ///
    /// # Panics
    ///
    /// Panics if `slots` is not a power of two.
    #[must_use]
    pub fn with_slots(self, slots: usize) -> Self {
        Self::new_validated(slots, self.max_timers.get(), self.idle_poll)
    }

    /// Builder-style setter for the timer limit.
    #[must_use]
    pub const fn with_max_timers(mut self, max_timers: NonZeroUsize) -> Self {
        self.max_timers = max_timers;
        self
    }

    /// Builder-style setter for the idle poll interval.
    ///
    /// # Panics
    ///
    /// Panics if `idle_poll` is zero.
    #[must_use]
    pub fn with_idle_poll(self, idle_poll: Duration) -> Self {
        Self::new_validated(self.slots.get(), self.max_timers.get(), idle_poll)
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new_validated(1024, 4096, Duration::from_millis(50))
    }
}
