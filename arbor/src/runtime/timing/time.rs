//! Strongly-typed time units, durations and instants, plus the loop's clock seam.

use core::fmt;
use core::marker::PhantomData;
use std::cell::Cell;
use std::rc::Rc;

/// Marker trait for a time unit.
pub trait TimeUnit {
    /// Human-readable suffix for logs.
    const NAME: &'static str;
    /// Nanoseconds per unit.
    const NANOS: u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Millis {}
impl TimeUnit for Millis {
    const NAME: &'static str = "ms";
    const NANOS: u64 = 1_000_000;
}

/// Strongly-typed duration in a given unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Duration<U: TimeUnit>(u64, PhantomData<U>);

/// Monotonic instant in a given unit, measured from the owning clock's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct MonoInstant<U: TimeUnit>(u64, PhantomData<U>);

impl<U: TimeUnit> Duration<U> {
    pub const ZERO: Self = Self::new(0);

    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value, PhantomData)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Converts from [`std::time::Duration`], rounding any partial unit up.
    ///
    /// Rounding up keeps "fire no earlier than" requests honest. Saturates at `u64::MAX`.
    #[must_use]
    pub fn from_std_ceil(d: std::time::Duration) -> Self {
        let units = d.as_nanos().div_ceil(u128::from(U::NANOS));
        Self::new(u64::try_from(units).unwrap_or(u64::MAX))
    }

    /// Converts to [`std::time::Duration`].
    #[must_use]
    pub fn to_std(self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.saturating_mul(U::NANOS))
    }
}

impl<U: TimeUnit> fmt::Display for Duration<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.0, U::NAME)
    }
}

impl<U: TimeUnit> MonoInstant<U> {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value, PhantomData)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[inline]
    #[must_use]
    pub const fn saturating_since(self, earlier: Self) -> Duration<U> {
        Duration::new(self.0.saturating_sub(earlier.0))
    }
}

impl<U: TimeUnit> core::ops::Add<Duration<U>> for MonoInstant<U> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Duration<U>) -> Self::Output {
        Self::new(self.0.saturating_add(rhs.0))
    }
}

impl<U: TimeUnit> core::ops::Sub for MonoInstant<U> {
    type Output = Duration<U>;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_since(rhs)
    }
}

/// Time source for the event loop.
///
/// `now` must be monotonic, and `sleep_until` must not return before
/// `deadline` as observed by `now`.
pub trait Clock {
    fn now(&self) -> MonoInstant<Millis>;
    fn sleep_until(&self, deadline: MonoInstant<Millis>);
}

/// Wall clock backed by the TSC where available (`minstant`).
///
/// Instants count whole milliseconds since the clock was created.
#[derive(Clone, Copy)]
pub struct SystemClock {
    origin: minstant::Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: minstant::Instant::now(),
        }
    }
}

impl fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemClock").field("now", &self.now()).finish()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> MonoInstant<Millis> {
        let ms = self.origin.elapsed().as_millis();
        MonoInstant::new(u64::try_from(ms).unwrap_or(u64::MAX))
    }

    fn sleep_until(&self, deadline: MonoInstant<Millis>) {
        // `now` truncates, so sleeping the whole difference never undershoots.
        let remaining = deadline.saturating_since(self.now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining.to_std());
        }
    }
}

/// Virtual clock for deterministic tests and simulations.
///
/// Clones share the same time. Sleeping jumps straight to the deadline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration<Millis>) {
        self.now.set(self.now.get().saturating_add(by.as_u64()));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> MonoInstant<Millis> {
        MonoInstant::new(self.now.get())
    }

    fn sleep_until(&self, deadline: MonoInstant<Millis>) {
        self.now.set(self.now.get().max(deadline.as_u64()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Micros {}
    impl TimeUnit for Micros {
        const NAME: &'static str = "us";
        const NANOS: u64 = 1_000;
    }

    #[test]
    fn from_std_rounds_up() {
        let d = Duration::<Millis>::from_std_ceil(std::time::Duration::from_micros(1_001));
        assert_eq!(d.as_u64(), 2);
        let exact = Duration::<Millis>::from_std_ceil(std::time::Duration::from_secs(1));
        assert_eq!(exact.as_u64(), 1_000);
        let micros = Duration::<Micros>::from_std_ceil(std::time::Duration::from_nanos(1));
        assert_eq!(micros.as_u64(), 1);
    }

    #[test]
    fn instant_arithmetic_saturates() {
        let a = MonoInstant::<Millis>::new(5);
        let b = MonoInstant::<Millis>::new(9);
        assert_eq!((b - a).as_u64(), 4);
        assert_eq!((a - b).as_u64(), 0);
        let end = MonoInstant::<Millis>::new(u64::MAX) + Duration::new(1);
        assert_eq!(end.as_u64(), u64::MAX);
    }

    #[test]
    fn manual_clock_is_shared_and_monotonic() {
        let clock = ManualClock::new();
        let view = clock.clone();
        clock.advance(Duration::new(10));
        assert_eq!(view.now().as_u64(), 10);

        view.sleep_until(MonoInstant::new(25));
        assert_eq!(clock.now().as_u64(), 25);
        view.sleep_until(MonoInstant::new(3));
        assert_eq!(clock.now().as_u64(), 25, "sleeping into the past is a no-op");
    }

    #[test]
    fn system_clock_sleep_reaches_deadline() {
        let clock = SystemClock::new();
        let deadline = clock.now() + Duration::new(5);
        clock.sleep_until(deadline);
        assert!(clock.now() >= deadline);
    }

    #[test]
    fn display_uses_unit_suffix() {
        assert_eq!(Duration::<Millis>::new(1000).to_string(), "1000ms");
        assert_eq!(Duration::<Micros>::new(3).to_string(), "3us");
    }
}
