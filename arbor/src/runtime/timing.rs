//! Timing primitives: typed units, the clock seam and the timing wheel.
//!
//! The wheel works in whole ticks of the loop clock (one tick per
//! millisecond); the typed [`Duration`] and [`MonoInstant`] keep units from
//! mixing at the edges.

mod time;
pub(crate) mod wheel;

pub use time::{Clock, Duration, ManualClock, Millis, MonoInstant, SystemClock, TimeUnit};
pub use wheel::{PowerOfTwo, TimerHandle, Wheel, WheelConfig, WheelError};
