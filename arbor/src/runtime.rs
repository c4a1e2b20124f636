//! Event loop runtime.
//!
//! - `timing`: time units, clocks and the timing wheel (single-threaded, owned by the loop).
//! - `config`: loop tuning knobs.
//! - `event_loop`: the scheduler that dispatches due callbacks until told to stop.

pub mod config;
pub mod event_loop;
pub mod timing;

pub use config::LoopConfig;
pub use event_loop::{EventLoop, LoopError, LoopState, TimerId};
