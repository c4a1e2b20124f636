//! Single-threaded cooperative event loop.
//!
//! # Architecture
//!
//! ```text
//!   schedule_once / schedule_repeating          post (zero delay)
//!              │                                      │
//!              ▼                                      │
//!     ┌─────────────────┐   due at `now`    ┌─────────▼─────────┐
//!     │  timing wheel   │ ────────────────> │ ready queue       │
//!     │ (slab + slots)  │                   │ sorted (due, id)  │
//!     └─────────────────┘                   └─────────┬─────────┘
//!              ▲                                      │ one per iteration
//!              │ repeating: reschedule                ▼
//!              └──────────────────────────────── dispatch(cb)
//! ```
//!
//! Each iteration of [`EventLoop::run`] first looks for a termination request
//! (from [`EventLoop::exit`] or the external stop flag), then advances the
//! wheel to the clock's `now`, then dispatches at most one ready callback. With
//! nothing ready it sleeps until the next deadline, but never longer than
//! [`LoopConfig::idle_poll`].
//!
//! Callbacks get `&mut EventLoop` (to schedule, cancel or exit) plus the
//! caller's `&mut S` state passed to `run`.
//!
//! # Timing guarantee
//!
//! A timer scheduled with delay `d` fires no earlier than `d` after it was
//! scheduled. Delays are rounded up to whole milliseconds and anchored one
//! tick after the current one, because the clock truncates to milliseconds.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::runtime::config::LoopConfig;
use crate::runtime::timing::{
    Clock, Duration, Millis, MonoInstant, SystemClock, TimerHandle, Wheel, WheelConfig, WheelError,
};
use crate::trace::{debug, trace, warn};

/// Identifier of a scheduled callback, unique per loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Errors from [`EventLoop`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoopError {
    /// `run` was called while the loop is already running.
    #[error("event loop is already running")]
    AlreadyRunning,
    /// The loop has terminated and accepts no more work.
    #[error("event loop has terminated")]
    Terminated,
    /// Repeating timers need a non-zero interval.
    #[error("repeating timer interval must be non-zero")]
    ZeroInterval,
    /// The timing wheel refused the timer.
    #[error("failed to schedule timer: {0}")]
    Timer(#[from] WheelError),
}

/// Lifecycle of an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, `run` not called yet.
    Idle,
    /// Inside `run`, waiting for the next callback.
    Waiting,
    /// Inside `run`, executing a callback.
    Dispatching,
    /// `run` has returned; terminal.
    Terminated,
}

type OnceFn<S, C> = Box<dyn FnOnce(&mut EventLoop<S, C>, &mut S)>;
type RepeatFn<S, C> = Box<dyn FnMut(&mut EventLoop<S, C>, &mut S) -> ControlFlow<()>>;

enum Task<S, C: Clock> {
    Once(OnceFn<S, C>),
    Repeating {
        interval: Duration<Millis>,
        callback: RepeatFn<S, C>,
    },
}

/// Payload stored in the wheel.
struct Scheduled<S, C: Clock> {
    id: TimerId,
    task: Task<S, C>,
}

/// A callback whose deadline has passed, waiting for its turn.
struct Ready<S, C: Clock> {
    due: u64,
    id: TimerId,
    task: Task<S, C>,
}

/// Bookkeeping for the callback currently executing.
#[derive(Clone, Copy)]
struct Current {
    id: TimerId,
    repeating: bool,
    cancelled: bool,
}

/// Single-threaded cooperative scheduler of timed callbacks.
///
/// `S` is the state handed to every callback; `C` is the time source.
pub struct EventLoop<S, C: Clock = SystemClock> {
    config: LoopConfig,
    clock: C,
    origin: MonoInstant<Millis>,
    wheel: Wheel<Scheduled<S, C>>,
    /// Wheel handles of pending timers, for cancellation.
    handles: HashMap<TimerId, TimerHandle<Scheduled<S, C>>>,
    ready: VecDeque<Ready<S, C>>,
    current: Option<Current>,
    next_id: u64,
    state: LoopState,
    exit_code: Option<i32>,
    stop: Arc<AtomicBool>,
}

impl<S> EventLoop<S, SystemClock> {
    /// Creates a loop driven by the wall clock.
    #[must_use]
    pub fn new(config: LoopConfig) -> Self {
        Self::with_clock(config, SystemClock::new())
    }
}

impl<S, C: Clock> EventLoop<S, C> {
    /// Creates a loop driven by `clock`.
    #[must_use]
    pub fn with_clock(config: LoopConfig, clock: C) -> Self {
        let origin = clock.now();
        Self {
            wheel: Wheel::new(WheelConfig {
                slots: config.slots,
                capacity: config.max_timers,
            }),
            config,
            clock,
            origin,
            handles: HashMap::new(),
            ready: VecDeque::new(),
            current: None,
            next_id: 0,
            state: LoopState::Idle,
            exit_code: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    /// Callbacks scheduled but not yet dispatched.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.wheel.len() + self.ready.len()
    }

    /// Time since the loop was created, as seen by its clock.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        (self.clock.now() - self.origin).to_std()
    }

    /// Flag that makes `run` return status 0 on its next iteration once set.
    ///
    /// This is the only part of the loop that may be touched from another thread.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Schedules `callback` to run exactly once, no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// [`LoopError::Terminated`] after the loop finished,
    /// [`LoopError::Timer`] when `max_timers` are already pending.
    pub fn schedule_once(
        &mut self,
        delay: std::time::Duration,
        callback: impl FnOnce(&mut Self, &mut S) + 'static,
    ) -> Result<TimerId, LoopError> {
        let delay = Duration::from_std_ceil(delay);
        let id = self.allocate_id()?;
        self.enqueue(id, delay, Task::Once(Box::new(callback)))?;
        Ok(id)
    }

    /// Schedules `callback` to run on the next iteration.
    pub fn post(
        &mut self,
        callback: impl FnOnce(&mut Self, &mut S) + 'static,
    ) -> Result<TimerId, LoopError> {
        self.schedule_once(std::time::Duration::ZERO, callback)
    }

    /// Schedules `callback` every `interval` until it returns [`ControlFlow::Break`]
    /// or the timer is cancelled.
    ///
    /// Each run is rescheduled relative to when the previous run finished.
    ///
    /// # Errors
    ///
    /// [`LoopError::ZeroInterval`] for a zero interval, otherwise as
    /// [`schedule_once`](Self::schedule_once).
    pub fn schedule_repeating(
        &mut self,
        interval: std::time::Duration,
        callback: impl FnMut(&mut Self, &mut S) -> ControlFlow<()> + 'static,
    ) -> Result<TimerId, LoopError> {
        let interval = Duration::from_std_ceil(interval);
        if interval.is_zero() {
            return Err(LoopError::ZeroInterval);
        }
        let id = self.allocate_id()?;
        let task = Task::Repeating {
            interval,
            callback: Box::new(callback),
        };
        self.enqueue(id, interval, task)?;
        Ok(id)
    }

    /// Cancels a pending timer. Returns false if it already fired or was cancelled.
    ///
    /// A repeating timer may cancel itself from inside its own callback.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if let Some(handle) = self.handles.remove(&id) {
            if self.wheel.cancel(handle).is_some() {
                trace!(timer = %id, "timer cancelled");
                return true;
            }
        }
        if let Some(pos) = self.ready.iter().position(|r| r.id == id) {
            self.ready.remove(pos);
            trace!(timer = %id, "ready callback cancelled");
            return true;
        }
        match &mut self.current {
            Some(current) if current.id == id && current.repeating && !current.cancelled => {
                current.cancelled = true;
                true
            }
            _ => false,
        }
    }

    /// Asks `run` to return `code` once the current callback finishes.
    ///
    /// Ignored unless the loop is running. Callbacks still queued are not dispatched.
    pub fn exit(&mut self, code: i32) {
        match self.state {
            LoopState::Waiting | LoopState::Dispatching => {
                debug!(code, "termination requested");
                self.exit_code = Some(code);
            }
            LoopState::Idle | LoopState::Terminated => {
                debug!(code, state = ?self.state, "termination request ignored: loop not running");
            }
        }
    }

    /// Equivalent to `exit(0)`.
    pub fn request_termination(&mut self) {
        self.exit(0);
    }

    /// Runs the loop until termination is requested; returns the exit status.
    ///
    /// # Errors
    ///
    /// [`LoopError::AlreadyRunning`] when called from inside a callback,
    /// [`LoopError::Terminated`] when the loop already ran to completion.
    pub fn run(&mut self, state: &mut S) -> Result<i32, LoopError> {
        match self.state {
            LoopState::Idle => {}
            LoopState::Waiting | LoopState::Dispatching => return Err(LoopError::AlreadyRunning),
            LoopState::Terminated => return Err(LoopError::Terminated),
        }

        self.state = LoopState::Waiting;
        self.exit_code = None;
        debug!(pending = self.pending(), "event loop started");

        let code = loop {
            if let Some(code) = self.exit_code.take() {
                break code;
            }
            if self.stop.load(Ordering::Acquire) {
                debug!("stop flag set");
                break 0;
            }

            self.advance();
            match self.ready.pop_front() {
                Some(ready) => self.dispatch(ready, state),
                None => self.wait(),
            }
        };

        self.state = LoopState::Terminated;
        debug!(
            code,
            elapsed = ?self.elapsed(),
            undispatched = self.pending(),
            max_fired_per_tick = self.wheel.max_fired_per_tick,
            max_slot_depth = self.wheel.max_slot_depth,
            slab_high_water = self.wheel.slab_high_water,
            "event loop terminated"
        );
        Ok(code)
    }

    fn allocate_id(&mut self) -> Result<TimerId, LoopError> {
        if self.state == LoopState::Terminated {
            return Err(LoopError::Terminated);
        }
        let id = TimerId(self.next_id);
        self.next_id += 1;
        Ok(id)
    }

    /// Places `task` on the ready queue (zero delay) or in the wheel.
    fn enqueue(
        &mut self,
        id: TimerId,
        delay: Duration<Millis>,
        task: Task<S, C>,
    ) -> Result<(), LoopError> {
        let now = self.clock.now().as_u64();
        if delay.is_zero() {
            self.push_ready(Ready { due: now, id, task });
            trace!(timer = %id, "callback posted");
            return Ok(());
        }

        let deadline = now
            .max(self.wheel.cursor())
            .saturating_add(1)
            .saturating_add(delay.as_u64());
        let handle = self.wheel.schedule_at(deadline, Scheduled { id, task })?;
        self.handles.insert(id, handle);
        trace!(timer = %id, %delay, deadline, "timer scheduled");
        Ok(())
    }

    /// Inserts keeping the queue sorted by `(due, id)`.
    fn push_ready(&mut self, ready: Ready<S, C>) {
        let key = (ready.due, ready.id);
        let pos = self.ready.partition_point(|r| (r.due, r.id) <= key);
        self.ready.insert(pos, ready);
    }

    /// Moves every timer due at the clock's `now` onto the ready queue.
    fn advance(&mut self) {
        let now = self.clock.now().as_u64();
        let mut fired = Vec::new();
        self.wheel.tick(now, |_, due, scheduled| fired.push((due, scheduled)));
        for (due, Scheduled { id, task }) in fired {
            self.handles.remove(&id);
            self.push_ready(Ready { due, id, task });
        }
    }

    fn dispatch(&mut self, ready: Ready<S, C>, state: &mut S) {
        let Ready { due, id, task } = ready;
        self.state = LoopState::Dispatching;
        trace!(timer = %id, due, now = self.clock.now().as_u64(), "dispatching");

        match task {
            Task::Once(callback) => {
                self.current = Some(Current {
                    id,
                    repeating: false,
                    cancelled: false,
                });
                callback(self, state);
                self.current = None;
            }
            Task::Repeating {
                interval,
                mut callback,
            } => {
                self.current = Some(Current {
                    id,
                    repeating: true,
                    cancelled: false,
                });
                let flow = callback(self, state);
                let cancelled = self.current.take().is_some_and(|c| c.cancelled);

                if flow.is_continue() && !cancelled {
                    if let Err(e) = self.enqueue(id, interval, Task::Repeating { interval, callback }) {
                        warn!(timer = %id, error = %e, "failed to reschedule repeating timer");
                    }
                } else {
                    trace!(timer = %id, "repeating timer finished");
                }
            }
        }

        self.state = LoopState::Waiting;
    }

    /// Sleeps until the next deadline, capped by the idle poll interval.
    fn wait(&mut self) {
        let now = self.clock.now();
        let poll_limit = now + Duration::from_std_ceil(self.config.idle_poll);
        let until = self
            .wheel
            .next_deadline()
            .map_or(poll_limit, |deadline| MonoInstant::new(deadline).min(poll_limit));
        self.clock.sleep_until(until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::timing::ManualClock;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration as StdDuration;

    type TestLoop<S> = EventLoop<S, ManualClock>;

    fn manual_loop<S>() -> (TestLoop<S>, ManualClock) {
        let clock = ManualClock::new();
        (EventLoop::with_clock(LoopConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn one_shot_fires_once_not_early() {
        let (mut lp, clock) = manual_loop::<u32>();
        lp.schedule_once(StdDuration::from_millis(1000), |lp, fired: &mut u32| {
            *fired += 1;
            lp.request_termination();
        })
        .unwrap();

        let mut fired = 0;
        assert_eq!(lp.run(&mut fired), Ok(0));
        assert_eq!(fired, 1);
        assert!(clock.now().as_u64() >= 1000);
        assert!(lp.elapsed() >= StdDuration::from_secs(1));
        assert_eq!(lp.state(), LoopState::Terminated);
    }

    #[test]
    fn fires_in_due_order_then_schedule_order() {
        let (mut lp, _clock) = manual_loop::<Vec<&'static str>>();
        lp.schedule_once(StdDuration::from_millis(30), |_, log: &mut Vec<_>| log.push("late"))
            .unwrap();
        lp.schedule_once(StdDuration::from_millis(10), |_, log: &mut Vec<_>| log.push("a"))
            .unwrap();
        lp.schedule_once(StdDuration::from_millis(10), |_, log: &mut Vec<_>| log.push("b"))
            .unwrap();
        lp.post(|_, log: &mut Vec<_>| log.push("posted")).unwrap();
        lp.schedule_once(StdDuration::from_millis(40), |lp, _| lp.request_termination())
            .unwrap();

        let mut log = Vec::new();
        lp.run(&mut log).unwrap();
        assert_eq!(log, ["posted", "a", "b", "late"]);
    }

    #[test]
    fn termination_waits_for_current_callback_and_skips_the_rest() {
        let (mut lp, _clock) = manual_loop::<Vec<u32>>();
        lp.schedule_once(StdDuration::from_millis(5), |lp, log: &mut Vec<u32>| {
            lp.request_termination();
            log.push(1);
        })
        .unwrap();
        lp.schedule_once(StdDuration::from_millis(5), |_, log: &mut Vec<u32>| log.push(2))
            .unwrap();

        let mut log = Vec::new();
        assert_eq!(lp.run(&mut log), Ok(0));
        assert_eq!(log, [1], "callback completes; later ones are not dispatched");
        assert_eq!(lp.pending(), 1);
    }

    #[test]
    fn exit_code_is_returned() {
        let (mut lp, _clock) = manual_loop::<()>();
        lp.schedule_once(StdDuration::from_millis(1), |lp, _| lp.exit(3))
            .unwrap();
        assert_eq!(lp.run(&mut ()), Ok(3));
    }

    #[test]
    fn exit_before_run_is_ignored() {
        let (mut lp, _clock) = manual_loop::<()>();
        lp.request_termination();
        lp.schedule_once(StdDuration::from_millis(10), |lp, _| lp.exit(7))
            .unwrap();
        assert_eq!(lp.run(&mut ()), Ok(7));
    }

    #[test]
    fn cancel_prevents_fire() {
        let (mut lp, _clock) = manual_loop::<u32>();
        let doomed = lp
            .schedule_once(StdDuration::from_millis(5), |_, n: &mut u32| *n += 100)
            .unwrap();
        let posted = lp.post(|_, n: &mut u32| *n += 10).unwrap();
        assert!(lp.cancel(doomed));
        assert!(lp.cancel(posted));
        assert!(!lp.cancel(doomed), "second cancel reports nothing to do");
        lp.schedule_once(StdDuration::from_millis(10), |lp, _| lp.request_termination())
            .unwrap();

        let mut n = 0;
        lp.run(&mut n).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn repeating_timer_stops_on_break() {
        let (mut lp, clock) = manual_loop::<Vec<u64>>();
        let ticks = clock.clone();
        lp.schedule_repeating(StdDuration::from_millis(100), move |lp, seen: &mut Vec<u64>| {
            seen.push(ticks.now().as_u64());
            if seen.len() == 3 {
                lp.request_termination();
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

        let mut seen = Vec::new();
        lp.run(&mut seen).unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0] >= 100);
        for pair in seen.windows(2) {
            assert!(pair[1] - pair[0] >= 100, "fired early: {seen:?}");
        }
        assert_eq!(lp.pending(), 0);
    }

    #[test]
    fn repeating_timer_can_cancel_itself() {
        let (mut lp, _clock) = manual_loop::<u32>();
        let id = Rc::new(RefCell::new(None));
        let own_id = Rc::clone(&id);
        let timer = lp
            .schedule_repeating(StdDuration::from_millis(10), move |lp, n: &mut u32| {
                *n += 1;
                if *n == 2 {
                    let me = own_id.borrow().expect("id stored before run");
                    assert!(lp.cancel(me));
                }
                ControlFlow::Continue(())
            })
            .unwrap();
        *id.borrow_mut() = Some(timer);
        lp.schedule_once(StdDuration::from_millis(100), |lp, _| lp.request_termination())
            .unwrap();

        let mut n = 0;
        lp.run(&mut n).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn zero_interval_rejected() {
        let (mut lp, _clock) = manual_loop::<()>();
        let err = lp
            .schedule_repeating(StdDuration::ZERO, |_, _| ControlFlow::Continue(()))
            .unwrap_err();
        assert_eq!(err, LoopError::ZeroInterval);
    }

    #[test]
    fn nested_run_is_rejected() {
        let (mut lp, _clock) = manual_loop::<Option<Result<i32, LoopError>>>();
        lp.post(|lp, out: &mut Option<Result<i32, LoopError>>| {
            let mut inner = None;
            *out = Some(lp.run(&mut inner));
            lp.request_termination();
        })
        .unwrap();

        let mut out = None;
        assert_eq!(lp.run(&mut out), Ok(0));
        assert_eq!(out, Some(Err(LoopError::AlreadyRunning)));
    }

    #[test]
    fn terminated_loop_rejects_work() {
        let (mut lp, _clock) = manual_loop::<()>();
        lp.post(|lp, _| lp.request_termination()).unwrap();
        lp.run(&mut ()).unwrap();

        assert_eq!(lp.run(&mut ()), Err(LoopError::Terminated));
        assert_eq!(
            lp.schedule_once(StdDuration::from_millis(1), |_, _| {}),
            Err(LoopError::Terminated)
        );
    }

    #[test]
    fn stop_flag_ends_run() {
        let (mut lp, _clock) = manual_loop::<u32>();
        let flag = lp.stop_flag();
        lp.schedule_repeating(StdDuration::from_millis(10), move |_, n: &mut u32| {
            *n += 1;
            if *n == 4 {
                flag.store(true, Ordering::Release);
            }
            ControlFlow::Continue(())
        })
        .unwrap();

        let mut n = 0;
        assert_eq!(lp.run(&mut n), Ok(0));
        assert_eq!(n, 4);
    }

    #[test]
    fn capacity_exhaustion_is_reported() {
        let clock = ManualClock::new();
        let config = LoopConfig::default().with_max_timers(core::num::NonZeroUsize::new(1).unwrap());
        let mut lp: TestLoop<()> = EventLoop::with_clock(config, clock);
        lp.schedule_once(StdDuration::from_millis(1), |_, _| {}).unwrap();
        assert_eq!(
            lp.schedule_once(StdDuration::from_millis(1), |_, _| {}),
            Err(LoopError::Timer(WheelError::Capacity))
        );
    }

    #[test]
    fn callbacks_can_schedule_more_work() {
        let (mut lp, clock) = manual_loop::<Vec<u64>>();
        let at = clock.clone();
        lp.schedule_once(StdDuration::from_millis(20), move |lp, log: &mut Vec<u64>| {
            log.push(at.now().as_u64());
            let at = at.clone();
            lp.schedule_once(StdDuration::from_millis(20), move |lp, log: &mut Vec<u64>| {
                log.push(at.now().as_u64());
                lp.request_termination();
            })
            .unwrap();
        })
        .unwrap();

        let mut log = Vec::new();
        lp.run(&mut log).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[1] - log[0] >= 20);
    }
}
