//! Hashed timing wheel with O(1) schedule/cancel.
//!
//! Single-level, power-of-two slots over a generational slab. One tick is one
//! unit of the loop clock. Deadlines further out than one rotation simply stay
//! in their slot until a pass finds them due, so there is no maximum delay.

use core::fmt;
use core::num::NonZeroUsize;

use thiserror::Error;

use crate::slab::{Slab, SlabKey};

/// Errors from scheduling on a [`Wheel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WheelError {
    /// All timer slots are in use.
    #[error("timer capacity exhausted")]
    Capacity,
}

/// Timer node stored in the slab.
pub struct TimerNode<T> {
    payload: T,
    /// Absolute deadline in wheel ticks.
    deadline: u64,
    /// Next timer in the same slot list.
    next: Option<SlabKey<TimerNode<T>>>,
    /// Previous timer in the slot list (None for head).
    prev: Option<SlabKey<TimerNode<T>>>,
}

/// Handle returned to callers; stale once the timer fires or is cancelled.
pub struct TimerHandle<T>(SlabKey<TimerNode<T>>);

impl<T> Copy for TimerHandle<T> {}

impl<T> Clone for TimerHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for TimerHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for TimerHandle<T> {}

impl<T> fmt::Debug for TimerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TimerHandle").field(&self.0).finish()
    }
}

/// Witness type for power-of-two values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerOfTwo(usize);

impl PowerOfTwo {
    #[must_use]
    pub const fn new(val: usize) -> Option<Self> {
        if val.is_power_of_two() {
            Some(Self(val))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// Wheel configuration (immutable after creation).
#[derive(Clone, Copy, Debug)]
pub struct WheelConfig {
    pub slots: PowerOfTwo,
    pub capacity: NonZeroUsize,
}

/// Hashed timing wheel.
pub struct Wheel<T> {
    /// Head of the timer list per slot.
    slots: Vec<Option<SlabKey<TimerNode<T>>>>,
    slab: Slab<TimerNode<T>>,
    mask: usize,
    /// Last tick fully processed.
    cursor: u64,
    pub max_fired_per_tick: usize,
    pub max_slot_depth: usize,
    pub slab_high_water: usize,
}

impl<T> Wheel<T> {
    #[must_use]
    pub fn new(cfg: WheelConfig) -> Self {
        let slots = cfg.slots.get();
        Self {
            slots: vec![None; slots],
            slab: Slab::bounded(cfg.capacity),
            mask: slots - 1,
            cursor: 0,
            max_fired_per_tick: 0,
            max_slot_depth: 0,
            slab_high_water: 0,
        }
    }

    /// Last tick the wheel has advanced to.
    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slab.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    #[inline]
    fn slot_of(&self, tick: u64) -> usize {
        // Truncation is fine: only the low bits survive the mask anyway.
        (tick as usize) & self.mask
    }

    /// Schedules `payload` to fire at absolute tick `deadline`.
    ///
    /// Deadlines at or before the cursor are moved to the next tick, so a
    /// timer never fires during the pass that scheduled it.
    pub fn schedule_at(&mut self, deadline: u64, payload: T) -> Result<TimerHandle<T>, WheelError> {
        let deadline = deadline.max(self.cursor + 1);
        let slot = self.slot_of(deadline);
        let head = self.slots[slot];
        let key = self
            .slab
            .insert(TimerNode {
                payload,
                deadline,
                next: head,
                prev: None,
            })
            .ok_or(WheelError::Capacity)?;

        if let Some(head) = head.and_then(|h| self.slab.get_mut(h)) {
            head.prev = Some(key);
        }
        self.slots[slot] = Some(key);
        self.slab_high_water = self.slab_high_water.max(self.slab.len());
        Ok(TimerHandle(key))
    }

    /// Cancels a timer, returning its payload; `None` if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle<T>) -> Option<T> {
        let node = self.slab.get(handle.0)?;
        let (next, prev, deadline) = (node.next, node.prev, node.deadline);

        match prev {
            Some(p) => {
                if let Some(pnode) = self.slab.get_mut(p) {
                    pnode.next = next;
                }
            }
            None => {
                let slot = self.slot_of(deadline);
                self.slots[slot] = next;
            }
        }
        if let Some(nnode) = next.and_then(|n| self.slab.get_mut(n)) {
            nnode.prev = prev;
        }

        self.slab.remove(handle.0).map(|node| node.payload)
    }

    /// Earliest pending deadline, if any timer is pending.
    ///
    /// Linear in the number of pending timers.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.slab.iter().map(|(_, node)| node.deadline).min()
    }

    /// Advances the wheel to `now` and invokes `on_fire` for each due timer.
    ///
    /// `on_fire` receives the (now stale) handle, the timer's deadline and its
    /// payload by value. Each slot is visited at most once per call, so jumping
    /// far ahead costs at most one rotation.
    pub fn tick(&mut self, now: u64, mut on_fire: impl FnMut(TimerHandle<T>, u64, T)) {
        if now <= self.cursor {
            return;
        }
        let span = (now - self.cursor).min(self.slots.len() as u64);
        for step in 1..=span {
            let slot = self.slot_of(self.cursor + step);
            let mut head = self.slots[slot];
            let mut pending_head: Option<SlabKey<TimerNode<T>>> = None;
            let mut slot_depth = 0;
            let mut fired_count = 0;

            while let Some(key) = head {
                slot_depth += 1;
                let Some(node) = self.slab.get(key) else {
                    break;
                };
                // Save next before we potentially free.
                head = node.next;

                if node.deadline <= now {
                    if let Some(node) = self.slab.remove(key) {
                        on_fire(TimerHandle(key), node.deadline, node.payload);
                        fired_count += 1;
                    }
                } else {
                    // Relink onto the list of timers that stay in this slot.
                    if let Some(node) = self.slab.get_mut(key) {
                        node.next = pending_head;
                        node.prev = None;
                    }
                    if let Some(pnode) = pending_head.and_then(|p| self.slab.get_mut(p)) {
                        pnode.prev = Some(key);
                    }
                    pending_head = Some(key);
                }
            }

            self.slots[slot] = pending_head;
            self.max_slot_depth = self.max_slot_depth.max(slot_depth);
            self.max_fired_per_tick = self.max_fired_per_tick.max(fired_count);
        }
        self.cursor = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheel_u32(slots: usize, capacity: usize) -> Wheel<u32> {
        Wheel::new(WheelConfig {
            slots: PowerOfTwo::new(slots).unwrap(),
            capacity: NonZeroUsize::new(capacity).unwrap(),
        })
    }

    fn fire(w: &mut Wheel<u32>, now: u64) -> Vec<(u64, u32)> {
        let mut fired = Vec::new();
        w.tick(now, |_, deadline, v| fired.push((deadline, v)));
        fired.sort_unstable();
        fired
    }

    #[test]
    fn fires_only_when_due() {
        let mut w = wheel_u32(8, 4);
        w.schedule_at(1, 10).unwrap();
        w.schedule_at(3, 20).unwrap();

        assert_eq!(fire(&mut w, 1), vec![(1, 10)]);
        assert_eq!(fire(&mut w, 2), vec![]);
        assert_eq!(fire(&mut w, 3), vec![(3, 20)]);
        assert!(w.is_empty());
    }

    #[test]
    fn past_deadline_moves_to_next_tick() {
        let mut w = wheel_u32(8, 2);
        assert!(fire(&mut w, 5).is_empty());
        w.schedule_at(2, 7).unwrap();
        assert_eq!(w.next_deadline(), Some(6));
        assert_eq!(fire(&mut w, 6), vec![(6, 7)]);
    }

    #[test]
    fn cancel_prevents_fire() {
        let mut w = wheel_u32(8, 2);
        let h = w.schedule_at(1, 42).unwrap();
        assert_eq!(w.cancel(h), Some(42));
        assert_eq!(w.cancel(h), None, "cancel is not idempotent");
        assert!(fire(&mut w, 1).is_empty());
    }

    #[test]
    fn cancel_middle_of_slot_list() {
        let mut w = wheel_u32(8, 4);
        w.schedule_at(1, 1).unwrap();
        let mid = w.schedule_at(1, 2).unwrap();
        w.schedule_at(1, 3).unwrap();
        assert_eq!(w.cancel(mid), Some(2));
        assert_eq!(fire(&mut w, 1), vec![(1, 1), (1, 3)]);
    }

    #[test]
    fn stale_handle_rejected() {
        let mut w = wheel_u32(8, 1);
        let h1 = w.schedule_at(1, 1).unwrap();
        fire(&mut w, 1);
        let h2 = w.schedule_at(2, 2).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(w.cancel(h1), None);
        assert_eq!(w.cancel(h2), Some(2));
    }

    #[test]
    fn capacity_exhaustion() {
        let mut w = wheel_u32(8, 1);
        w.schedule_at(1, 1).unwrap();
        assert_eq!(w.schedule_at(1, 2), Err(WheelError::Capacity));
    }

    #[test]
    fn deadlines_beyond_one_rotation() {
        let mut w = wheel_u32(4, 4);
        w.schedule_at(10, 99).unwrap();
        for now in 1..10 {
            assert!(fire(&mut w, now).is_empty(), "fired early at {now}");
        }
        assert_eq!(fire(&mut w, 10), vec![(10, 99)]);
    }

    #[test]
    fn jump_ahead_fires_everything_due() {
        let mut w = wheel_u32(4, 4);
        w.schedule_at(1, 1).unwrap();
        w.schedule_at(3, 3).unwrap();
        w.schedule_at(50, 50).unwrap();
        w.schedule_at(1_000, 1_000).unwrap();
        assert_eq!(fire(&mut w, 100), vec![(1, 1), (3, 3), (50, 50)]);
        assert_eq!(w.next_deadline(), Some(1_000));
        assert_eq!(w.cursor(), 100);
    }

    #[test]
    fn stats_track_high_water_marks() {
        let mut w = wheel_u32(4, 8);
        for v in 0..3 {
            w.schedule_at(1, v).unwrap();
        }
        w.schedule_at(2, 9).unwrap();
        assert_eq!(w.slab_high_water, 4);

        assert_eq!(fire(&mut w, 2).len(), 4);
        assert_eq!(w.max_fired_per_tick, 3);
        assert_eq!(w.max_slot_depth, 3);

        w.schedule_at(3, 1).unwrap();
        assert_eq!(w.slab_high_water, 4, "high water never drops");
    }
}
