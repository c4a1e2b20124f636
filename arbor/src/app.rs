//! Application context: a root object, the object tree and the event loop.
//!
//! Objects created through [`Application::create_object`] are owned by the
//! application root and torn down when the application is dropped. Callbacks
//! scheduled on the loop receive the object tree as their state.

use std::time::Duration;

use crate::object::{ObjectError, ObjectId, ObjectTree};
use crate::runtime::timing::{Clock, SystemClock};
use crate::runtime::{EventLoop, LoopConfig, LoopError, TimerId};
use crate::trace::{debug, info};

/// Owns an object tree rooted at the application object, plus its event loop.
pub struct Application<T = (), C: Clock = SystemClock> {
    root: ObjectId,
    objects: ObjectTree<T>,
    event_loop: EventLoop<ObjectTree<T>, C>,
}

impl<T: Default> Application<T, SystemClock> {
    /// Creates an application with the default loop configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, LoopConfig::default())
    }

    #[must_use]
    pub fn with_config(name: impl Into<String>, config: LoopConfig) -> Self {
        Self::with_clock(name, config, SystemClock::new())
    }
}

impl<T: Default, C: Clock> Application<T, C> {
    /// Creates an application whose loop is driven by `clock`.
    #[must_use]
    pub fn with_clock(name: impl Into<String>, config: LoopConfig, clock: C) -> Self {
        let mut objects = ObjectTree::new();
        let root = objects
            .create(name, None, T::default())
            .expect("a fresh tree accepts a root object");
        Self {
            root,
            objects,
            event_loop: EventLoop::with_clock(config, clock),
        }
    }
}

impl<T, C: Clock> Application<T, C> {
    /// The application object every [`create_object`](Self::create_object) hangs under.
    #[must_use]
    pub const fn root(&self) -> ObjectId {
        self.root
    }

    #[must_use]
    pub const fn objects(&self) -> &ObjectTree<T> {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectTree<T> {
        &mut self.objects
    }

    #[must_use]
    pub const fn event_loop(&self) -> &EventLoop<ObjectTree<T>, C> {
        &self.event_loop
    }

    pub fn event_loop_mut(&mut self) -> &mut EventLoop<ObjectTree<T>, C> {
        &mut self.event_loop
    }

    /// Creates an object owned by the application root.
    ///
    /// # Errors
    ///
    /// Fails only if the application root was destroyed by hand.
    pub fn create_object(
        &mut self,
        name: impl Into<String>,
        data: T,
    ) -> Result<ObjectId, ObjectError> {
        self.objects.create(name, Some(self.root), data)
    }

    /// Schedules a one-shot callback on the application's loop.
    pub fn single_shot(
        &mut self,
        delay: Duration,
        callback: impl FnOnce(&mut EventLoop<ObjectTree<T>, C>, &mut ObjectTree<T>) + 'static,
    ) -> Result<TimerId, LoopError> {
        self.event_loop.schedule_once(delay, callback)
    }

    /// Destroys `id` on the next loop iteration instead of right away.
    ///
    /// If the object is already gone by then (its owner went first, say), the
    /// request is dropped.
    pub fn delete_later(&mut self, id: ObjectId) -> Result<TimerId, LoopError> {
        self.event_loop.post(move |_, objects| match objects.destroy(id) {
            Ok(teardown) => {
                debug!(object = %id, destroyed = teardown.len(), "deferred delete");
            }
            Err(e) => {
                debug!(object = %id, error = %e, "deferred delete skipped");
            }
        })
    }

    /// Asks a running [`exec`](Self::exec) to return `code`.
    pub fn exit(&mut self, code: i32) {
        self.event_loop.exit(code);
    }

    /// Asks a running [`exec`](Self::exec) to return 0.
    pub fn quit(&mut self) {
        self.event_loop.request_termination();
    }

    /// Runs the event loop until termination; returns the exit status.
    ///
    /// # Errors
    ///
    /// See [`EventLoop::run`].
    pub fn exec(&mut self) -> Result<i32, LoopError> {
        info!(objects = self.objects.len(), "entering event loop");
        let code = self.event_loop.run(&mut self.objects)?;
        info!(code, "event loop finished");
        Ok(code)
    }
}

impl<T, C: Clock> Drop for Application<T, C> {
    fn drop(&mut self) {
        // Already gone if the caller destroyed the root themselves.
        if let Ok(teardown) = self.objects.destroy(self.root) {
            debug!(destroyed = teardown.len(), "application torn down");
        }
    }
}
