//! Owned object trees with cascading destruction, and a single-threaded
//! timer loop to drive them.
//!
//! - [`object`]: objects that name an owner at construction; destroying an
//!   owner destroys everything it owns.
//! - [`runtime`]: the event loop, its clock and its timing wheel.
//! - [`app`]: an application root tying the two together.

pub mod app;
pub mod object;
pub mod runtime;
pub mod slab;
pub mod trace;

pub use app::Application;
pub use object::{ObjectError, ObjectId, ObjectTree};
pub use runtime::{EventLoop, LoopConfig, LoopError};
pub use trace::init_tracing;
