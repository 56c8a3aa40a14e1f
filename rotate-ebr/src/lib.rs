//! Epoch-based memory reclamation with an explicit thread registry.
//!
//! # Registration
//!
//! Every participating thread claims a [`ThreadState`] record from the lock-free registry of a
//! [`Global`]. Records released by exited threads are recycled; the registry only grows.
//!
//! # Pinning
//!
//! A thread enters a critical section with [`pin`] (or [`LocalHandle::pin`]). The returned
//! [`Guard`] publishes the global epoch the thread observed, and clears the pinned flag when
//! dropped.
//!
//! # Retirement
//!
//! An object unlinked from a shared structure is handed to [`Guard::retire`], which files it in
//! the calling thread's bucket for the current global epoch. Periodically, and on explicit
//! [`collect`]/[`flush`] calls, the thread tries to advance the global epoch and frees every
//! bucket that is [`GRACE_EPOCHS`] older than the oldest epoch observed by a pinned thread.
//! Buckets of exited threads are adopted by the [`Global`] and freed by whoever collects next.

mod default;
mod epoch;
mod gc;
mod global;
mod guard;
mod handle;
mod pile;
mod registry;
mod retired;

pub use default::{collect, flush, garbage_count, is_pinned, pin, GLOBAL};
pub use epoch::{AtomicEpoch, Epoch};
pub use gc::GCState;
pub use global::{Global, GRACE_EPOCHS};
pub use guard::{Guard, COLLECT_PERIOD};
pub use handle::LocalHandle;
pub use registry::{Registry, ThreadState};
