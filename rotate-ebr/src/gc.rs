//! Per-thread reclamation state.

use core::cell::{Cell, UnsafeCell};
use std::collections::VecDeque;
use std::mem;

use crossbeam_utils::CachePadded;

use crate::epoch::{AtomicEpoch, Epoch};
use crate::retired::{Bucket, Retired};

/// The reclamation state of one registered thread.
///
/// Only `epoch` is read by other threads. Every other field is touched by the owner of the
/// enclosing [`ThreadState`](crate::ThreadState) alone.
pub struct GCState {
    /// The global epoch observed when the owner last entered a critical section, and whether it
    /// is still inside it.
    pub(crate) epoch: CachePadded<AtomicEpoch>,
    /// Nesting depth of live guards.
    guard_count: Cell<usize>,
    /// Number of live handles. The record is released once this and `guard_count` are zero.
    handle_count: Cell<usize>,
    /// Total number of retirements, used to trigger collection periodically.
    retire_count: Cell<usize>,
    /// Retire buckets, ordered by epoch from oldest to newest.
    buckets: UnsafeCell<VecDeque<Bucket>>,
}

impl GCState {
    pub(crate) fn new() -> Self {
        Self {
            epoch: CachePadded::new(AtomicEpoch::new(Epoch::starting())),
            guard_count: Cell::new(0),
            handle_count: Cell::new(0),
            retire_count: Cell::new(0),
            buckets: UnsafeCell::new(VecDeque::new()),
        }
    }

    #[inline]
    pub(crate) fn guard_count(&self) -> usize {
        self.guard_count.get()
    }

    #[inline]
    pub(crate) fn set_guard_count(&self, count: usize) {
        self.guard_count.set(count);
    }

    #[inline]
    pub(crate) fn handle_count(&self) -> usize {
        self.handle_count.get()
    }

    #[inline]
    pub(crate) fn set_handle_count(&self, count: usize) {
        self.handle_count.set(count);
    }

    /// Records a retirement and returns the running total.
    #[inline]
    pub(crate) fn bump_retire_count(&self) -> usize {
        let count = self.retire_count.get().wrapping_add(1);
        self.retire_count.set(count);
        count
    }

    /// Appends `retired` to the bucket of `epoch`.
    ///
    /// # Safety
    ///
    /// Must be called by the owner of this state.
    pub(crate) unsafe fn push(&self, retired: Retired, epoch: usize) {
        let buckets = &mut *self.buckets.get();
        match buckets.back_mut() {
            Some(bucket) if bucket.epoch() >= epoch => bucket.push(retired),
            _ => {
                let mut bucket = Bucket::new(epoch);
                bucket.push(retired);
                buckets.push_back(bucket);
            }
        }
    }

    /// Detaches the oldest bucket if it is expired.
    ///
    /// # Safety
    ///
    /// Must be called by the owner of this state.
    pub(crate) unsafe fn pop_expired(&self, min_epoch: usize, grace: usize) -> Option<Bucket> {
        let buckets = &mut *self.buckets.get();
        if buckets.front()?.is_expired(min_epoch, grace) {
            buckets.pop_front()
        } else {
            None
        }
    }

    /// Detaches every bucket.
    ///
    /// # Safety
    ///
    /// Must be called by the owner of this state, or with exclusive access to it.
    pub(crate) unsafe fn take_buckets(&self) -> VecDeque<Bucket> {
        mem::take(&mut *self.buckets.get())
    }

    /// Returns the number of objects retired by the owner and not yet freed.
    ///
    /// # Safety
    ///
    /// Must be called by the owner of this state.
    pub(crate) unsafe fn pending(&self) -> usize {
        (*self.buckets.get()).iter().map(Bucket::len).sum()
    }
}
