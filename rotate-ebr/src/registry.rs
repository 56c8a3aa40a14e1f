//! The thread registry.
//!
//! Every thread that touches a reclaimed structure claims a [`ThreadState`] record. Records are
//! chained in a grow-only, lock-free, intrusive list owned by a [`Global`](crate::Global). A
//! thread first tries to recycle a record released by an exited thread by atomically claiming
//! its `owned` flag, and allocates a fresh cache-aligned record only if none is free. When the
//! thread exits the flag is cleared again. Records are never unlinked; they are freed only when
//! the registry itself is dropped.

use core::marker::PhantomData;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use log::{debug, trace};

use crate::gc::GCState;

/// Per-thread metadata record.
pub struct ThreadState {
    /// Assigned once at allocation, never reused by another record.
    id: usize,
    /// Whether a live thread currently owns this record.
    owned: AtomicBool,
    /// Points to the next record in the registry.
    next: AtomicPtr<CachePadded<ThreadState>>,
    /// The reclamation state of the owning thread.
    pub(crate) gc: GCState,
}

// Fields other than `owned`, `next` and `gc.epoch` are only touched by the owner.
unsafe impl Sync for ThreadState {}
unsafe impl Send for ThreadState {}

impl ThreadState {
    fn new(id: usize) -> Self {
        Self {
            id,
            owned: AtomicBool::new(true),
            next: AtomicPtr::new(null_mut()),
            gc: GCState::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owned.load(Ordering::Acquire)
    }

    fn try_claim(&self) -> bool {
        !self.owned.load(Ordering::Relaxed)
            && self
                .owned
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }
}

/// A grow-only linked list of [`ThreadState`] records.
pub struct Registry {
    head: AtomicPtr<CachePadded<ThreadState>>,
    next_id: AtomicUsize,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(null_mut()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Claims a free record, or pushes a newly allocated one onto the head of the list.
    ///
    /// The returned record is owned by the caller until it is passed to [`Registry::release`].
    pub fn acquire(&self) -> &ThreadState {
        for state in self.iter() {
            if state.try_claim() {
                trace!("recycled thread state {}", state.id);
                return state;
            }
        }

        // Allocation failure aborts through the global allocator's error handler.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let new = Box::into_raw(Box::new(CachePadded::new(ThreadState::new(id))));
        // Records are never freed while the registry is alive.
        let state: &ThreadState = unsafe { &*new };
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            state.next.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange(head, new, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        debug!("registry grew: allocated thread state {}", id);
        state
    }

    /// Gives up the ownership of `state` so that another thread can claim it.
    ///
    /// Called after the owner is done with the record, so it needs no coordination with it.
    pub fn release(&self, state: &ThreadState) {
        debug_assert!(state.is_owned(), "releasing a free thread state");
        state.owned.store(false, Ordering::Release);
        trace!("released thread state {}", state.id);
    }

    /// Returns an iterator over every record, owned or not.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            curr: self.head.load(Ordering::Acquire),
            _marker: PhantomData,
        }
    }

    /// Returns the number of records ever allocated.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let state = unsafe { Box::from_raw(curr) };
            curr = state.next.load(Ordering::Relaxed);
        }
    }
}

pub struct Iter<'r> {
    curr: *const CachePadded<ThreadState>,
    _marker: PhantomData<&'r ThreadState>,
}

impl<'r> Iterator for Iter<'r> {
    type Item = &'r ThreadState;

    fn next(&mut self) -> Option<Self::Item> {
        let curr_ref = unsafe { self.curr.as_ref() }?;
        self.curr = curr_ref.next.load(Ordering::Acquire);
        Some(&**curr_ref)
    }
}
