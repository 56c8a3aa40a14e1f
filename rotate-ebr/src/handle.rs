use core::marker::PhantomData;
use core::sync::atomic::{compiler_fence, fence, Ordering};

use crossbeam_utils::Backoff;

use crate::global::Global;
use crate::guard::Guard;
use crate::registry::ThreadState;

/// Number of collection rounds [`LocalHandle::flush`] attempts before giving up.
const FLUSH_ROUNDS: usize = 1024;

/// A thread-local handle to a claimed [`ThreadState`] record.
///
/// Dropping the handle is the thread-exit notification: the record's pending garbage is handed
/// over to the [`Global`] and the record becomes available to other threads. If guards created
/// from this handle are still alive, the release is postponed until the last one is dropped.
pub struct LocalHandle<'g> {
    state: &'g ThreadState,
    global: &'g Global,
    // Not `Send`: the record's owner-only fields must stay on one thread.
    _marker: PhantomData<*const ()>,
}

impl<'g> LocalHandle<'g> {
    pub(crate) fn new(state: &'g ThreadState, global: &'g Global) -> Self {
        state.gc.set_handle_count(1);
        Self {
            state,
            global,
            _marker: PhantomData,
        }
    }

    /// Returns `true` if the thread is inside a critical section.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.state.gc.guard_count() > 0
    }

    /// Enters a critical section.
    ///
    /// The returned [`Guard`] leaves it when dropped. Critical sections nest; only the outermost
    /// one publishes the observed epoch.
    #[inline]
    pub fn pin(&self) -> Guard<'g> {
        pin(self.state, self.global)
    }

    /// Tries to advance the epoch and frees the garbage that became safe to free.
    ///
    /// Returns the number of freed objects.
    #[inline]
    pub fn collect(&self) -> usize {
        self.global.collect(self.state)
    }

    /// Collects repeatedly until everything retired by this thread and by exited threads has
    /// been freed, or a bounded number of rounds elapsed.
    ///
    /// Returns `true` if nothing is left. This cannot succeed while the calling thread is itself
    /// inside a critical section.
    pub fn flush(&self) -> bool {
        let backoff = Backoff::new();
        for _ in 0..FLUSH_ROUNDS {
            self.collect();
            if unsafe { self.state.gc.pending() } == 0 && !self.global.has_orphans() {
                return true;
            }
            backoff.snooze();
        }
        false
    }

    /// Returns the number of objects retired by this thread that are not freed yet.
    #[inline]
    pub fn pending(&self) -> usize {
        unsafe { self.state.gc.pending() }
    }
}

impl Drop for LocalHandle<'_> {
    fn drop(&mut self) {
        self.state.gc.set_handle_count(0);
        if self.state.gc.guard_count() == 0 {
            finalize(self.state, self.global);
        }
    }
}

/// Releases `state` once neither handles nor guards refer to it.
pub(crate) fn finalize(state: &ThreadState, global: &Global) {
    debug_assert_eq!(state.gc.guard_count(), 0);
    debug_assert_eq!(state.gc.handle_count(), 0);
    global.adopt(state);
    global.registry().release(state);
}

pub(crate) fn pin<'g>(state: &'g ThreadState, global: &'g Global) -> Guard<'g> {
    let gc = &state.gc;
    let guard_count = gc.guard_count();
    gc.set_guard_count(guard_count + 1);

    if guard_count == 0 {
        let current = gc.epoch.load(Ordering::Relaxed);
        let new_epoch = global.current_epoch().pinned();

        // Now we must store `new_epoch` into `gc.epoch` and execute a `SeqCst` fence.
        // The fence makes sure that any future loads from shared slots will not happen before
        // this store.
        if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
            // On x86, a `lock cmpxchg` is a full barrier and is cheaper than `mfence`.
            let res = gc.epoch.compare_exchange(
                current,
                new_epoch,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            debug_assert!(res.is_ok(), "participant was expected to be unpinned");
            compiler_fence(Ordering::SeqCst);
        } else {
            gc.epoch.store(new_epoch, Ordering::Relaxed);
            fence(Ordering::SeqCst);
        }
    }

    Guard::new(state, global)
}
