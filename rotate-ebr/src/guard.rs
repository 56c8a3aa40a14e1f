use core::marker::PhantomData;
use core::sync::atomic::Ordering;
use std::fmt;

use crate::global::Global;
use crate::handle::finalize;
use crate::registry::ThreadState;
use crate::retired::Retired;

/// Retirements between two automatic collections on the same thread.
pub const COLLECT_PERIOD: usize = 128;

/// A witness that the current thread is inside a critical section.
///
/// While a guard is alive, no object that was reachable when it was created is freed. Dropping
/// the outermost guard leaves the critical section, on every exit path including unwinding.
pub struct Guard<'g> {
    state: &'g ThreadState,
    global: &'g Global,
    // Not `Send` nor `Sync`: a guard belongs to the thread that pinned.
    _marker: PhantomData<*mut ()>,
}

impl<'g> Guard<'g> {
    pub(crate) fn new(state: &'g ThreadState, global: &'g Global) -> Self {
        Self {
            state,
            global,
            _marker: PhantomData,
        }
    }

    /// Returns the epoch observed when the critical section started.
    #[inline]
    pub fn epoch(&self) -> usize {
        self.state.gc.epoch.load(Ordering::Relaxed).value()
    }

    /// Retires an object unlinked from a shared structure. It is freed once no critical section
    /// that might have reached it is still running.
    ///
    /// # Safety
    ///
    /// * `ptr` must come from `Box::into_raw` and must not be retired twice.
    /// * The object must already be unreachable for threads that pin after this call.
    pub unsafe fn retire<T>(&self, ptr: *mut T) {
        let epoch = self.global.retire_epoch();
        self.state.gc.push(Retired::new(ptr), epoch);
        self.global.account_retired();

        if self.state.gc.bump_retire_count() % COLLECT_PERIOD == 0 {
            self.global.collect(self.state);
        }
    }

    /// Tries to advance the epoch and frees the garbage that became safe to free.
    #[inline]
    pub fn collect(&self) -> usize {
        self.global.collect(self.state)
    }

    /// Publishes the latest global epoch as the observed one, unless the critical section is
    /// nested. References obtained before repinning must not be used afterwards.
    pub fn repin(&mut self) {
        let gc = &self.state.gc;
        if gc.guard_count() != 1 {
            return;
        }
        let epoch = gc.epoch.load(Ordering::Relaxed);
        let global_epoch = self.global.current_epoch().pinned();

        // Update the local epoch only if the global epoch is greater than the local epoch.
        if epoch != global_epoch {
            // We store the new epoch with `Release` because we need to ensure any memory
            // accesses from the previous epoch do not leak into the new one.
            gc.epoch.store(global_epoch, Ordering::Release);
        }
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        let gc = &self.state.gc;
        let guard_count = gc.guard_count();
        debug_assert!(guard_count > 0, "unbalanced guard");
        gc.set_guard_count(guard_count - 1);

        if guard_count == 1 {
            let epoch = gc.epoch.load(Ordering::Relaxed);
            gc.epoch.store(epoch.unpinned(), Ordering::Release);

            if gc.handle_count() == 0 {
                finalize(self.state, self.global);
            }
        }
    }
}

impl fmt::Debug for Guard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("thread", &self.state.id())
            .field("epoch", &self.epoch())
            .finish()
    }
}
