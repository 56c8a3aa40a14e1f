//! The process-wide state of the reclaimer.

use core::sync::atomic::{fence, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use log::{debug, trace};

use crate::epoch::{AtomicEpoch, Epoch};
use crate::handle::LocalHandle;
use crate::pile::Pile;
use crate::registry::{Registry, ThreadState};
use crate::retired::Bucket;

/// Number of epochs a retired object must age, measured against the minimum epoch observed by
/// any thread in a critical section, before it is freed.
pub const GRACE_EPOCHS: usize = 2;

/// The global data for a garbage collector.
///
/// A `Global` owns the thread registry, the global epoch and the buckets left behind by exited
/// threads. The crate provides a process-wide instance ([`GLOBAL`](crate::GLOBAL)); independent
/// instances can be created for isolated domains and free everything they still hold when
/// dropped.
pub struct Global {
    /// The intrusive linked list of `ThreadState`s.
    registry: Registry,

    /// Buckets handed over by threads that exited before their garbage expired.
    orphans: Pile<Bucket>,

    /// The global epoch.
    epoch: CachePadded<AtomicEpoch>,

    /// Number of retired objects that are not freed yet.
    garbage: CachePadded<AtomicUsize>,
}

impl Global {
    /// Creates a new global data for garbage collection.
    ///
    /// ```
    /// use rotate_ebr::Global;
    ///
    /// let global = Global::new();
    /// ```
    #[inline]
    pub const fn new() -> Self {
        Self {
            registry: Registry::new(),
            orphans: Pile::new(),
            epoch: CachePadded::new(AtomicEpoch::new(Epoch::starting())),
            garbage: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Registers the current thread as a participant of this domain.
    ///
    /// ```
    /// use rotate_ebr::Global;
    ///
    /// let global = Global::new();
    /// let handle = global.register();
    /// assert!(!handle.is_pinned());
    /// ```
    #[inline]
    pub fn register(&self) -> LocalHandle<'_> {
        LocalHandle::new(self.registry.acquire(), self)
    }

    /// Returns the current global epoch.
    #[inline]
    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Relaxed).value()
    }

    /// Returns the number of retired objects that have not been freed yet.
    #[inline]
    pub fn garbage_count(&self) -> usize {
        self.garbage.load(Ordering::Acquire)
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Attempts to advance the global epoch.
    ///
    /// The global epoch can advance if all currently pinned participants have been pinned in
    /// the current epoch. Participants outside of a critical section are ignored.
    ///
    /// Returns the minimum epoch that a participant in a critical section may have observed,
    /// which is the global epoch itself if nobody is pinned.
    ///
    /// `try_advance()` is annotated `#[cold]` because it is rarely called.
    ///
    /// # Example
    ///
    /// ```
    /// use rotate_ebr::Global;
    ///
    /// let global = &Global::new();
    ///
    /// // If there's no working thread, `try_advance` would trivially succeed.
    /// global.try_advance();
    /// assert_eq!(global.epoch(), 1);
    /// ```
    #[cold]
    pub fn try_advance(&self) -> usize {
        let global_epoch = self.epoch.load(Ordering::Relaxed);
        fence(Ordering::SeqCst);

        let mut min_epoch = global_epoch.value();
        let mut lagging = false;
        for state in self.registry.iter() {
            let local_epoch = state.gc.epoch.load(Ordering::Relaxed);
            if !local_epoch.is_pinned() {
                continue;
            }
            // A participant pinned after someone else advanced the epoch is not lagging.
            if local_epoch.value() < global_epoch.value() {
                lagging = true;
            }
            min_epoch = min_epoch.min(local_epoch.value());
        }
        fence(Ordering::Acquire);

        if !lagging {
            // Advancing may fail if another thread already advanced the epoch.
            let new_epoch = global_epoch.successor();
            if self
                .epoch
                .compare_exchange(global_epoch, new_epoch, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                trace!("advanced global epoch to {}", new_epoch.value());
            }
        }
        min_epoch
    }

    #[inline]
    pub(crate) fn current_epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Loads the epoch that a retirement happening now is stamped with.
    #[inline]
    pub(crate) fn retire_epoch(&self) -> usize {
        fence(Ordering::SeqCst);
        self.epoch.load(Ordering::Relaxed).value()
    }

    #[inline]
    pub(crate) fn account_retired(&self) {
        self.garbage.fetch_add(1, Ordering::Relaxed);
    }

    /// Advances the epoch if possible, then frees expired buckets of `state` and expired
    /// orphaned buckets. Returns the number of freed objects.
    ///
    /// Must be called by the owner of `state`.
    pub(crate) fn collect(&self, state: &ThreadState) -> usize {
        let min_epoch = self.try_advance();

        let mut freed = 0;
        while let Some(bucket) = unsafe { state.gc.pop_expired(min_epoch, GRACE_EPOCHS) } {
            freed += unsafe { bucket.execute() };
        }
        freed += self.collect_orphans(min_epoch);

        if freed > 0 {
            self.garbage.fetch_sub(freed, Ordering::Release);
            debug!(
                "thread state {} reclaimed {} objects (min epoch {})",
                state.id(),
                freed,
                min_epoch
            );
        }
        freed
    }

    fn collect_orphans(&self, min_epoch: usize) -> usize {
        if self.orphans.is_empty() {
            return 0;
        }
        let (expired, pending): (Vec<_>, Vec<_>) = self
            .orphans
            .pop_all()
            .into_iter()
            .partition(|bucket| bucket.is_expired(min_epoch, GRACE_EPOCHS));
        // Put the rest back even if a destructor below panics.
        let _pending = scopeguard::guard(pending, |pending| {
            self.orphans.append(pending.into_iter())
        });
        expired
            .into_iter()
            .map(|bucket| unsafe { bucket.execute() })
            .sum()
    }

    /// Hands the remaining buckets of a leaving participant over to the global pile.
    pub(crate) fn adopt(&self, state: &ThreadState) {
        let buckets = unsafe { state.gc.take_buckets() };
        if !buckets.is_empty() {
            trace!(
                "thread state {} left {} buckets behind",
                state.id(),
                buckets.len()
            );
            self.orphans.append(buckets.into_iter());
        }
    }

    #[inline]
    pub(crate) fn has_orphans(&self) -> bool {
        !self.orphans.is_empty()
    }
}

impl Default for Global {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Global {
    fn drop(&mut self) {
        let freed: usize = self
            .registry
            .iter()
            .flat_map(|state| unsafe { state.gc.take_buckets() })
            .chain(self.orphans.pop_all())
            .map(|bucket| unsafe { bucket.execute() })
            .sum();
        debug!("dropped reclamation domain, freed {} objects", freed);
    }
}

#[cfg(test)]
mod tests {
    use super::Global;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::scope;

    #[test]
    fn try_advance() {
        let global = &Global::new();
        let sync_clock = &AtomicUsize::new(0);

        // If there's no working thread, `try_advance` would trivially succeed.
        global.try_advance();
        assert_eq!(global.epoch(), 1);

        // Let's simulate a pinned slow thread.
        scope(|s| {
            s.spawn(|| {
                let handle = global.register();
                let _guard = handle.pin();
                sync_clock.fetch_add(1, Ordering::SeqCst);
                while sync_clock.load(Ordering::SeqCst) == 1 {
                    std::hint::spin_loop();
                }
            });

            while sync_clock.load(Ordering::SeqCst) == 0 {
                std::hint::spin_loop();
            }

            // The first advancing must succeed because the pinned participant
            // is on the global epoch.
            assert_eq!(global.try_advance(), 1);
            assert_eq!(global.epoch(), 2);
            // However, the next advancing will fail.
            assert_eq!(global.try_advance(), 1);
            assert_eq!(global.epoch(), 2);

            sync_clock.fetch_add(1, Ordering::SeqCst);
        });

        // The slow thread unpinned, so the epoch moves again.
        assert_eq!(global.try_advance(), 2);
        assert_eq!(global.epoch(), 3);
    }

    #[test]
    fn pinned_thread_holds_back_reclamation() {
        struct Counted<'a>(&'a AtomicUsize);
        impl Drop for Counted<'_> {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = &AtomicUsize::new(0);
        let global = &Global::new();
        let sync_clock = &AtomicUsize::new(0);

        scope(|s| {
            s.spawn(|| {
                let handle = global.register();
                let _guard = handle.pin();
                sync_clock.fetch_add(1, Ordering::SeqCst);
                while sync_clock.load(Ordering::SeqCst) == 1 {
                    std::hint::spin_loop();
                }
            });

            while sync_clock.load(Ordering::SeqCst) == 0 {
                std::hint::spin_loop();
            }

            let handle = global.register();
            {
                let guard = handle.pin();
                unsafe { guard.retire(Box::into_raw(Box::new(Counted(dropped)))) };
            }
            for _ in 0..16 {
                handle.collect();
            }
            assert_eq!(dropped.load(Ordering::SeqCst), 0);
            assert_eq!(global.garbage_count(), 1);

            sync_clock.fetch_add(1, Ordering::SeqCst);
        });

        let handle = global.register();
        assert!(handle.flush());
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(global.garbage_count(), 0);
    }

    #[test]
    fn drop_frees_remaining_garbage() {
        let count = &AtomicUsize::new(0);
        struct Counted<'a>(&'a AtomicUsize);
        impl Drop for Counted<'_> {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        {
            let global = Global::new();
            let handle = global.register();
            let guard = handle.pin();
            for _ in 0..10 {
                unsafe { guard.retire(Box::into_raw(Box::new(Counted(count)))) };
            }
            drop(guard);
            drop(handle);
            assert_eq!(count.load(Ordering::SeqCst), 0);
        }
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
