//! The default reclamation domain.
//!
//! [`GLOBAL`] is created at compile time and lives for the whole process, so its records are
//! never freed. Each thread lazily registers with it on first use and caches the handle in a
//! thread local; the thread-local destructor releases the record when the thread exits.

use crate::global::Global;
use crate::guard::Guard;
use crate::handle::LocalHandle;

/// The default [`Global`] domain.
pub static GLOBAL: Global = Global::new();

thread_local! {
    /// The default thread-local handle attached to [`GLOBAL`].
    static HANDLE: LocalHandle<'static> = GLOBAL.register();
}

/// Enters a critical section on the default domain.
#[inline]
pub fn pin() -> Guard<'static> {
    // The thread local may already be destroyed if this is called from another destructor
    // during thread exit. Fall back to a temporary registration.
    HANDLE
        .try_with(|handle| handle.pin())
        .unwrap_or_else(|_| GLOBAL.register().pin())
}

/// Returns `true` if the current thread is inside a critical section of the default domain.
#[inline]
pub fn is_pinned() -> bool {
    HANDLE
        .try_with(|handle| handle.is_pinned())
        .unwrap_or(false)
}

/// Frees the garbage of the default domain that became safe to free.
pub fn collect() -> usize {
    HANDLE
        .try_with(|handle| handle.collect())
        .unwrap_or_else(|_| GLOBAL.register().collect())
}

/// Drives the default domain until the garbage of this thread and of exited threads is freed.
///
/// See [`LocalHandle::flush`].
pub fn flush() -> bool {
    HANDLE
        .try_with(|handle| handle.flush())
        .unwrap_or_else(|_| GLOBAL.register().flush())
}

/// Returns the number of objects retired in the default domain and not freed yet.
#[inline]
pub fn garbage_count() -> usize {
    GLOBAL.garbage_count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_nests() {
        assert!(!is_pinned());
        let outer = pin();
        let epoch = outer.epoch();
        {
            let inner = pin();
            assert!(is_pinned());
            assert_eq!(inner.epoch(), epoch);
        }
        assert!(is_pinned());
        drop(outer);
        assert!(!is_pinned());
    }
}
