use rand::prelude::*;
use rotate_ebr::Global;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::thread::scope;
use std::time::Duration;

const THREADS: usize = 16;
const COUNT_PER_THREAD: usize = 1 << 12;

struct Tracked<'a> {
    value: usize,
    live: &'a AtomicUsize,
}

impl<'a> Tracked<'a> {
    fn new(value: usize, live: &'a AtomicUsize) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { value, live }
    }
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        // Catches double frees in debug builds.
        assert_ne!(self.value, usize::MAX);
        self.value = usize::MAX;
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn defer_incrs() {
    let _ = env_logger::builder().is_test(true).try_init();
    let live = &AtomicUsize::new(0);
    {
        let global = &Global::new();
        scope(|s| {
            for _ in 0..THREADS {
                s.spawn(move || {
                    let handle = global.register();
                    for i in 0..COUNT_PER_THREAD {
                        let guard = handle.pin();
                        unsafe { guard.retire(Box::into_raw(Box::new(Tracked::new(i, live)))) };
                    }
                });
            }
        });
        let handle = global.register();
        assert!(handle.flush());
        assert_eq!(handle.pending(), 0);
        assert_eq!(global.garbage_count(), 0);
    }
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

/// Threads swap a single shared slot and read the value they loaded after a random delay. A
/// premature free would trip the double-free assertion or read the poisoned value.
#[test]
fn single_slot_with_delayed_readers() {
    let live = &AtomicUsize::new(0);
    let global = &Global::new();
    let slot = &AtomicPtr::new(Box::into_raw(Box::new(Tracked::new(0, live))));

    scope(|s| {
        for t in 0..THREADS {
            s.spawn(move || {
                let handle = global.register();
                let mut rng = rand::thread_rng();
                for i in 0..COUNT_PER_THREAD / 4 {
                    let guard = handle.pin();
                    let curr = slot.load(Ordering::Acquire);
                    let new = Box::into_raw(Box::new(Tracked::new(t * COUNT_PER_THREAD + i, live)));
                    if slot
                        .compare_exchange(curr, new, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        unsafe { guard.retire(curr) };
                    } else {
                        drop(unsafe { Box::from_raw(new) });
                    }

                    if rng.gen_ratio(1, 64) {
                        std::thread::sleep(Duration::from_micros(50));
                    }
                    // This read must be safe.
                    assert_ne!(unsafe { (*curr).value }, usize::MAX);
                }
            });
        }
    });

    let last = slot.swap(ptr::null_mut(), Ordering::AcqRel);
    drop(unsafe { Box::from_raw(last) });
    let handle = global.register();
    assert!(handle.flush());
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn records_are_recycled_after_exit() {
    let global = &Global::new();
    for _ in 0..8 {
        scope(|s| {
            s.spawn(|| {
                let _handle = global.register();
            });
        });
    }
    assert_eq!(global.registry().len(), 1);
}
