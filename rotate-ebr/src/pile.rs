//! A lock-free pile.

use std::mem::ManuallyDrop;
use std::ptr::null_mut;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

/// A lock-free pile, which we can push an element or pop all elements.
#[derive(Debug)]
pub(crate) struct Pile<T> {
    head: AtomicPtr<Node<T>>,
}

#[derive(Debug)]
struct Node<T> {
    data: ManuallyDrop<T>,
    next: *mut Node<T>,
}

impl<T> Pile<T> {
    /// Creates a new, empty pile.
    pub(crate) const fn new() -> Pile<T> {
        Pile {
            head: AtomicPtr::new(null_mut()),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Acquire).is_null()
    }

    /// Pushes every element of `iter` on top of the pile with a single CAS.
    pub(crate) fn append(&self, mut iter: impl Iterator<Item = T>) {
        let Some(first_value) = iter.next() else {
            return;
        };
        let first_node = Box::into_raw(Box::new(Node {
            data: ManuallyDrop::new(first_value),
            next: null_mut(),
        }));
        let mut last_node = first_node;

        for value in iter {
            let node = Box::into_raw(Box::new(Node {
                data: ManuallyDrop::new(value),
                next: null_mut(),
            }));
            unsafe { (*last_node).next = node };
            last_node = node;
        }

        let mut head = self.head.load(Relaxed);
        loop {
            unsafe { (*last_node).next = head };
            match self
                .head
                .compare_exchange(head, first_node, Release, Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Takes every element out of the pile.
    #[must_use]
    pub(crate) fn pop_all(&self) -> Vec<T> {
        let mut result = vec![];
        let mut node = self.head.swap(null_mut(), AcqRel);
        while !node.is_null() {
            let mut owned = unsafe { Box::from_raw(node) };
            result.push(unsafe { ManuallyDrop::take(&mut owned.data) });
            node = owned.next;
        }
        result
    }
}

impl<T> Default for Pile<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Pile<T> {
    fn drop(&mut self) {
        drop(self.pop_all());
    }
}

// Elements are moved between threads through the pile.
unsafe impl<T: Send> Send for Pile<T> {}
unsafe impl<T: Send> Sync for Pile<T> {}

#[cfg(test)]
mod tests {
    use super::Pile;
    use crossbeam_utils::thread::scope;

    #[test]
    fn append_then_pop_all() {
        let pile = Pile::new();
        assert!(pile.is_empty());
        pile.append(0..3);
        pile.append(3..5);
        let mut all = pile.pop_all();
        all.sort();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
        assert!(pile.is_empty());
    }

    #[test]
    fn concurrent_append() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1000;

        let pile = &Pile::new();
        scope(|s| {
            for t in 0..THREADS {
                s.spawn(move |_| {
                    for i in 0..PER_THREAD {
                        pile.append(std::iter::once(t * PER_THREAD + i));
                    }
                });
            }
        })
        .unwrap();

        let mut all = pile.pop_all();
        all.sort();
        assert_eq!(all, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
    }
}
