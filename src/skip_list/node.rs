use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

use rotate_ebr::Guard;

use super::tag::{tag, tagged, MARKED, UNLINKED};

/// Per-level forward pointers of a node, or of the head.
pub(crate) type Tower<K, V> = [AtomicPtr<Node<K, V>>];

pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    /// Boxed so that an upsert replaces it with a single CAS. Null once the deleter took it.
    value: AtomicPtr<V>,
    /// One slot per level up to the target height. Slots of levels the node is not linked at
    /// yet hold a null pointer tagged `UNLINKED`.
    pub(crate) next: Box<Tower<K, V>>,
    /// Number of levels, from the bottom, the node has been linked at.
    height: AtomicUsize,
    /// Live links plus the inserter and in-flight promoters. The node is retired when it drops
    /// to zero.
    refs: AtomicUsize,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: V, target_height: usize) -> Self {
        debug_assert!(target_height >= 1);
        let next = (0..target_height)
            .map(|level| {
                let init = if level == 0 {
                    ptr::null_mut()
                } else {
                    tagged(ptr::null_mut(), UNLINKED)
                };
                AtomicPtr::new(init)
            })
            .collect();
        Self {
            key,
            value: AtomicPtr::new(Box::into_raw(Box::new(value))),
            next,
            height: AtomicUsize::new(1),
            // The reference count is initially two to account for
            // 1. The link at the level 0 of the tower.
            // 2. The current reference of the inserter.
            refs: AtomicUsize::new(2),
        }
    }

    /// Takes back the key and the value of a node that was never published.
    pub(crate) fn into_parts(self: Box<Self>) -> (K, V) {
        let mut node = ManuallyDrop::new(*self);
        unsafe {
            let key = ptr::read(&node.key);
            let value = *Box::from_raw(node.value.load(Ordering::Relaxed));
            ptr::drop_in_place(&mut node.next);
            (key, value)
        }
    }

    #[inline]
    pub(crate) fn target_height(&self) -> usize {
        self.next.len()
    }

    #[inline]
    pub(crate) fn height(&self) -> usize {
        self.height.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn raise_height(&self, height: usize) {
        self.height.fetch_max(height, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        tag(self.next[0].load(Ordering::SeqCst)) & MARKED != 0
    }

    /// Returns the current value, or `None` once the deleter has taken it. The reference stays
    /// valid while `guard` is alive.
    #[inline]
    pub(crate) fn value<'g>(&'g self, _guard: &'g Guard<'_>) -> Option<&'g V> {
        unsafe { self.value.load(Ordering::Acquire).as_ref() }
    }

    /// Replaces the value unless the node was deleted, and retires the replaced one. A deleted
    /// node refuses the value and hands it back.
    pub(crate) fn replace_value(&self, value: V, guard: &Guard<'_>) -> Result<(), V> {
        let new = Box::into_raw(Box::new(value));
        let mut old = self.value.load(Ordering::Acquire);
        loop {
            if old.is_null() {
                return Err(unsafe { *Box::from_raw(new) });
            }
            match self
                .value
                .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    unsafe { guard.retire(old) };
                    return Ok(());
                }
                Err(current) => old = current,
            }
        }
    }

    /// Takes the value out of a node the caller has marked, leaving null behind so that no
    /// later update can land in it. Returns a clone; the taken box is retired.
    pub(crate) fn take_value(&self, guard: &Guard<'_>) -> V
    where
        V: Clone,
    {
        let taken = self.value.swap(ptr::null_mut(), Ordering::AcqRel);
        debug_assert!(!taken.is_null());
        unsafe {
            let value = V::clone(&*taken);
            guard.retire(taken);
            value
        }
    }

    /// Marks every slot of the tower, top to bottom. Returns `true` if this call marked level 0,
    /// i.e. the caller is the one that deleted the node.
    pub(crate) fn mark_tower(&self) -> bool {
        for level in (0..self.target_height()).rev() {
            let prev = self.next[level].fetch_or(MARKED, Ordering::SeqCst);
            // If the level 0 pointer was already marked, somebody else removed the node.
            if level == 0 && tag(prev) & MARKED != 0 {
                return false;
            }
        }
        true
    }

    /// Takes a promoter reference unless the node has already been retired.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut refs = self.refs.load(Ordering::Relaxed);
        loop {
            if refs == 0 {
                return false;
            }
            match self.refs.compare_exchange_weak(
                refs,
                refs + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => refs = current,
            }
        }
    }

    /// Drops one reference and retires the node with the last one.
    ///
    /// # Safety
    ///
    /// The node must have been allocated with `Box` and the caller must own one reference.
    pub(crate) unsafe fn decrement(&self, guard: &Guard<'_>) {
        if self.refs.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            guard.retire(self as *const Self as *mut Self);
        }
    }
}

impl<K, V> Drop for Node<K, V> {
    fn drop(&mut self) {
        let value = self.value.load(Ordering::Relaxed);
        if !value.is_null() {
            drop(unsafe { Box::from_raw(value) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skip_list::tag::untagged;

    #[test]
    fn fresh_tower_is_unlinked_above_level_0() {
        let node = Node::new(1, "one".to_string(), 3);
        assert_eq!(node.target_height(), 3);
        assert_eq!(node.height(), 1);
        assert!(node.next[0].load(Ordering::Relaxed).is_null());
        for level in 1..3 {
            let slot = node.next[level].load(Ordering::Relaxed);
            assert_eq!(tag(slot), UNLINKED);
            assert!(untagged(slot).is_null());
        }
        assert!(!node.is_marked());
    }

    #[test]
    fn only_the_first_marker_wins() {
        let node = Node::new(1, 1, 4);
        assert!(node.mark_tower());
        assert!(!node.mark_tower());
        assert!(node.is_marked());
        for level in 1..4 {
            let slot = node.next[level].load(Ordering::Relaxed);
            assert_eq!(tag(slot), UNLINKED | MARKED);
        }
    }

    #[test]
    fn into_parts_returns_key_and_value() {
        let node = Box::new(Node::new("k".to_string(), vec![1, 2, 3], 2));
        let (key, value) = node.into_parts();
        assert_eq!(key, "k");
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[test]
    fn taken_value_refuses_replacement() {
        let guard = &rotate_ebr::pin();
        let node = Node::new(7, "old".to_string(), 1);
        assert_eq!(node.replace_value("new".to_string(), guard), Ok(()));
        assert_eq!(node.value(guard).map(String::as_str), Some("new"));

        assert!(node.mark_tower());
        assert_eq!(node.take_value(guard), "new");
        assert!(node.value(guard).is_none());
        assert_eq!(
            node.replace_value("late".to_string(), guard),
            Err("late".to_string())
        );
    }

    #[test]
    fn acquire_fails_after_last_reference() {
        let node = Node::new(0, 0, 1);
        node.refs.store(0, Ordering::Relaxed);
        assert!(!node.try_acquire());
        node.refs.store(1, Ordering::Relaxed);
        assert!(node.try_acquire());
        assert_eq!(node.refs.load(Ordering::Relaxed), 2);
    }
}
