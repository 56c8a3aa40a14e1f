//! A lock-free skip list whose index levels are built by rotation.
//!
//! An insert only links the new node at level 0. Each node draws a target height when it is
//! allocated, and traversals that step over a node still below its target link it one level
//! higher ("promotion"). Promotion is advisory: a failed attempt is abandoned, never retried.
//!
//! Deletion marks every slot of the node's tower, top to bottom; marking level 0 is the
//! linearization point. Marked nodes are unlinked by the deleter or by any traversal that meets
//! them, and are retired to the epoch-based reclaimer once their last link is gone.

mod node;
mod range;
mod tag;

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use log::trace;
use rotate_ebr::{pin, Guard};
use scopeguard::ScopeGuard;

use crate::comparator::{KeyComparator, OrdComparator};
use crate::concurrent_map::ConcurrentMap;
use crate::error::SkipListError;
use crate::options::{SkipListOptions, MAX_LEVEL_LIMIT};

use self::node::{Node, Tower};
use self::tag::{tag, tagged, untagged, MARKED, UNLINKED};

pub use self::range::Range;

struct Cursor<'g, K, V> {
    /// The level-0 node with the searched key, if it was unmarked when reached.
    found: Option<&'g Node<K, V>>,
    preds: [&'g Tower<K, V>; MAX_LEVEL_LIMIT],
    succs: [*mut Node<K, V>; MAX_LEVEL_LIMIT],
}

impl<'g, K, V> Cursor<'g, K, V> {
    fn new(head: &'g Tower<K, V>) -> Self {
        Self {
            found: None,
            preds: [head; MAX_LEVEL_LIMIT],
            succs: [ptr::null_mut(); MAX_LEVEL_LIMIT],
        }
    }
}

/// A concurrent ordered map.
///
/// Every operation pins the calling thread on the default [`rotate_ebr`] domain for its
/// duration, so the map can be shared by reference between threads without further
/// synchronization. Values are returned by clone.
pub struct RotateSkiplist<K, V, C = OrdComparator> {
    /// Sentinel tower, one slot per level.
    head: Box<Tower<K, V>>,
    comparator: C,
    options: SkipListOptions,
    len: CachePadded<AtomicIsize>,
    _marker: PhantomData<(K, V)>,
}

unsafe impl<K: Send + Sync, V: Send + Sync, C: Send> Send for RotateSkiplist<K, V, C> {}
unsafe impl<K: Send + Sync, V: Send + Sync, C: Sync> Sync for RotateSkiplist<K, V, C> {}

impl<K: Ord, V> RotateSkiplist<K, V> {
    pub fn new() -> Self {
        Self::with_options(SkipListOptions::default())
    }

    pub fn with_options(options: SkipListOptions) -> Self {
        Self::with_comparator(options, OrdComparator)
    }
}

impl<K: Ord, V> Default for RotateSkiplist<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> RotateSkiplist<K, V, C> {
    pub fn with_comparator(options: SkipListOptions, comparator: C) -> Self {
        let head = (0..options.get_max_level())
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            head,
            comparator,
            options,
            len: CachePadded::new(AtomicIsize::new(0)),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn options(&self) -> &SkipListOptions {
        &self.options
    }

    /// Returns the number of entries. Concurrent inserts and deletes may or may not be counted
    /// yet.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry. The exclusive borrow guarantees no operation is in flight.
    pub fn clear(&mut self) {
        unsafe { self.free_nodes() };
        for slot in self.head.iter() {
            slot.store(ptr::null_mut(), Ordering::Relaxed);
        }
        self.len.store(0, Ordering::Relaxed);
    }

    /// Frees every node reachable from the head at any level.
    ///
    /// # Safety
    ///
    /// No other thread may access the list. Nodes are left dangling in the head.
    unsafe fn free_nodes(&mut self) {
        let mut nodes = HashSet::new();
        for (level, slot) in self.head.iter().enumerate() {
            let mut curr = untagged(slot.load(Ordering::Relaxed));
            while let Some(curr_ref) = curr.as_ref() {
                nodes.insert(curr);
                curr = untagged(curr_ref.next[level].load(Ordering::Relaxed));
            }
        }
        for node in nodes {
            drop(Box::from_raw(node));
        }
    }
}

impl<K, V, C> RotateSkiplist<K, V, C>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: KeyComparator<K>,
{
    /// Index of the highest level whose head slot is set, plus one.
    fn start_level(&self) -> usize {
        let mut level = self.head.len();
        while level >= 1 && self.head[level - 1].load(Ordering::Relaxed).is_null() {
            level -= 1;
        }
        level
    }

    /// Returns the first node whose key is not less than `key`, marked nodes included. Does not
    /// help and does not promote.
    fn seek<'g>(&'g self, key: &K, _guard: &'g Guard<'static>) -> Option<&'g Node<K, V>> {
        let mut level = self.start_level();
        let mut pred: &Tower<K, V> = &self.head;
        let mut curr = ptr::null_mut();

        while level >= 1 {
            level -= 1;
            curr = untagged(pred[level].load(Ordering::Acquire));

            while let Some(curr_ref) = unsafe { curr.as_ref() } {
                if !self.comparator.less(&curr_ref.key, key) {
                    break;
                }
                pred = &curr_ref.next;
                curr = untagged(curr_ref.next[level].load(Ordering::Acquire));
            }
        }

        unsafe { curr.as_ref() }
    }

    /// Helping traversal. Unlinks marked nodes on the way and promotes nodes that are below
    /// their target height, at most once per level.
    fn search<'g>(&'g self, key: &K, guard: &'g Guard<'static>) -> Cursor<'g, K, V> {
        let max_level = self.head.len();
        let mut promoted = 0u64;

        'search: loop {
            let mut cursor = Cursor::new(&self.head);
            let mut level = self.start_level();
            let mut pred: &Tower<K, V> = &self.head;

            while level >= 1 {
                level -= 1;
                let mut curr = pred[level].load(Ordering::Acquire);
                // If `curr` is marked, that means `pred` is removed and we have to restart the
                // search.
                if tag(curr) & MARKED != 0 {
                    continue 'search;
                }

                while let Some(curr_ref) = unsafe { curr.as_ref() } {
                    let succ = curr_ref.next[level].load(Ordering::Acquire);

                    if tag(succ) & MARKED != 0 {
                        if self.help_unlink(&pred[level], curr, succ, guard) {
                            curr = untagged(succ);
                            continue;
                        } else {
                            // On failure, we cannot do anything reasonable to continue
                            // searching from the current position. Restart the search.
                            continue 'search;
                        }
                    }

                    match self.comparator.compare(&curr_ref.key, key) {
                        std::cmp::Ordering::Greater => break,
                        std::cmp::Ordering::Equal => {
                            if level == 0 {
                                cursor.found = Some(curr_ref);
                            }
                            break;
                        }
                        std::cmp::Ordering::Less => {}
                    }

                    // `curr` lies between the predecessor we descended from and the searched
                    // key, so it can be linked right after it one level up.
                    let upper = level + 1;
                    if upper < max_level
                        && promoted & (1 << upper) == 0
                        && upper < curr_ref.target_height()
                        && curr_ref.height() == upper
                        && self.try_promote(
                            curr_ref,
                            upper,
                            cursor.preds[upper],
                            cursor.succs[upper],
                            guard,
                        )
                    {
                        promoted |= 1 << upper;
                        if curr_ref.is_marked() {
                            // The deleter may have missed the new link.
                            continue 'search;
                        }
                        cursor.preds[upper] = &curr_ref.next;
                    }

                    // Move one step forward.
                    pred = &curr_ref.next;
                    curr = succ;
                }

                cursor.preds[level] = pred;
                cursor.succs[level] = curr;
            }

            return cursor;
        }
    }

    fn help_unlink(
        &self,
        pred: &AtomicPtr<Node<K, V>>,
        curr: *mut Node<K, V>,
        succ: *mut Node<K, V>,
        guard: &Guard<'static>,
    ) -> bool {
        let success = pred
            .compare_exchange(curr, untagged(succ), Ordering::Release, Ordering::Relaxed)
            .is_ok();

        if success {
            unsafe { (*curr).decrement(guard) };
        }
        success
    }

    /// Links `node` at `level` between `pred` and `succ`. One attempt; any lost race abandons it.
    fn try_promote(
        &self,
        node: &Node<K, V>,
        level: usize,
        pred: &Tower<K, V>,
        succ: *mut Node<K, V>,
        guard: &Guard<'static>,
    ) -> bool {
        if !node.try_acquire() {
            return false;
        }
        // The reference becomes the new link on success and is dropped otherwise.
        let reference = scopeguard::guard((), |_| unsafe { node.decrement(guard) });

        if node.next[level]
            .compare_exchange(
                tagged(ptr::null_mut(), UNLINKED),
                succ,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }

        let node_ptr = node as *const _ as *mut Node<K, V>;
        if pred[level]
            .compare_exchange(succ, node_ptr, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Give the slot back unless a deleter marked it meanwhile.
            let _ = node.next[level].compare_exchange(
                succ,
                tagged(ptr::null_mut(), UNLINKED),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            return false;
        }

        ScopeGuard::into_inner(reference);
        node.raise_height(level + 1);
        trace!("promoted node to level {}", level);
        true
    }

    /// Returns a clone of the value associated with `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let guard = &pin();
        let mut curr = self.seek(key, guard);
        while let Some(node) = curr {
            if !self.comparator.equal(&node.key, key) {
                return None;
            }
            if !node.is_marked() {
                if let Some(value) = node.value(guard) {
                    return Some(value.clone());
                }
            }
            // A deleted node with the same key may still precede the live one.
            curr = unsafe { untagged(node.next[0].load(Ordering::Acquire)).as_ref() };
        }
        None
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Inserts a new entry. If `key` is present, fails with [`SkipListError::DuplicateKey`], or
    /// replaces its value when the list was built with
    /// [`upsert_on_duplicate`](SkipListOptions::upsert_on_duplicate).
    #[inline]
    pub fn insert(&self, key: K, value: V) -> Result<(), SkipListError> {
        self.insert_with(key, value, self.options.get_upsert_on_duplicate())
    }

    /// Inserts a new entry or replaces the value of an existing one.
    #[inline]
    pub fn upsert(&self, key: K, value: V) {
        let result = self.insert_with(key, value, true);
        debug_assert!(result.is_ok());
    }

    pub fn insert_with(&self, key: K, value: V, upsert: bool) -> Result<(), SkipListError> {
        let guard = &pin();
        let backoff = Backoff::new();
        let target_height = self.options.random_height();
        let mut new = Box::into_raw(Box::new(Node::new(key, value, target_height)));

        loop {
            let new_ref = unsafe { &*new };
            let cursor = self.search(&new_ref.key, guard);

            if let Some(found) = cursor.found {
                let node = unsafe { Box::from_raw(new) };
                if !upsert {
                    return Err(SkipListError::DuplicateKey);
                }
                let (key, value) = node.into_parts();
                match found.replace_value(value, guard) {
                    Ok(()) => return Ok(()),
                    // The deleter took the node's value first, so the key is gone. Insert it
                    // again as a fresh node.
                    Err(value) => {
                        new = Box::into_raw(Box::new(Node::new(key, value, target_height)));
                        continue;
                    }
                }
            }

            new_ref.next[0].store(cursor.succs[0], Ordering::Relaxed);
            if cursor.preds[0][0]
                .compare_exchange(cursor.succs[0], new, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // We failed. Let's search for the key and try again.
                backoff.spin();
                continue;
            }

            self.len.fetch_add(1, Ordering::Relaxed);

            // The new node is linked. Give it one chance to reach level 1 right away; later
            // traversals take it further.
            if target_height > 1
                && self.try_promote(new_ref, 1, cursor.preds[1], cursor.succs[1], guard)
                && new_ref.is_marked()
            {
                self.search(&new_ref.key, guard);
            }

            unsafe { new_ref.decrement(guard) };
            return Ok(());
        }
    }

    /// Removes `key` and returns a clone of its value.
    pub fn delete(&self, key: &K) -> Result<V, SkipListError> {
        let guard = &pin();
        loop {
            let cursor = self.search(key, guard);
            let node = cursor.found.ok_or(SkipListError::NotFound)?;

            // Try removing the node by marking its tower.
            if !node.mark_tower() {
                continue;
            }
            self.len.fetch_sub(1, Ordering::Relaxed);
            let value = node.take_value(guard);

            let node_ptr = node as *const _ as *mut Node<K, V>;
            for level in (0..node.target_height()).rev() {
                let succ = node.next[level].load(Ordering::SeqCst);
                if tag(succ) & UNLINKED != 0 {
                    continue;
                }

                // Try linking the predecessor and successor at this level.
                if cursor.preds[level][level]
                    .compare_exchange(node_ptr, untagged(succ), Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    unsafe { node.decrement(guard) };
                } else {
                    self.search(key, guard);
                    break;
                }
            }
            return Ok(value);
        }
    }

    /// Same as [`RotateSkiplist::delete`], discarding the error.
    #[inline]
    pub fn remove(&self, key: &K) -> Option<V> {
        self.delete(key).ok()
    }

    /// Verifies, at a quiescent point, that every level is strictly ordered and that every
    /// level is a subsequence of the one below. Returns the number of live nodes per level.
    pub fn check_levels(&self) -> Result<Vec<usize>, SkipListError> {
        let _guard = pin();
        let mut counts = Vec::with_capacity(self.head.len());
        let mut below = HashSet::new();

        for (level, slot) in self.head.iter().enumerate() {
            let mut current = HashSet::new();
            let mut prev: Option<&Node<K, V>> = None;
            let mut curr = untagged(slot.load(Ordering::Acquire));

            while let Some(curr_ref) = unsafe { curr.as_ref() } {
                let succ = curr_ref.next[level].load(Ordering::Acquire);
                let marked = tag(succ) & MARKED != 0;
                let node = curr;
                curr = untagged(succ);
                if marked {
                    continue;
                }

                if let Some(prev) = prev {
                    if !self.comparator.less(&prev.key, &curr_ref.key) {
                        return Err(SkipListError::Inconsistent { level });
                    }
                }
                if level > 0 && !below.contains(&node) {
                    return Err(SkipListError::Inconsistent { level });
                }
                current.insert(node);
                prev = Some(curr_ref);
            }

            counts.push(current.len());
            below = current;
        }

        Ok(counts)
    }
}

impl<K, V, C> Drop for RotateSkiplist<K, V, C> {
    fn drop(&mut self) {
        unsafe { self.free_nodes() };
    }
}

impl<K, V> ConcurrentMap<K, V> for RotateSkiplist<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        RotateSkiplist::new()
    }

    #[inline(always)]
    fn get(&self, key: &K) -> Option<V> {
        self.find(key)
    }

    #[inline(always)]
    fn insert(&self, key: K, value: V) -> bool {
        self.insert_with(key, value, false).is_ok()
    }

    #[inline(always)]
    fn remove(&self, key: &K) -> Option<V> {
        self.delete(key).ok()
    }
}

impl<K, V, C> fmt::Debug for RotateSkiplist<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotateSkiplist")
            .field("len", &self.len())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::RotateSkiplist;
    use crate::comparator::FnComparator;
    use crate::concurrent_map;
    use crate::error::SkipListError;
    use crate::options::SkipListOptions;

    #[test]
    fn smoke_rotate_skiplist() {
        concurrent_map::tests::smoke::<RotateSkiplist<i32, String>>();
    }

    #[test]
    fn insert_find_delete() {
        let list = RotateSkiplist::new();
        for key in [5, 1, 9, 3] {
            assert_eq!(list.insert(key, key * 10), Ok(()));
        }
        assert_eq!(list.len(), 4);
        assert_eq!(list.insert(3, 0), Err(SkipListError::DuplicateKey));
        assert_eq!(list.find(&3), Some(30));
        assert_eq!(list.find(&4), None);

        assert_eq!(list.delete(&3), Ok(30));
        assert_eq!(list.delete(&3), Err(SkipListError::NotFound));
        assert!(!list.contains(&3));
        assert_eq!(list.len(), 3);
        assert!(list.check_levels().is_ok());
    }

    #[test]
    fn upsert_replaces_value() {
        let list = RotateSkiplist::with_options(SkipListOptions::new().upsert_on_duplicate(true));
        assert_eq!(list.insert("a", 1), Ok(()));
        assert_eq!(list.insert("a", 2), Ok(()));
        assert_eq!(list.find(&"a"), Some(2));
        list.upsert("b", 3);
        list.upsert("b", 4);
        assert_eq!(list.find(&"b"), Some(4));
        assert_eq!(list.insert_with("b", 5, false), Err(SkipListError::DuplicateKey));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn traversals_build_index_levels() {
        let list = RotateSkiplist::with_options(
            SkipListOptions::new().max_level(8).promotion_probability(0.5),
        );
        for key in 0..2000 {
            list.insert(key, ()).unwrap();
        }
        // Searches for absent keys promote the nodes they step over.
        for _ in 0..4 {
            for key in 0..2000 {
                let _ = list.delete(&(key + 10_000));
            }
        }
        let counts = list.check_levels().unwrap();
        assert_eq!(counts[0], 2000);
        assert!(counts[1] > 0);
        assert!(counts.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn single_level_list() {
        let list = RotateSkiplist::with_options(SkipListOptions::new().max_level(1));
        for key in (0..100).rev() {
            list.insert(key, key).unwrap();
        }
        assert_eq!(list.check_levels().unwrap(), vec![100]);
        assert_eq!(list.iter().map(|(k, _)| k).collect::<Vec<_>>(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn custom_comparator_orders_descending() {
        let list = RotateSkiplist::with_comparator(
            SkipListOptions::default(),
            FnComparator::new(|a: &u32, b: &u32| a > b, |a: &u32, b: &u32| a == b),
        );
        for key in [2, 7, 4] {
            list.insert(key, ()).unwrap();
        }
        let keys: Vec<u32> = list.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![7, 4, 2]);
        assert!(list.check_levels().is_ok());
    }

    #[test]
    fn clear_empties_the_list() {
        let mut list = RotateSkiplist::new();
        for key in 0..100u64 {
            list.insert(key, key.to_string()).unwrap();
        }
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.find(&1), None);
        assert_eq!(list.iter().count(), 0);
        list.insert(1, "one".to_string()).unwrap();
        assert_eq!(list.find(&1).as_deref(), Some("one"));
    }
}
