use std::fmt;
use std::ptr;
use std::sync::atomic::Ordering;

use rotate_ebr::{pin, Guard};

use super::node::Node;
use super::tag::{tag, untagged, MARKED};
use super::RotateSkiplist;
use crate::comparator::KeyComparator;

/// A lazy ascending scan over level 0.
///
/// The scan keeps the thread pinned until it is dropped, so it should not be held for long. It
/// is not a snapshot: entries inserted or deleted while it runs may or may not be seen, but
/// every yielded entry was live when it was reached, keys are strictly ascending, and none lies
/// outside the requested bounds.
pub struct Range<'a, K, V, C> {
    list: &'a RotateSkiplist<K, V, C>,
    guard: Guard<'static>,
    curr: *mut Node<K, V>,
    hi: Option<K>,
    last: Option<K>,
}

impl<K, V, C> RotateSkiplist<K, V, C>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: KeyComparator<K>,
{
    /// Scans the entries with keys in `[lo, hi]`.
    pub fn range(&self, lo: &K, hi: &K) -> Range<'_, K, V, C> {
        let guard = pin();
        let curr = self
            .seek(lo, &guard)
            .map_or(ptr::null_mut(), |node| node as *const _ as *mut _);
        Range {
            list: self,
            guard,
            curr,
            hi: Some(hi.clone()),
            last: None,
        }
    }

    /// Scans every entry.
    pub fn iter(&self) -> Range<'_, K, V, C> {
        let guard = pin();
        let curr = untagged(self.head[0].load(Ordering::Acquire));
        Range {
            list: self,
            guard,
            curr,
            hi: None,
            last: None,
        }
    }
}

impl<K, V, C> Iterator for Range<'_, K, V, C>
where
    K: Clone,
    V: Clone,
    C: KeyComparator<K>,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = unsafe { self.curr.as_ref() } {
            let succ = node.next[0].load(Ordering::Acquire);
            self.curr = untagged(succ);

            if let Some(hi) = &self.hi {
                if self.list.comparator.less(hi, &node.key) {
                    self.curr = ptr::null_mut();
                    return None;
                }
            }
            if tag(succ) & MARKED != 0 {
                continue;
            }
            // A scan that went through deleted nodes may come back to a key it already passed.
            if let Some(last) = &self.last {
                if !self.list.comparator.less(last, &node.key) {
                    continue;
                }
            }

            let value = match node.value(&self.guard) {
                Some(value) => value.clone(),
                None => continue,
            };
            self.last = Some(node.key.clone());
            return Some((node.key.clone(), value));
        }
        None
    }
}

impl<K, V, C> fmt::Debug for Range<'_, K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Range")
            .field("guard", &self.guard)
            .field("exhausted", &self.curr.is_null())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::RotateSkiplist;

    #[test]
    fn range_is_ascending_and_bounded() {
        let list = RotateSkiplist::new();
        for key in [5, 1, 9, 3] {
            list.insert(key, key.to_string()).unwrap();
        }
        let entries: Vec<(i32, String)> = list.range(&0, &10).collect();
        assert_eq!(
            entries,
            vec![
                (1, "1".to_string()),
                (3, "3".to_string()),
                (5, "5".to_string()),
                (9, "9".to_string()),
            ]
        );

        let keys: Vec<i32> = list.range(&2, &5).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![3, 5]);
        assert_eq!(list.range(&6, &8).count(), 0);
        assert_eq!(list.range(&9, &1).count(), 0);
    }

    #[test]
    fn deleted_entries_are_skipped() {
        let list = RotateSkiplist::new();
        for key in 0..20 {
            list.insert(key, key).unwrap();
        }
        for key in (0..20).filter(|k| k % 2 == 1) {
            list.delete(&key).unwrap();
        }
        let keys: Vec<i32> = list.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, (0..20).step_by(2).collect::<Vec<_>>());
    }
}
