//! Key ordering used by the skip list.

use std::cmp::Ordering;
use std::fmt;

/// A total order over keys.
///
/// Both functions must be consistent with each other and cheap to evaluate; they are called on
/// every step of a traversal.
pub trait KeyComparator<K: ?Sized> {
    fn less(&self, a: &K, b: &K) -> bool;

    fn equal(&self, a: &K, b: &K) -> bool;

    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        if self.less(a, b) {
            Ordering::Less
        } else if self.equal(a, b) {
            Ordering::Equal
        } else {
            Ordering::Greater
        }
    }
}

/// Orders keys by their [`Ord`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord + ?Sized> KeyComparator<K> for OrdComparator {
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        a < b
    }

    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        a == b
    }

    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Builds a comparator out of a "less than" and an "equal to" function.
#[derive(Clone, Copy)]
pub struct FnComparator<L, E> {
    less: L,
    equal: E,
}

impl<L, E> FnComparator<L, E> {
    pub fn new(less: L, equal: E) -> Self {
        Self { less, equal }
    }
}

impl<K: ?Sized, L, E> KeyComparator<K> for FnComparator<L, E>
where
    L: Fn(&K, &K) -> bool,
    E: Fn(&K, &K) -> bool,
{
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        (self.less)(a, b)
    }

    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        (self.equal)(a, b)
    }
}

impl<L, E> fmt::Debug for FnComparator<L, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnComparator")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_comparator_reverses_order() {
        let cmp = FnComparator::new(|a: &i32, b: &i32| a > b, |a: &i32, b: &i32| a == b);
        assert_eq!(cmp.compare(&1, &2), Ordering::Greater);
        assert_eq!(cmp.compare(&2, &2), Ordering::Equal);
        assert_eq!(cmp.compare(&3, &2), Ordering::Less);
        assert_eq!(OrdComparator.compare(&1, &2), Ordering::Less);
    }
}
