use core::mem;

/// Set on every tower slot of a logically deleted node. The mark on level 0 decides the deleter.
pub(crate) const MARKED: usize = 1;

/// Set on a tower slot whose level the node has not been linked at yet.
pub(crate) const UNLINKED: usize = 2;

/// Returns a bitmask containing the unused least significant bits of an aligned pointer to `T`.
#[inline]
const fn low_bits<T>() -> usize {
    (1 << mem::align_of::<T>().trailing_zeros()) - 1
}

/// Returns the pointer with the given tag.
#[inline]
pub(crate) fn tagged<T>(ptr: *mut T, tag: usize) -> *mut T {
    ((ptr as usize & !low_bits::<T>()) | (tag & low_bits::<T>())) as *mut T
}

/// Extracts the actual address out of a tagged pointer.
#[inline]
pub(crate) fn untagged<T>(ptr: *mut T) -> *mut T {
    (ptr as usize & !low_bits::<T>()) as *mut T
}

/// Extracts the tag out of a tagged pointer.
#[inline]
pub(crate) fn tag<T>(ptr: *mut T) -> usize {
    ptr as usize & low_bits::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn tags_survive_round_trip() {
        let raw = Box::into_raw(Box::new(7u64));
        let marked = tagged(raw, MARKED | UNLINKED);
        assert_eq!(untagged(marked), raw);
        assert_eq!(tag(marked), MARKED | UNLINKED);
        assert_eq!(tag(raw), 0);
        assert_eq!(untagged(tagged(ptr::null_mut::<u64>(), UNLINKED)), ptr::null_mut());
        drop(unsafe { Box::from_raw(raw) });
    }
}
