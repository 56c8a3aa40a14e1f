//! The global epoch and the per-thread observed epoch.
//!
//! The last bit of an [`Epoch`] tells whether the owner is inside a critical section (pinned);
//! the remaining bits hold the epoch value. Packing both into one word lets the reclaimer read
//! a participant's status with a single load.

use core::sync::atomic::{AtomicUsize, Ordering};

/// An epoch that can be marked as pinned or unpinned.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct Epoch {
    /// The least significant bit is set if pinned. The rest of the bits hold the epoch value.
    data: usize,
}

impl Epoch {
    /// Returns the starting epoch in unpinned state.
    #[inline]
    pub const fn starting() -> Self {
        Epoch { data: 0 }
    }

    /// Returns the number of epochs, ignoring the pinned bit.
    #[inline]
    pub fn value(self) -> usize {
        self.data >> 1
    }

    /// Returns `true` if the epoch is marked as pinned.
    #[inline]
    pub fn is_pinned(self) -> bool {
        (self.data & 1) == 1
    }

    /// Returns the same epoch, but marked as pinned.
    #[inline]
    pub fn pinned(self) -> Epoch {
        Epoch {
            data: self.data | 1,
        }
    }

    /// Returns the same epoch, but marked as unpinned.
    #[inline]
    pub fn unpinned(self) -> Epoch {
        Epoch {
            data: self.data & !1,
        }
    }

    /// Returns the successor epoch, keeping the pinned bit as is.
    #[inline]
    pub fn successor(self) -> Epoch {
        Epoch {
            data: self.data.wrapping_add(2),
        }
    }
}

/// An atomic value that holds an `Epoch`.
#[derive(Default, Debug)]
pub struct AtomicEpoch {
    data: AtomicUsize,
}

impl AtomicEpoch {
    #[inline]
    pub const fn new(epoch: Epoch) -> Self {
        Self {
            data: AtomicUsize::new(epoch.data),
        }
    }

    #[inline]
    pub fn load(&self, ord: Ordering) -> Epoch {
        Epoch {
            data: self.data.load(ord),
        }
    }

    #[inline]
    pub fn store(&self, epoch: Epoch, ord: Ordering) {
        self.data.store(epoch.data, ord);
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: Epoch,
        new: Epoch,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Epoch, Epoch> {
        match self
            .data
            .compare_exchange(current.data, new.data, success, failure)
        {
            Ok(data) => Ok(Epoch { data }),
            Err(data) => Err(Epoch { data }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_bit_is_independent_of_value() {
        let e = Epoch::starting().successor().successor();
        assert_eq!(e.value(), 2);
        assert!(!e.is_pinned());
        assert!(e.pinned().is_pinned());
        assert_eq!(e.pinned().value(), 2);
        assert_eq!(e.pinned().unpinned(), e);
        assert_eq!(e.pinned().successor().value(), 3);
        assert!(e.pinned().successor().is_pinned());
    }
}
