use std::fmt;

/// A type-erased pointer to an object unlinked from a shared structure, with the function that
/// frees it.
pub(crate) struct Retired {
    ptr: *mut u8,
    deleter: unsafe fn(*mut u8),
}

// The owner of a `Retired` is the only one who can reach `ptr`; freeing may happen on any thread.
unsafe impl Send for Retired {}

impl Retired {
    /// Wraps a pointer previously produced by `Box::into_raw`.
    pub(crate) fn new<T>(ptr: *mut T) -> Self {
        Self {
            ptr: ptr as *mut u8,
            deleter: free::<T>,
        }
    }

    /// Frees the object.
    ///
    /// # Safety
    ///
    /// No thread may still hold a reference to the object.
    #[inline]
    pub(crate) unsafe fn execute(self) {
        (self.deleter)(self.ptr)
    }
}

impl fmt::Debug for Retired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retired").field("ptr", &self.ptr).finish()
    }
}

unsafe fn free<T>(ptr: *mut u8) {
    drop(Box::from_raw(ptr as *mut T))
}

/// Retired objects that were unlinked during the same epoch.
#[derive(Debug)]
pub(crate) struct Bucket {
    epoch: usize,
    objects: Vec<Retired>,
}

impl Bucket {
    pub(crate) fn new(epoch: usize) -> Self {
        Self {
            epoch,
            objects: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn epoch(&self) -> usize {
        self.epoch
    }

    #[inline]
    pub(crate) fn push(&mut self, retired: Retired) {
        self.objects.push(retired);
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    /// Checks if the objects can be freed, given the minimum epoch that any participant in a
    /// critical section may have observed.
    #[inline]
    pub(crate) fn is_expired(&self, min_epoch: usize, grace: usize) -> bool {
        min_epoch >= self.epoch.saturating_add(grace)
    }

    /// Frees every object in the bucket and returns how many were freed.
    ///
    /// # Safety
    ///
    /// The bucket must be expired.
    pub(crate) unsafe fn execute(self) -> usize {
        let count = self.objects.len();
        for retired in self.objects {
            retired.execute();
        }
        count
    }
}
