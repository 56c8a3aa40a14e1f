//! A lock-free ordered map whose index levels are built incrementally by rotation, on top of
//! the epoch-based reclamation of [`rotate_ebr`].
//!
//! ```
//! use rotate_skiplist::RotateSkiplist;
//!
//! let list = RotateSkiplist::new();
//! for key in [5, 1, 9, 3] {
//!     list.insert(key, key * 10).unwrap();
//! }
//! assert_eq!(list.find(&9), Some(90));
//! let keys: Vec<i32> = list.range(&0, &10).map(|(k, _)| k).collect();
//! assert_eq!(keys, [1, 3, 5, 9]);
//! ```

#[macro_use]
extern crate cfg_if;
extern crate crossbeam_utils;
extern crate rand;
extern crate rotate_ebr;

pub mod comparator;
pub mod concurrent_map;
pub mod config;
pub mod error;
pub mod options;
pub mod skip_list;

pub use comparator::{FnComparator, KeyComparator, OrdComparator};
pub use concurrent_map::ConcurrentMap;
pub use error::SkipListError;
pub use options::{SkipListOptions, MAX_LEVEL_LIMIT};
pub use skip_list::{Range, RotateSkiplist};

cfg_if! {
    if #[cfg(all(not(feature = "sanitize"), target_os = "linux"))] {
        extern crate tikv_jemalloc_ctl;

        /// Reads the number of bytes allocated through jemalloc.
        pub struct MemSampler {
            epoch_mib: tikv_jemalloc_ctl::epoch_mib,
            allocated_mib: tikv_jemalloc_ctl::stats::allocated_mib,
        }

        impl MemSampler {
            pub fn new() -> Self {
                MemSampler {
                    epoch_mib: tikv_jemalloc_ctl::epoch::mib().unwrap(),
                    allocated_mib: tikv_jemalloc_ctl::stats::allocated::mib().unwrap(),
                }
            }

            pub fn sample(&self) -> usize {
                self.epoch_mib.advance().unwrap();
                self.allocated_mib.read().unwrap()
            }
        }
    } else {
        pub struct MemSampler {}

        impl MemSampler {
            pub fn new() -> Self {
                println!("NOTE: Memory usage benchmark is supported only for linux.");
                MemSampler {}
            }

            pub fn sample(&self) -> usize {
                0
            }
        }
    }
}

impl Default for MemSampler {
    fn default() -> Self {
        Self::new()
    }
}
