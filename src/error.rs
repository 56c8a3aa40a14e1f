use std::error::Error;
use std::fmt;

/// Expected outcomes of skip-list operations that did not change the map.
///
/// These are ordinary results, not failures of the structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipListError {
    /// An insert without upsert found the key already present.
    DuplicateKey,
    /// The key is not present.
    NotFound,
    /// A level breaks the ordering or subsequence invariant. Only reported by
    /// [`RotateSkiplist::check_levels`](crate::RotateSkiplist::check_levels).
    Inconsistent { level: usize },
}

impl SkipListError {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipListError::DuplicateKey => "Duplicate key",
            SkipListError::NotFound => "Not found",
            SkipListError::Inconsistent { .. } => "Inconsistent level",
        }
    }
}

impl fmt::Display for SkipListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipListError::Inconsistent { level } => write!(f, "{} {}", self.as_str(), level),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl Error for SkipListError {}
