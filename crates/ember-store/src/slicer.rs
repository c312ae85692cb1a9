//! Row-range descriptor for one shard's partition
//!
//! A variable is split across shards by key range. The slicer records
//! which slice of the global key space this shard owns and therefore how
//! many local rows it may ever address. The store itself consults only
//! the addressable bound; mapping external keys to local rows is the
//! caller's business, via [`RowSlicer::local_row`].

use serde::{Deserialize, Serialize};

/// Descriptor of the key slice a shard owns for one variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSlicer {
    begin: u64,
    end: Option<u64>,
}

impl RowSlicer {
    /// Slicer owning the key range `[begin, end)`.
    pub fn bounded(begin: u64, end: u64) -> Self {
        Self { begin, end: Some(end.max(begin)) }
    }

    /// Slicer with no upper bound; every local row id is addressable.
    pub fn unbounded() -> Self {
        Self { begin: 0, end: None }
    }

    /// First key this shard owns.
    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// One past the last key this shard owns, `None` when unbounded.
    pub fn end(&self) -> Option<u64> {
        self.end
    }

    /// Number of local rows this shard may address, `None` when
    /// unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.end.map(|end| (end - self.begin) as usize)
    }

    /// Whether local row `id` falls inside the addressable range.
    pub fn can_address(&self, id: usize) -> bool {
        match self.capacity() {
            Some(capacity) => id < capacity,
            None => true,
        }
    }

    /// Local row for a global key, `None` when the key belongs to some
    /// other shard.
    pub fn local_row(&self, key: u64) -> Option<usize> {
        if key < self.begin {
            return None;
        }
        if let Some(end) = self.end {
            if key >= end {
                return None;
            }
        }
        Some((key - self.begin) as usize)
    }
}

impl Default for RowSlicer {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_addressing() {
        let slicer = RowSlicer::bounded(100, 164);
        assert_eq!(slicer.capacity(), Some(64));
        assert!(slicer.can_address(0));
        assert!(slicer.can_address(63));
        assert!(!slicer.can_address(64));
    }

    #[test]
    fn test_unbounded_addressing() {
        let slicer = RowSlicer::unbounded();
        assert_eq!(slicer.capacity(), None);
        assert!(slicer.can_address(usize::MAX));
    }

    #[test]
    fn test_local_row_mapping() {
        let slicer = RowSlicer::bounded(100, 164);
        assert_eq!(slicer.local_row(100), Some(0));
        assert_eq!(slicer.local_row(163), Some(63));
        assert_eq!(slicer.local_row(164), None);
        assert_eq!(slicer.local_row(99), None);

        let open = RowSlicer::unbounded();
        assert_eq!(open.local_row(7), Some(7));
    }

    #[test]
    fn test_inverted_bounds_collapse() {
        let slicer = RowSlicer::bounded(10, 5);
        assert_eq!(slicer.capacity(), Some(0));
        assert!(!slicer.can_address(0));
    }
}
