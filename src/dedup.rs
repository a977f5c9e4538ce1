//! Recently-seen correlation tags.
//!
//! The gateway acks every well-formed frame, so a node whose ACK was lost
//! sends the same reading again with the same tag. Remembering the last few
//! tags is enough to avoid forwarding it twice: only copies sent before the
//! node's next distinct reading need to be caught.

use crate::payload::Tag;

/// Capacity used by the gateway.
pub const DUPLICATE_FILTER_LEN: usize = 10;

/// Fixed-capacity ring of tags with FIFO eviction. Not persisted.
#[derive(Debug, Clone)]
pub struct DuplicateFilter<const N: usize = DUPLICATE_FILTER_LEN> {
    slots: [Option<Tag>; N],
    cursor: usize,
}

impl<const N: usize> Default for DuplicateFilter<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> DuplicateFilter<N> {
    /// `N` must be at least 1.
    pub fn new() -> Self {
        debug_assert!(N > 0, "duplicate filter needs at least one slot");
        Self { slots: [None; N], cursor: 0 }
    }

    /// Returns true if `tag` is among the last N accepted tags, leaving the
    /// filter untouched. Otherwise records `tag` over the oldest slot and
    /// returns false.
    pub fn is_duplicate(&mut self, tag: Tag) -> bool {
        // linear scan, N is tiny
        if self.slots.iter().any(|slot| *slot == Some(tag)) {
            return true;
        }
        self.slots[self.cursor] = Some(tag);
        self.cursor = (self.cursor + 1) % N;
        false
    }

    pub fn capacity(&self) -> usize {
        N
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_tag_twice_is_duplicate() {
        let mut f = DuplicateFilter::<10>::new();
        assert!(!f.is_duplicate(1234));
        assert!(f.is_duplicate(1234));
        assert!(f.is_duplicate(1234));
    }

    #[test]
    fn oldest_tag_is_evicted_after_n_more() {
        let mut f = DuplicateFilter::<10>::new();
        for tag in 100..=110 {
            assert!(!f.is_duplicate(tag));
        }
        // 100 was overwritten by 110
        assert!(!f.is_duplicate(100));
        // 100 took 101's slot; 102..=110 are still remembered
        for tag in 102..=110 {
            assert!(f.is_duplicate(tag), "tag {tag} should still be remembered");
        }
    }

    #[test]
    fn zero_tag_is_not_a_duplicate_on_a_fresh_filter() {
        let mut f = DuplicateFilter::<10>::new();
        assert!(!f.is_duplicate(0));
        assert!(f.is_duplicate(0));
    }

    #[test]
    fn duplicate_check_does_not_advance_cursor() {
        let mut f = DuplicateFilter::<2>::new();
        assert!(!f.is_duplicate(1));
        assert!(f.is_duplicate(1));
        assert!(!f.is_duplicate(2));
        // both still held: the repeated 1 did not consume a slot
        assert!(f.is_duplicate(1));
        assert!(f.is_duplicate(2));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "at least one slot")]
    fn zero_capacity_is_rejected() {
        let _ = DuplicateFilter::<0>::new();
    }
}
