//! Sorted free-range list shared by the cluster and byte arenas.
//!
//! Ranges never overlap, stay sorted by start and are merged with their
//! neighbours on insertion, so `free + live == arena size` holds after every
//! operation.

use std::ops::Range;

#[derive(Debug, Default, Clone)]
pub struct FreeList {
    ranges: Vec<Range<u32>>,
}

impl FreeList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn ranges(&self) -> &[Range<u32>] {
        &self.ranges
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Sum of all free range sizes.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Takes an exact-size run if one exists, else splits the smallest larger
    /// run. Returns the start of the taken range.
    pub fn take(&mut self, size: u32) -> Option<u32> {
        self.take_exact(size).or_else(|| self.take_best_fit(size))
    }

    /// Removes and returns a run of exactly `size` elements.
    pub fn take_exact(&mut self, size: u32) -> Option<u32> {
        let pos = self.ranges.iter().position(|r| r.end - r.start == size)?;
        Some(self.ranges.remove(pos).start)
    }

    /// Carves `size` elements from the front of the smallest larger run.
    pub fn take_best_fit(&mut self, size: u32) -> Option<u32> {
        let (pos, _) = self
            .ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| r.end - r.start > size)
            .min_by_key(|(_, r)| r.end - r.start)?;

        let range = &mut self.ranges[pos];
        let start = range.start;
        range.start += size;
        Some(start)
    }

    /// Returns `start..start + size` to the list, merging with adjacent runs.
    pub fn insert(&mut self, start: u32, size: u32) {
        if size == 0 {
            return;
        }
        let end = start + size;
        let pos = self.ranges.partition_point(|r| r.start < start);

        debug_assert!(
            pos == 0 || self.ranges[pos - 1].end <= start,
            "free range {start}..{end} overlaps its predecessor"
        );
        debug_assert!(
            pos == self.ranges.len() || end <= self.ranges[pos].start,
            "free range {start}..{end} overlaps its successor"
        );

        let merge_prev = pos > 0 && self.ranges[pos - 1].end == start;
        let merge_next = pos < self.ranges.len() && self.ranges[pos].start == end;

        match (merge_prev, merge_next) {
            (true, true) => {
                let next_end = self.ranges[pos].end;
                self.ranges[pos - 1].end = next_end;
                self.ranges.remove(pos);
            }
            (true, false) => self.ranges[pos - 1].end = end,
            (false, true) => self.ranges[pos].start = start,
            (false, false) => self.ranges.insert(pos, start..end),
        }
    }

    /// Drops a trailing run ending exactly at `len`, returning the new length.
    pub fn trim_tail(&mut self, len: u32) -> u32 {
        match self.ranges.last() {
            Some(last) if last.end == len => {
                let start = last.start;
                self.ranges.pop();
                start
            }
            _ => len,
        }
    }
}
