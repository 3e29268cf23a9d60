//! Word-per-32-elements dirty bitmap.
//!
//! Marking is lock-free (`fetch_or`) and may run on worker threads while the
//! frame-preparation thread holds only a shared reference. Resizing and
//! draining need exclusive access.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct DirtyBits {
    words: Vec<AtomicU32>,
    len: u32,
}

impl DirtyBits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grows or shrinks the bitmap. Bits past the new length are discarded.
    pub fn resize(&mut self, len: u32) {
        let words = len.div_ceil(32) as usize;
        self.words.resize_with(words, || AtomicU32::new(0));
        self.len = len;

        let tail = len % 32;
        if tail != 0
            && let Some(last) = self.words.last_mut()
        {
            *last.get_mut() &= (1u32 << tail) - 1;
        }
    }

    /// OR-sets bits `first..first + count`. Bits past the tracked length are ignored.
    pub fn mark(&self, first: u32, count: u32) {
        let end = first.saturating_add(count).min(self.len);
        let mut bit = first;
        while bit < end {
            let word = bit / 32;
            let lo = bit % 32;
            let hi = (end - word * 32).min(32);
            let mask = if hi - lo == 32 {
                u32::MAX
            } else {
                ((1u32 << (hi - lo)) - 1) << lo
            };
            self.words[word as usize].fetch_or(mask, Ordering::Relaxed);
            bit = (word + 1) * 32;
        }
    }

    /// Marks every tracked element.
    pub fn mark_all(&self) {
        self.mark(0, self.len);
    }

    #[must_use]
    pub fn is_set(&self, bit: u32) -> bool {
        if bit >= self.len {
            return false;
        }
        self.words[(bit / 32) as usize].load(Ordering::Relaxed) & (1 << (bit % 32)) != 0
    }

    #[must_use]
    pub fn any(&self) -> bool {
        self.words.iter().any(|w| w.load(Ordering::Relaxed) != 0)
    }

    pub fn clear(&mut self) {
        for w in &mut self.words {
            *w.get_mut() = 0;
        }
    }

    /// Collects contiguous runs of set bits and clears them.
    pub fn drain_runs(&mut self) -> Vec<Range<u32>> {
        let mut runs: Vec<Range<u32>> = Vec::new();

        for (i, word) in self.words.iter_mut().enumerate() {
            let mut bits = std::mem::take(word.get_mut());
            let base = i as u32 * 32;

            while bits != 0 {
                let lo = bits.trailing_zeros();
                let ones = (bits >> lo).trailing_ones();
                let start = base + lo;
                let end = start + ones;

                match runs.last_mut() {
                    Some(last) if last.end == start => last.end = end,
                    _ => runs.push(start..end),
                }

                bits = if lo + ones >= 32 { 0 } else { bits & !(((1u32 << ones) - 1) << lo) };
            }
        }

        runs
    }
}
