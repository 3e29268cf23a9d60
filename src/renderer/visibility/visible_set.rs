//! Fixed-capacity visible-index list.
//!
//! Workers push concurrently: a slot is reserved with `fetch_add` and then
//! written, no lock involved. Pushes past the capacity are dropped and
//! counted; [`VisibleSet::ensure_capacity`] grows the list between passes on
//! the frame-preparation thread.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct VisibleSet {
    entries: Vec<AtomicU32>,
    cursor: AtomicU32,
    dropped: AtomicU32,
}

impl VisibleSet {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            entries: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            cursor: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Number of stored entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.cursor.load(Ordering::Acquire).min(self.capacity())
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes rejected because the set was full since the last clear.
    #[inline]
    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Appends `index`. Returns `false` when the set is full.
    pub fn push(&self, index: u32) -> bool {
        let slot = self.cursor.fetch_add(1, Ordering::AcqRel);
        match self.entries.get(slot as usize) {
            Some(entry) => {
                entry.store(index, Ordering::Release);
                true
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn clear(&mut self) {
        *self.cursor.get_mut() = 0;
        *self.dropped.get_mut() = 0;
    }

    /// Grows the capacity to at least `needed` entries (next power of two).
    pub fn ensure_capacity(&mut self, needed: u32) {
        if needed <= self.capacity() {
            return;
        }
        let capacity = needed.next_power_of_two();
        log::info!("Visible set expanding capacity: {} -> {}", self.capacity(), capacity);
        self.entries.resize_with(capacity as usize, || AtomicU32::new(0));
    }

    /// Copies the stored entries out. Call after all pushes finished.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u32> {
        self.entries[..self.len() as usize]
            .iter()
            .map(|e| e.load(Ordering::Acquire))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_past_capacity_are_dropped() {
        let mut set = VisibleSet::new(4);
        for i in 0..6 {
            set.push(i);
        }
        assert_eq!(set.len(), 4);
        assert_eq!(set.dropped(), 2);
        assert_eq!(set.to_vec(), vec![0, 1, 2, 3]);

        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.dropped(), 0);
    }

    #[test]
    fn concurrent_pushes_store_every_value() {
        let set = VisibleSet::new(256);
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let set = &set;
                s.spawn(move || {
                    for i in 0..64 {
                        set.push(t * 64 + i);
                    }
                });
            }
        });
        let mut values = set.to_vec();
        values.sort_unstable();
        assert_eq!(values, (0..256).collect::<Vec<_>>());
    }

    #[test]
    fn ensure_capacity_rounds_up() {
        let mut set = VisibleSet::new(256);
        set.ensure_capacity(300);
        assert_eq!(set.capacity(), 512);
    }
}
