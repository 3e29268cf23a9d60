//! Parallel-for helper for animation ticks and visibility tests.
//!
//! Work is split into contiguous partitions and run on scoped threads, so
//! closures may borrow frame-local data. The calling thread always takes the
//! last partition.

use std::num::NonZero;
use std::ops::Range;

/// Below this many items per partition, extra threads cost more than they save.
const MIN_ITEMS_PER_THREAD: usize = 32;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    threads: usize,
}

impl WorkerPool {
    /// Pool sized to the hardware concurrency, capped at `max_threads`.
    #[must_use]
    pub fn new(max_threads: u32) -> Self {
        let hardware = std::thread::available_parallelism().map_or(1, NonZero::get);
        let threads = hardware.min(max_threads as usize).max(1);
        log::debug!("Worker pool: {} threads ({} available)", threads, hardware);
        Self { threads }
    }

    /// Pool that runs everything on the calling thread.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self { threads: 1 }
    }

    #[inline]
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    fn partitions(&self, len: usize) -> usize {
        self.threads.min(len.div_ceil(MIN_ITEMS_PER_THREAD)).max(1)
    }

    /// Calls `f(offset, chunk)` for disjoint mutable chunks covering `items`.
    pub fn parallel_for_chunks<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        let parts = self.partitions(items.len());
        if parts <= 1 {
            f(0, items);
            return;
        }

        let chunk = items.len().div_ceil(parts);
        std::thread::scope(|scope| {
            let f = &f;
            let mut chunks = items.chunks_mut(chunk).enumerate();
            let last = chunks.next_back();
            for (i, slice) in chunks {
                scope.spawn(move || f(i * chunk, slice));
            }
            if let Some((i, slice)) = last {
                f(i * chunk, slice);
            }
        });
    }

    /// Calls `f(range)` for disjoint index ranges covering `0..len`.
    pub fn parallel_ranges<F>(&self, len: usize, f: F)
    where
        F: Fn(Range<usize>) + Sync,
    {
        let parts = self.partitions(len);
        if parts <= 1 {
            f(0..len);
            return;
        }

        let chunk = len.div_ceil(parts);
        std::thread::scope(|scope| {
            let f = &f;
            let mut start = 0;
            while start + chunk < len {
                let range = start..start + chunk;
                scope.spawn(move || f(range));
                start += chunk;
            }
            f(start..len);
        });
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::single_threaded()
    }
}
