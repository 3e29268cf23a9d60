//! Byte Arena
//!
//! Block allocator over one byte buffer, backing the instance and skeleton
//! storages.
//!
//! # Overview
//!
//! - Requests are rounded by a [`BlockPolicy`]: to the next power of two
//!   (instances) or to a multiple of a fixed block (skeletons).
//! - Allocation reuses an exact-size free block, else carves the smallest
//!   larger one, else appends.
//! - Dirty tracking is per `sub_block` bytes, finer than a whole object, so
//!   a matrix update uploads one or two sub-blocks instead of the full record.
//! - The resident buffer grows in power-of-two byte classes; a class change
//!   is a full upload, anything else a [`Patch`] of dirty sub-blocks.

use std::ops::Range;

use crate::renderer::core::{DirtyBits, FreeList, Patch};

/// Smallest resident buffer, in bytes.
const MIN_RESIDENT_BYTES: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPolicy {
    /// Next power of two, never below `alignment`.
    PowerOfTwo { alignment: u32 },
    /// Whole multiples of `block` bytes.
    Fixed { block: u32 },
}

impl BlockPolicy {
    #[must_use]
    pub fn block_size(self, requested: u32) -> u32 {
        let requested = requested.max(1);
        match self {
            Self::PowerOfTwo { alignment } => requested.next_power_of_two().max(alignment),
            Self::Fixed { block } => requested.div_ceil(block) * block,
        }
    }
}

/// One allocation. Identity is the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaBlock {
    pub offset: u32,
    /// Allocated size after policy rounding.
    pub size: u32,
    /// Size asked for.
    pub requested: u32,
}

impl ArenaBlock {
    #[inline]
    #[must_use]
    pub fn range(&self) -> Range<u32> {
        self.offset..self.offset + self.size
    }
}

/// What [`ByteArena::prepare`] wants done to the resident buffer.
#[derive(Debug)]
pub enum ArenaSync {
    Clean,
    Patched(Patch),
    Reallocated(Vec<u8>),
}

pub struct ByteArena {
    label: &'static str,
    data: Vec<u8>,
    /// Logical arena size in bytes: live plus free blocks.
    end: u32,
    free_list: FreeList,
    dirty: DirtyBits,
    policy: BlockPolicy,
    sub_block: u32,
    /// Zero bytes appended to every upload.
    tail_padding: u32,
    gpu_size: u32,
    live_bytes: u32,
}

impl ByteArena {
    #[must_use]
    pub fn new(label: &'static str, policy: BlockPolicy, sub_block: u32) -> Self {
        debug_assert!(sub_block.is_power_of_two() && sub_block % 4 == 0);
        Self {
            label,
            data: Vec::new(),
            end: 0,
            free_list: FreeList::new(),
            dirty: DirtyBits::new(),
            policy,
            sub_block,
            tail_padding: 0,
            gpu_size: 0,
            live_bytes: 0,
        }
    }

    /// Keeps `bytes` of zeroed slack after the last block in the resident
    /// buffer, so shaders may read a fixed-size array from any block.
    #[must_use]
    pub fn with_tail_padding(mut self, bytes: u32) -> Self {
        self.tail_padding = bytes.next_multiple_of(self.sub_block);
        self
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> BlockPolicy {
        self.policy
    }

    /// Logical size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.end
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    #[inline]
    #[must_use]
    pub fn live_bytes(&self) -> u32 {
        self.live_bytes
    }

    #[must_use]
    pub fn free_ranges(&self) -> &[Range<u32>] {
        self.free_list.ranges()
    }

    #[must_use]
    pub fn free_bytes(&self) -> u32 {
        self.free_list.total()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.end as usize]
    }

    #[must_use]
    pub fn bytes(&self, block: &ArenaBlock) -> &[u8] {
        &self.data[block.offset as usize..(block.offset + block.size) as usize]
    }

    fn resize_storage(&mut self, end: u32) {
        self.end = end;
        let padded = end.next_multiple_of(self.sub_block);
        self.data.resize(padded as usize, 0);
        self.dirty.resize(padded / self.sub_block);
    }

    pub fn alloc(&mut self, requested: u32) -> ArenaBlock {
        let size = self.policy.block_size(requested);
        let offset = match self.free_list.take(size) {
            Some(offset) => offset,
            None => {
                let offset = self.end;
                self.resize_storage(offset + size);
                offset
            }
        };
        self.live_bytes += size;
        ArenaBlock {
            offset,
            size,
            requested,
        }
    }

    pub fn free(&mut self, block: ArenaBlock) {
        self.live_bytes -= block.size;
        self.free_list.insert(block.offset, block.size);
    }

    /// Moves `block` to a block of `requested` bytes, keeping its contents.
    ///
    /// Returns the same block when the rounded size is unchanged.
    pub fn realloc(&mut self, block: ArenaBlock, requested: u32) -> ArenaBlock {
        if self.policy.block_size(requested) == block.size {
            return ArenaBlock { requested, ..block };
        }

        let moved = self.alloc(requested);
        let keep = block.requested.min(requested).min(block.size).min(moved.size);
        let src = block.offset as usize;
        self.data.copy_within(src..src + keep as usize, moved.offset as usize);
        self.mark(moved.offset, keep);
        self.free(block);
        moved
    }

    /// Drops a trailing free block.
    pub fn shrink_to_fit(&mut self) {
        let end = self.free_list.trim_tail(self.end);
        if end != self.end {
            log::debug!("{} arena compacted: {} -> {} bytes", self.label, self.end, end);
            self.resize_storage(end);
            self.data.shrink_to_fit();
        }
    }

    /// Flags `len` bytes at `offset` for upload. Lock-free.
    pub fn mark(&self, offset: u32, len: u32) {
        if len == 0 {
            return;
        }
        let first = offset / self.sub_block;
        let last = (offset + len - 1) / self.sub_block;
        self.dirty.mark(first, last - first + 1);
    }

    /// Writes `bytes` at `offset` inside `block` and marks them dirty.
    pub fn write(&mut self, block: &ArenaBlock, offset: u32, bytes: &[u8]) {
        let len = bytes.len() as u32;
        if offset + len > block.size {
            log::warn!(
                "{} arena write of {} bytes at {} overflows a {}-byte block, skipped",
                self.label,
                len,
                offset,
                block.size
            );
            return;
        }
        let at = (block.offset + offset) as usize;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
        self.mark(block.offset + offset, len);
    }

    pub fn write_pod<T: bytemuck::Pod>(&mut self, block: &ArenaBlock, offset: u32, value: &T) {
        self.write(block, offset, bytemuck::bytes_of(value));
    }

    #[must_use]
    pub fn is_dirty(&self, offset: u32) -> bool {
        self.dirty.is_set(offset / self.sub_block)
    }

    /// Resident size class for the current contents.
    #[must_use]
    pub fn resident_size(&self) -> u32 {
        (self.data.len() as u32 + self.tail_padding)
            .next_power_of_two()
            .max(MIN_RESIDENT_BYTES)
    }

    /// Decides how to bring the resident buffer up to date and clears the
    /// dirty bits accordingly.
    pub fn prepare(&mut self) -> ArenaSync {
        let size = self.resident_size();
        if size != self.gpu_size {
            log::info!("{} buffer reallocated: {} -> {} bytes", self.label, self.gpu_size, size);
            self.gpu_size = size;
            self.dirty.clear();

            let mut contents = Vec::with_capacity(size as usize);
            contents.extend_from_slice(&self.data);
            contents.resize(size as usize, 0);
            return ArenaSync::Reallocated(contents);
        }

        match Patch::gather(&mut self.dirty, &self.data, self.sub_block) {
            Some(patch) => {
                log::debug!("{} patch: {} sub-blocks", self.label, patch.len());
                ArenaSync::Patched(patch)
            }
            None => ArenaSync::Clean,
        }
    }
}
