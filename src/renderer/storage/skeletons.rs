//! Skeleton Storage
//!
//! Bone matrices of skinned objects in a fixed-block [`ByteArena`].
//!
//! The block granularity is chosen once at startup from [`BoneBlock`]: the
//! largest entry whose matrix count divides `max_bones` and whose byte size
//! is a multiple of the device's storage-offset alignment. The resident
//! buffer keeps `max_bones` matrices of zeroed slack at its end, so a shader
//! indexing a full-size bone array from any block stays in bounds.

use glam::Mat4;

use super::byte_arena::{ArenaBlock, ArenaSync, BlockPolicy, ByteArena};
use crate::settings::StorageSettings;

pub const BONE_SIZE: u32 = size_of::<Mat4>() as u32;

/// Supported skeleton block sizes, in bone matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoneBlock {
    M1,
    M2,
    M4,
    M8,
    M16,
    M32,
}

impl BoneBlock {
    pub const ALL: [BoneBlock; 6] = [Self::M1, Self::M2, Self::M4, Self::M8, Self::M16, Self::M32];

    #[inline]
    #[must_use]
    pub fn matrices(self) -> u32 {
        1 << (self as u32)
    }

    #[inline]
    #[must_use]
    pub fn bytes(self) -> u32 {
        self.matrices() * BONE_SIZE
    }

    /// Largest block dividing `max_bones` and aligned to `alignment` bytes.
    ///
    /// Falls back to the smallest aligned block when none divides `max_bones`,
    /// and to the largest block when none is aligned.
    #[must_use]
    pub fn select(max_bones: u32, alignment: u32) -> Self {
        let aligned = |b: &BoneBlock| alignment == 0 || b.bytes() % alignment == 0;

        if let Some(block) = Self::ALL
            .iter()
            .rev()
            .find(|b| aligned(b) && max_bones % b.matrices() == 0)
        {
            return *block;
        }

        log::warn!(
            "No bone block divides {} bones at {}-byte alignment; padding skeletons",
            max_bones,
            alignment
        );
        Self::ALL.into_iter().find(aligned).unwrap_or(Self::M32)
    }
}

pub struct SkeletonStorage {
    arena: ByteArena,
    block: BoneBlock,
    max_bones: u32,
}

impl SkeletonStorage {
    #[must_use]
    pub fn new(settings: &StorageSettings, min_storage_offset_alignment: u32) -> Self {
        let block = BoneBlock::select(settings.max_bones, min_storage_offset_alignment);
        log::info!("Skeleton storage: {:?} ({} bytes per block)", block, block.bytes());

        let arena = ByteArena::new(
            "Skeleton",
            BlockPolicy::Fixed { block: block.bytes() },
            settings.dirty_sub_block,
        )
        .with_tail_padding(settings.max_bones * BONE_SIZE);

        Self {
            arena,
            block,
            max_bones: settings.max_bones,
        }
    }

    #[inline]
    #[must_use]
    pub fn block(&self) -> BoneBlock {
        self.block
    }

    #[must_use]
    pub fn arena(&self) -> &ByteArena {
        &self.arena
    }

    /// Block for `bones` matrices, clamped to `max_bones`.
    pub fn alloc(&mut self, bones: u32) -> ArenaBlock {
        self.arena.alloc(bones.clamp(1, self.max_bones) * BONE_SIZE)
    }

    /// Resizes `block` for `bones` matrices, keeping the existing ones.
    pub fn realloc(&mut self, block: ArenaBlock, bones: u32) -> ArenaBlock {
        self.arena.realloc(block, bones.clamp(1, self.max_bones) * BONE_SIZE)
    }

    pub fn free(&mut self, block: ArenaBlock) {
        self.arena.free(block);
    }

    pub fn shrink_to_fit(&mut self) {
        self.arena.shrink_to_fit();
    }

    /// Writes bone matrices; extra bones beyond the block are dropped.
    pub fn write_bones(&mut self, block: &ArenaBlock, bones: &[Mat4]) {
        let fit = (block.size / BONE_SIZE) as usize;
        let bones = &bones[..bones.len().min(fit)];
        self.arena.write(block, 0, bytemuck::cast_slice(bones));
    }

    /// Index of the block's first matrix in the skeleton buffer.
    #[must_use]
    pub fn bone_offset(&self, block: &ArenaBlock) -> u32 {
        block.offset / BONE_SIZE
    }

    pub fn prepare(&mut self) -> ArenaSync {
        self.arena.prepare()
    }
}
