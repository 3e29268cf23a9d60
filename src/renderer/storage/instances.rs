//! Instance Storage
//!
//! Per-object GPU records (transform, fatness, wind, skinning offset, morph
//! layers) in a power-of-two [`ByteArena`]. Field setters write only the
//! bytes they change, so dirty tracking stays at sub-block granularity.

use std::mem::offset_of;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::byte_arena::{ArenaBlock, ArenaSync, BlockPolicy, ByteArena};
use crate::settings::{MAX_MORPH_LAYERS, StorageSettings};

/// One active morph layer as seen by the vertex shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MorphGpu {
    /// `u32::MAX` for an unused layer.
    pub anim_id: u32,
    pub first_sample: u32,
    /// Current sample position; the fractional part blends adjacent samples.
    pub sample: f32,
    pub intensity: f32,
}

impl MorphGpu {
    pub const NONE: Self = Self {
        anim_id: u32::MAX,
        first_sample: 0,
        sample: 0.0,
        intensity: 0.0,
    };
}

/// GPU record of one object instance.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceGpu {
    pub model: [[f32; 4]; 4],
    pub fatness: f32,
    pub wind: u32,
    /// Wind sway phase in `[0, 1)`.
    pub wind_phase: f32,
    /// First bone matrix in the skeleton buffer, `u32::MAX` when unskinned.
    pub skin_offset: u32,
    pub morphs: [MorphGpu; MAX_MORPH_LAYERS],
}

impl Default for InstanceGpu {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            fatness: 0.0,
            wind: 0,
            wind_phase: 0.0,
            skin_offset: u32::MAX,
            morphs: [MorphGpu::NONE; MAX_MORPH_LAYERS],
        }
    }
}

pub const INSTANCE_SIZE: u32 = size_of::<InstanceGpu>() as u32;

pub struct InstanceStorage {
    arena: ByteArena,
    alignment: u32,
}

impl InstanceStorage {
    #[must_use]
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            arena: ByteArena::new(
                "Instance",
                BlockPolicy::PowerOfTwo {
                    alignment: settings.instance_alignment,
                },
                settings.dirty_sub_block,
            ),
            alignment: settings.instance_alignment,
        }
    }

    #[must_use]
    pub fn arena(&self) -> &ByteArena {
        &self.arena
    }

    /// Raw block of at least `size` bytes.
    pub fn alloc(&mut self, size: u32) -> ArenaBlock {
        self.arena.alloc(size)
    }

    /// Block holding one [`InstanceGpu`], initialized to defaults.
    pub fn alloc_instance(&mut self) -> ArenaBlock {
        let block = self.arena.alloc(INSTANCE_SIZE);
        self.arena.write_pod(&block, 0, &InstanceGpu::default());
        block
    }

    pub fn free(&mut self, block: ArenaBlock) {
        self.arena.free(block);
    }

    pub fn shrink_to_fit(&mut self) {
        self.arena.shrink_to_fit();
    }

    /// Index of the record in units of the instance alignment, as stored in
    /// cluster records.
    #[must_use]
    pub fn record_index(&self, block: &ArenaBlock) -> u32 {
        block.offset / self.alignment
    }

    #[must_use]
    pub fn read(&self, block: &ArenaBlock) -> InstanceGpu {
        bytemuck::pod_read_unaligned(&self.arena.bytes(block)[..INSTANCE_SIZE as usize])
    }

    pub fn write(&mut self, block: &ArenaBlock, record: &InstanceGpu) {
        self.arena.write_pod(block, 0, record);
    }

    pub fn set_matrix(&mut self, block: &ArenaBlock, matrix: &Mat4) {
        self.arena
            .write_pod(block, offset_of!(InstanceGpu, model) as u32, &matrix.to_cols_array_2d());
    }

    pub fn set_fatness(&mut self, block: &ArenaBlock, fatness: f32) {
        self.arena.write_pod(block, offset_of!(InstanceGpu, fatness) as u32, &fatness);
    }

    pub fn set_wind(&mut self, block: &ArenaBlock, wind: u32, phase: f32) {
        self.arena.write_pod(block, offset_of!(InstanceGpu, wind) as u32, &wind);
        self.arena.write_pod(block, offset_of!(InstanceGpu, wind_phase) as u32, &phase);
    }

    pub fn set_skin_offset(&mut self, block: &ArenaBlock, offset: u32) {
        self.arena.write_pod(block, offset_of!(InstanceGpu, skin_offset) as u32, &offset);
    }

    pub fn set_morphs(&mut self, block: &ArenaBlock, morphs: &[MorphGpu; MAX_MORPH_LAYERS]) {
        self.arena.write_pod(block, offset_of!(InstanceGpu, morphs) as u32, morphs);
    }

    /// Flags bytes of a record for upload without rewriting them. Lock-free.
    pub fn mark(&self, block: &ArenaBlock, offset: u32, len: u32) {
        self.arena.mark(block.offset + offset, len);
    }

    pub fn prepare(&mut self) -> ArenaSync {
        self.arena.prepare()
    }
}
