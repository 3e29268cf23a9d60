//! Draw-Command Table
//!
//! A draw command is one pipeline/bindings combination plus a contiguous
//! payload range in the global visible-cluster buffer.
//!
//! # Command identity
//!
//! - Bindless devices: `(alpha mode, kind)`. Every bucket with that pair
//!   shares one command and indexes its textures from the descriptor array.
//! - Otherwise: `(alpha mode, kind, bucket)`, one command per bucket.
//!
//! Payload offsets are prefix sums of the commands' meshlet counts and are
//! recomputed on [`DrawCommandTable::commit`] whenever membership changed.
//! Each view has its own indirect-argument buffer with one [`IndirectArgs`]
//! per command.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use rustc_hash::FxHashMap;

use crate::renderer::core::{Patch, SharedBuffer};
use crate::resources::{AlphaMode, Material};
use crate::scene::{CameraView, ObjectKind, VIEW_COUNT, ViewMask};

/// Bucket id recorded on commands shared across buckets.
pub const BINDLESS_BUCKET: u32 = u32::MAX;

/// Returned by [`DrawCommandTable::command_id`] when no view has a pipeline.
pub const INVALID_COMMAND: u32 = u32::MAX;

/// Handle to a compiled render pipeline owned by the pipeline collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub u32);

impl PipelineId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Compiled pipeline-variant lookup.
pub trait PipelineSource: Send + Sync {
    /// The pipeline drawing `material` for `kind` objects into `view`, or
    /// `None` when the combination is not rendered in that view.
    fn pipeline(&self, material: &Material, kind: ObjectKind, view: CameraView, bindless: bool) -> Option<PipelineId>;
}

/// `draw_indirect` argument layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct IndirectArgs {
    /// Indices of one meshlet; each instance draws one visible meshlet.
    pub vertex_count: u32,
    /// Written by the GPU cluster-culling pass.
    pub instance_count: u32,
    pub first_vertex: u32,
    /// Payload offset of the command in the visible-cluster buffer.
    pub first_instance: u32,
}

const ARGS_STRIDE: u32 = size_of::<IndirectArgs>() as u32;

#[derive(Debug, Clone)]
pub struct DrawCommand {
    pub pipelines: [Option<PipelineId>; VIEW_COUNT],
    pub alpha: AlphaMode,
    pub kind: ObjectKind,
    /// Owning bucket, or [`BINDLESS_BUCKET`].
    pub bucket_id: u32,
    pub payload_offset: u32,
    /// Meshlets currently assigned to the command.
    pub payload_count: u32,
}

impl DrawCommand {
    #[inline]
    #[must_use]
    pub fn pipeline(&self, view: CameraView) -> Option<PipelineId> {
        self.pipelines[view.index()]
    }

    #[must_use]
    pub fn views(&self) -> ViewMask {
        CameraView::ALL
            .iter()
            .filter(|v| self.pipeline(**v).is_some())
            .fold(ViewMask::empty(), |mask, v| mask | v.mask())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CommandKey {
    alpha: AlphaMode,
    kind: ObjectKind,
    bucket: u32,
}

pub struct DrawCommandTable {
    commands: Vec<DrawCommand>,
    lookup: FxHashMap<CommandKey, u32>,
    source: Arc<dyn PipelineSource>,
    bindless: bool,
    indices_per_meshlet: u32,
    counts_dirty: bool,
    /// Arguments as last uploaded, per view.
    uploaded: Option<[Vec<IndirectArgs>; VIEW_COUNT]>,
}

impl DrawCommandTable {
    #[must_use]
    pub fn new(source: Arc<dyn PipelineSource>, bindless: bool, indices_per_meshlet: u32) -> Self {
        Self {
            commands: Vec::new(),
            lookup: FxHashMap::default(),
            source,
            bindless,
            indices_per_meshlet,
            counts_dirty: false,
            uploaded: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_bindless(&self) -> bool {
        self.bindless
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.commands.len() as u32
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&DrawCommand> {
        self.commands.get(id as usize)
    }

    #[must_use]
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Sum of all payload counts: the required visible-cluster buffer length.
    #[must_use]
    pub fn total_payload(&self) -> u32 {
        self.commands.iter().map(|c| c.payload_count).sum()
    }

    /// Resolves (and caches) the command for `material`/`kind` in `bucket_id`.
    ///
    /// Returns [`INVALID_COMMAND`] when no view has a pipeline for the
    /// combination.
    pub fn command_id(&mut self, material: &Material, kind: ObjectKind, bucket_id: u32) -> u32 {
        let bucket = if self.bindless { BINDLESS_BUCKET } else { bucket_id };
        let key = CommandKey {
            alpha: material.alpha,
            kind,
            bucket,
        };
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }

        let pipelines = CameraView::ALL.map(|view| self.source.pipeline(material, kind, view, self.bindless));
        if pipelines.iter().all(Option::is_none) {
            log::warn!("No pipeline for {:?} {:?} objects; object will not be drawn", material.alpha, kind);
            return INVALID_COMMAND;
        }

        let id = self.len();
        self.commands.push(DrawCommand {
            pipelines,
            alpha: material.alpha,
            kind,
            bucket_id: bucket,
            payload_offset: 0,
            payload_count: 0,
        });
        self.lookup.insert(key, id);
        self.counts_dirty = true;
        id
    }

    /// Adds `meshlets` to the payload capacity of command `id`.
    pub fn add_clusters(&mut self, id: u32, meshlets: u32) {
        if let Some(cmd) = self.commands.get_mut(id as usize) {
            cmd.payload_count += meshlets;
            self.counts_dirty = true;
        }
    }

    /// Removes `meshlets` from the payload capacity of command `id`.
    pub fn remove_clusters(&mut self, id: u32, meshlets: u32) {
        if let Some(cmd) = self.commands.get_mut(id as usize) {
            cmd.payload_count = cmd.payload_count.saturating_sub(meshlets);
            self.counts_dirty = true;
        }
    }

    fn recompute_offsets(&mut self) {
        let mut offset = 0;
        for cmd in &mut self.commands {
            cmd.payload_offset = offset;
            offset += cmd.payload_count;
        }
    }

    fn build_args(&self, view: CameraView) -> Vec<IndirectArgs> {
        self.commands
            .iter()
            .map(|cmd| IndirectArgs {
                vertex_count: if cmd.pipeline(view).is_some() { self.indices_per_meshlet } else { 0 },
                instance_count: 0,
                first_vertex: 0,
                first_instance: cmd.payload_offset,
            })
            .collect()
    }

    /// Recomputes payload offsets and synchronizes the per-view argument
    /// buffers. Returns `true` when they were reallocated.
    pub fn commit(&mut self, frame: usize, targets: &[SharedBuffer; VIEW_COUNT]) -> bool {
        if !self.counts_dirty && self.uploaded.is_some() {
            return false;
        }
        self.counts_dirty = false;
        self.recompute_offsets();

        let args = CameraView::ALL.map(|view| self.build_args(view));

        let layout_changed = self
            .uploaded
            .as_ref()
            .is_none_or(|prev| prev[0].len() != args[0].len());

        if layout_changed {
            for (target, view_args) in targets.iter().zip(&args) {
                target.lock().reallocate(bytemuck::cast_slice(view_args));
            }
            log::debug!("Indirect arguments rebuilt: {} commands", self.commands.len());
            self.uploaded = Some(args);
            return true;
        }

        if let Some(prev) = &self.uploaded {
            for ((target, view_args), prev_args) in targets.iter().zip(&args).zip(prev) {
                let mut patch = Patch::new(ARGS_STRIDE);
                for (i, (new, old)) in view_args.iter().zip(prev_args).enumerate() {
                    if new != old {
                        patch.push(i as u32, bytemuck::bytes_of(new));
                    }
                }
                if !patch.is_empty() {
                    target.lock().scatter(frame, &patch);
                }
            }
        }
        self.uploaded = Some(args);
        false
    }
}
