//! Draw Submission
//!
//! Turns a view's visible set into an ordered list of [`DrawCall`]s.
//!
//! # Overview
//!
//! Two submission paths exist:
//!
//! - **Cluster path** (`gpu_cluster_culling`): one cluster-culling dispatch
//!   per view fills the visible-cluster buffer and the indirect arguments,
//!   then one indirect draw per command.
//! - **Instanced path**: visible objects are sorted by command, bucket and
//!   everything else that ends up in per-draw state. Runs of objects sharing
//!   bucket, index range, fatness and skin binding collapse into one
//!   multi-instance draw over a range of the per-view visible-object buffer.

use std::ops::Range;

use crate::renderer::core::{Patch, ResidentBuffer};
use crate::renderer::storage::{IndirectArgs, ObjectStorage, PipelineId};
use crate::renderer::visibility::VisibleSet;
use crate::resources::DrawPhase;
use crate::scene::CameraView;

/// Record index used for objects without instance data.
pub const NO_INSTANCE: u32 = u32::MAX;

/// Smallest visible-object buffer, in records.
const MIN_VISIBLE_RECORDS: usize = 64;

/// One GPU call emitted for a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawCall {
    /// Culls all clusters against the view and writes visible cluster ids
    /// and instance counts for every command.
    CullClusters {
        view: CameraView,
        cluster_count: u32,
        command_count: u32,
    },
    /// `draw_indirect` with the command's arguments in the view's indirect buffer.
    Indirect {
        pipeline: PipelineId,
        command: u32,
        bucket_id: u32,
        /// Byte offset into the view's indirect-argument buffer.
        args_offset: u64,
    },
    /// `draw_indexed` of `instance_count` instances whose record indices
    /// start at `first_instance` in the view's visible-object buffer.
    Instanced {
        pipeline: PipelineId,
        command: u32,
        bucket_id: u32,
        indices: Range<u32>,
        first_instance: u32,
        instance_count: u32,
    },
}

// ============================================================================
// Batching
// ============================================================================

/// Everything that must match for two visible objects to share a draw.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct BatchKey {
    command: u32,
    bucket: u32,
    first_index: u32,
    index_end: u32,
    fatness_bits: u32,
    skin: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InstanceRun {
    command: u32,
    bucket: u32,
    indices: Range<u32>,
    first: u32,
    count: u32,
}

/// Batched visible objects of one view.
#[derive(Debug, Default)]
pub struct DrawList {
    runs: Vec<InstanceRun>,
    records: Vec<u32>,
    uploaded: Option<Vec<u32>>,
}

impl DrawList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance record indices in draw order.
    #[must_use]
    pub fn records(&self) -> &[u32] {
        &self.records
    }

    /// Number of instanced draws the list compiles to.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Rebuilds the list from the objects in `visible`.
    pub fn build(&mut self, objects: &ObjectStorage, visible: &VisibleSet) {
        self.runs.clear();
        self.records.clear();

        let mut entries: Vec<(BatchKey, u32, u32)> = visible
            .to_vec()
            .into_iter()
            .filter_map(|slot| {
                let rec = objects.object(slot)?;
                let key = BatchKey {
                    command: rec.command_id,
                    bucket: rec.bucket_id,
                    first_index: rec.slice.indices.start,
                    index_end: rec.slice.indices.end,
                    fatness_bits: rec.fatness.to_bits(),
                    skin: rec.skeleton.map(|b| b.offset),
                };
                let record = rec.instance.map_or(NO_INSTANCE, |b| objects.instances().record_index(&b));
                Some((key, slot, record))
            })
            .collect();

        // Slot as a tiebreaker keeps the order stable across frames.
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut current: Option<BatchKey> = None;
        for (key, _, record) in entries {
            let index = self.records.len() as u32;
            self.records.push(record);

            match self.runs.last_mut() {
                Some(run) if current.as_ref() == Some(&key) => run.count += 1,
                _ => {
                    self.runs.push(InstanceRun {
                        command: key.command,
                        bucket: key.bucket,
                        indices: key.first_index..key.index_end,
                        first: index,
                        count: 1,
                    });
                    current = Some(key);
                }
            }
        }
    }

    /// Synchronizes the visible-object buffer.
    ///
    /// The resident buffer holds a power-of-two number of records padded with
    /// [`NO_INSTANCE`]. It grows when the list outgrows it and shrinks once
    /// the list fits in a quarter of it; otherwise the changed records are
    /// patched. Returns `true` when the buffer was reallocated.
    pub fn upload(&mut self, frame: usize, target: &mut dyn ResidentBuffer) -> bool {
        let needed = self.records.len().next_power_of_two().max(MIN_VISIBLE_RECORDS);
        let capacity = match &self.uploaded {
            Some(prev) if needed <= prev.len() && needed * 4 > prev.len() => prev.len(),
            _ => needed,
        };
        let mut resident = self.records.clone();
        resident.resize(capacity, NO_INSTANCE);

        let reallocated = match &self.uploaded {
            Some(prev) if prev.len() == capacity => {
                let mut patch = Patch::new(size_of::<u32>() as u32);
                for (i, (new, old)) in resident.iter().zip(prev).enumerate() {
                    if new != old {
                        patch.push(i as u32, bytemuck::bytes_of(new));
                    }
                }
                if !patch.is_empty() {
                    target.scatter(frame, &patch);
                }
                false
            }
            _ => {
                target.reallocate(bytemuck::cast_slice(&resident));
                log::debug!("Visible-object buffer reallocated: {} records", capacity);
                true
            }
        };
        self.uploaded = Some(resident);
        reallocated
    }
}

// ============================================================================
// Submission
// ============================================================================

/// Emits the draw calls of `view` for materials in `phase`, in submission order.
#[must_use]
pub fn draw_calls(objects: &ObjectStorage, list: &DrawList, view: CameraView, phase: DrawPhase) -> Vec<DrawCall> {
    let commands = objects.commands();
    let mut calls = Vec::new();

    if objects.caps().gpu_cluster_culling {
        for (id, cmd) in commands.commands().iter().enumerate() {
            if cmd.alpha.phase() != phase || cmd.payload_count == 0 {
                continue;
            }
            let Some(pipeline) = cmd.pipeline(view) else {
                continue;
            };
            calls.push(DrawCall::Indirect {
                pipeline,
                command: id as u32,
                bucket_id: cmd.bucket_id,
                args_offset: (id * size_of::<IndirectArgs>()) as u64,
            });
        }
        if !calls.is_empty() {
            calls.insert(
                0,
                DrawCall::CullClusters {
                    view,
                    cluster_count: objects.clusters().len(),
                    command_count: commands.len(),
                },
            );
        }
        return calls;
    }

    for run in &list.runs {
        let Some(cmd) = commands.get(run.command) else {
            continue;
        };
        if cmd.alpha.phase() != phase {
            continue;
        }
        let Some(pipeline) = cmd.pipeline(view) else {
            continue;
        };
        calls.push(DrawCall::Instanced {
            pipeline,
            command: run.command,
            bucket_id: run.bucket,
            indices: run.indices.clone(),
            first_instance: run.first,
            instance_count: run.count,
        });
    }
    calls
}
