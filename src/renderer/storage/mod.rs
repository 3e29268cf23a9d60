//! Object, cluster and instance storage.
//!
//! - `ClusterArena`: culling/dispatch units with per-cluster dirty bits
//! - `BucketRegistry` / `DrawCommandTable`: shared bindings and pipelines
//! - `ByteArena` with `InstanceStorage` / `SkeletonStorage` on top
//! - `ObjectStorage`: per-object records owned through [`Item`] handles

pub mod blas;
pub mod buckets;
pub mod byte_arena;
pub mod clusters;
pub mod commands;
pub mod instances;
pub mod item;
pub mod objects;
pub mod skeletons;

pub use blas::{BlasBuildRequest, BlasCache, BlasId, BlasKey};
pub use buckets::{Bucket, BucketBindings, BucketGpu, BucketRegistry};
pub use byte_arena::{ArenaBlock, ArenaSync, BlockPolicy, ByteArena};
pub use clusters::{Cluster, ClusterArena};
pub use commands::{
    BINDLESS_BUCKET, DrawCommand, DrawCommandTable, INVALID_COMMAND, IndirectArgs, PipelineId, PipelineSource,
};
pub use instances::{InstanceGpu, InstanceStorage, MorphGpu};
pub use item::{Item, ItemRef};
pub use objects::{ObjectRecord, ObjectStorage};
pub use skeletons::{BoneBlock, SkeletonStorage};

use crate::renderer::core::{BufferRole, GpuBackend, SharedBuffer};
use crate::scene::{CameraView, VIEW_COUNT};

/// Resident buffers the storage keeps in sync.
pub struct StorageBuffers {
    pub clusters: SharedBuffer,
    pub buckets: SharedBuffer,
    pub instances: SharedBuffer,
    pub skeletons: SharedBuffer,
    /// One [`IndirectArgs`] per command, per view.
    pub indirect: [SharedBuffer; VIEW_COUNT],
    /// Cluster ids written by GPU culling, sized to the total payload.
    pub visible_clusters: [SharedBuffer; VIEW_COUNT],
    /// Instance record indices of CPU-visible objects in draw order.
    pub visible_objects: [SharedBuffer; VIEW_COUNT],
}

impl StorageBuffers {
    #[must_use]
    pub fn new(backend: &dyn GpuBackend) -> Self {
        let per_view = |name: &str, role: BufferRole| {
            CameraView::ALL.map(|view| backend.create_buffer(&format!("{name} {view:?}"), role))
        };
        Self {
            clusters: backend.create_buffer("Clusters", BufferRole::Clusters),
            buckets: backend.create_buffer("Buckets", BufferRole::Buckets),
            instances: backend.create_buffer("Instances", BufferRole::Instances),
            skeletons: backend.create_buffer("Skeletons", BufferRole::Skeletons),
            indirect: per_view("Indirect", BufferRole::IndirectArgs),
            visible_clusters: per_view("Visible Clusters", BufferRole::VisibleClusters),
            visible_objects: per_view("Visible Objects", BufferRole::VisibleClusters),
        }
    }
}
