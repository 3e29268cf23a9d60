//! Cluster Arena
//!
//! Flat array of [`Cluster`] records mirrored into one resident buffer.
//!
//! # Overview
//!
//! - Allocation takes an exact-size free run, else splits the best-fitting
//!   larger run, else grows the array.
//! - Freed clusters get an invalid radius so GPU culling rejects them before
//!   the slots are reused.
//! - Dirty tracking is one bit per cluster; [`ClusterArena::mark_clusters`]
//!   only needs `&self` and is safe from worker threads.
//! - The resident buffer is sized by power-of-two classes (never below the
//!   configured block). A class change re-uploads everything; otherwise only
//!   dirty clusters are scattered.
//!
//! Allocation and free are single-threaded and run on the frame-preparation
//! thread through `&mut self`.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::renderer::core::{DirtyBits, FreeList, Patch, ResidentBuffer};
use crate::resources::BoundingSphere;

/// GPU record of one cluster.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Cluster {
    pub center: [f32; 3],
    /// Negative for released clusters.
    pub radius: f32,
    pub bucket_id: u32,
    pub command_id: u32,
    pub first_meshlet: u32,
    pub meshlet_count: u32,
    /// Instance record of the owner, `u32::MAX` for objects without one.
    pub instance_id: u32,
    pub _pad: [u32; 3],
}

impl Cluster {
    pub const RELEASED: Self = Self {
        center: [0.0; 3],
        radius: -1.0,
        bucket_id: u32::MAX,
        command_id: u32::MAX,
        first_meshlet: 0,
        meshlet_count: 0,
        instance_id: u32::MAX,
        _pad: [0; 3],
    };

    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.radius >= 0.0
    }

    #[inline]
    #[must_use]
    pub fn sphere(&self) -> BoundingSphere {
        BoundingSphere::new(Vec3::from_array(self.center), self.radius)
    }

    #[inline]
    pub fn set_sphere(&mut self, sphere: BoundingSphere) {
        self.center = sphere.center.to_array();
        self.radius = sphere.radius;
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::RELEASED
    }
}

const CLUSTER_STRIDE: u32 = size_of::<Cluster>() as u32;

pub struct ClusterArena {
    clusters: Vec<Cluster>,
    free_list: FreeList,
    dirty: DirtyBits,
    block: u32,
    /// Capacity (in clusters) of the last full upload; 0 before the first commit.
    gpu_capacity: u32,
}

impl ClusterArena {
    /// `block` is the minimum resident capacity and must be a power of two.
    #[must_use]
    pub fn new(block: u32) -> Self {
        debug_assert!(block.is_power_of_two());
        Self {
            clusters: Vec::new(),
            free_list: FreeList::new(),
            dirty: DirtyBits::new(),
            block,
            gpu_capacity: 0,
        }
    }

    /// Logical arena size: live plus free clusters.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.clusters.len() as u32
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    #[must_use]
    pub fn free_ranges(&self) -> &[std::ops::Range<u32>] {
        self.free_list.ranges()
    }

    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.free_list.total()
    }

    /// Resident capacity class for the current logical size.
    #[must_use]
    pub fn capacity_class(&self) -> u32 {
        self.len().next_power_of_two().max(self.block)
    }

    #[must_use]
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Cluster> {
        self.clusters.get(id as usize)
    }

    /// Reserves `count` consecutive clusters and returns the first id.
    pub fn alloc(&mut self, count: u32) -> u32 {
        if count == 0 {
            return self.len();
        }
        if let Some(start) = self.free_list.take(count) {
            return start;
        }

        let start = self.len();
        let len = start + count;
        self.clusters.resize(len as usize, Cluster::RELEASED);
        self.dirty.resize(len);
        if len > self.gpu_capacity && self.gpu_capacity != 0 {
            log::info!("Cluster arena expanding capacity: {} -> {}", self.gpu_capacity, self.capacity_class());
        }
        start
    }

    /// Releases `count` clusters starting at `id`.
    pub fn free(&mut self, id: u32, count: u32) {
        if count == 0 {
            return;
        }
        let end = (id + count).min(self.len());
        for cluster in &mut self.clusters[id as usize..end as usize] {
            *cluster = Cluster::RELEASED;
        }
        self.dirty.mark(id, end - id);
        self.free_list.insert(id, end - id);
    }

    /// Drops trailing free clusters. Called when the last live object of the
    /// storage goes away.
    pub fn shrink_to_fit(&mut self) {
        let len = self.free_list.trim_tail(self.len());
        if len != self.len() {
            log::debug!("Cluster arena compacted: {} -> {}", self.len(), len);
            self.clusters.truncate(len as usize);
            self.clusters.shrink_to_fit();
            self.dirty.resize(len);
        }
    }

    /// Flags clusters for re-upload. Lock-free.
    pub fn mark_clusters(&self, id: u32, count: u32) {
        self.dirty.mark(id, count);
    }

    /// Overwrites one cluster and marks it dirty.
    pub fn set(&mut self, id: u32, cluster: Cluster) {
        if let Some(slot) = self.clusters.get_mut(id as usize) {
            *slot = cluster;
            self.dirty.mark(id, 1);
        }
    }

    /// Updates the bounding spheres of `first..first + spheres.len()`.
    pub fn set_spheres(&mut self, first: u32, spheres: impl IntoIterator<Item = BoundingSphere>) {
        let first = first.min(self.len());
        let mut count = 0;
        for (cluster, sphere) in self.clusters[first as usize..].iter_mut().zip(spheres) {
            cluster.set_sphere(sphere);
            count += 1;
        }
        self.dirty.mark(first, count);
    }

    /// Rewrites bucket and command ids of a cluster range.
    pub fn set_owner(&mut self, first: u32, count: u32, bucket_id: u32, command_id: u32) {
        let first = first.min(self.len());
        let end = first.saturating_add(count).min(self.len());
        for cluster in &mut self.clusters[first as usize..end as usize] {
            cluster.bucket_id = bucket_id;
            cluster.command_id = command_id;
        }
        self.dirty.mark(first, end - first);
    }

    #[must_use]
    pub fn is_dirty(&self, id: u32) -> bool {
        self.dirty.is_set(id)
    }

    /// Synchronizes the resident buffer. Returns `true` when it was reallocated.
    pub fn commit(&mut self, frame: usize, target: &mut dyn ResidentBuffer) -> bool {
        let class = self.capacity_class();

        if class != self.gpu_capacity {
            let mut contents = Vec::with_capacity(class as usize);
            contents.extend_from_slice(&self.clusters);
            contents.resize(class as usize, Cluster::RELEASED);
            target.reallocate(bytemuck::cast_slice(&contents));

            log::info!("Cluster buffer reallocated: {} -> {} clusters", self.gpu_capacity, class);
            self.gpu_capacity = class;
            self.dirty.clear();
            return true;
        }

        if let Some(patch) = Patch::gather(&mut self.dirty, bytemuck::cast_slice(&self.clusters), CLUSTER_STRIDE) {
            log::debug!("Cluster patch: {} clusters", patch.len());
            target.scatter(frame, &patch);
        }
        false
    }
}
