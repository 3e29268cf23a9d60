//! Bottom-level acceleration structure cache.
//!
//! Ray-traced objects drawing the same (mesh, index range) share one BLAS.
//! Entries are reference counted; the first acquisition queues a build
//! request for the ray-query backend, the last release drops the entry.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use crate::resources::{MeshDesc, MeshSlice};
use crate::scene::{GpuBufferKey, MeshKey};

new_key_type! {
    pub struct BlasId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlasKey {
    pub mesh: MeshKey,
    pub first_index: u32,
    pub index_count: u32,
}

/// Geometry the backend needs to build one BLAS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlasBuildRequest {
    pub id: BlasId,
    pub key: BlasKey,
    pub vertex_buffer: GpuBufferKey,
    pub index_buffer: GpuBufferKey,
}

#[derive(Debug)]
struct BlasEntry {
    key: BlasKey,
    refs: u32,
}

#[derive(Debug, Default)]
pub struct BlasCache {
    entries: SlotMap<BlasId, BlasEntry>,
    lookup: FxHashMap<BlasKey, BlasId>,
    pending: Vec<BlasBuildRequest>,
}

impl BlasCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn ref_count(&self, id: BlasId) -> u32 {
        self.entries.get(id).map_or(0, |e| e.refs)
    }

    /// Returns the BLAS for `slice` of `mesh`, queueing a build on first use.
    pub fn acquire(&mut self, mesh: &MeshDesc, slice: &MeshSlice) -> BlasId {
        let key = BlasKey {
            mesh: slice.mesh.key(),
            first_index: slice.indices.start,
            index_count: slice.index_count(),
        };

        if let Some(&id) = self.lookup.get(&key)
            && let Some(entry) = self.entries.get_mut(id)
        {
            entry.refs += 1;
            return id;
        }

        let id = self.entries.insert(BlasEntry { key, refs: 1 });
        self.lookup.insert(key, id);
        self.pending.push(BlasBuildRequest {
            id,
            key,
            vertex_buffer: mesh.vertex_buffer,
            index_buffer: mesh.index_buffer,
        });
        id
    }

    /// Drops one reference; the entry and any unbuilt request go with the last.
    pub fn release(&mut self, id: BlasId) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return;
        }

        let key = entry.key;
        self.entries.remove(id);
        self.lookup.remove(&key);
        self.pending.retain(|r| r.id != id);
    }

    /// Hands queued builds to the backend.
    pub fn take_pending_builds(&mut self) -> Vec<BlasBuildRequest> {
        std::mem::take(&mut self.pending)
    }
}
