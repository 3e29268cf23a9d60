//! Device-resident buffers behind a backend seam.
//!
//! Storage modules never talk to the graphics API directly; they hand whole
//! contents or [`Patch`]es to a [`ResidentBuffer`]. Two implementations exist:
//!
//! - [`HostBuffer`]: keeps the bytes in system memory. Used headless and by tests.
//! - [`WgpuResidentBuffer`](super::wgpu_backend::WgpuResidentBuffer): a storage
//!   buffer updated by a compute scatter pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::patch::Patch;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Fresh id for a newly created device allocation.
pub fn generate_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a resident buffer holds; selects usage flags on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Clusters,
    Buckets,
    Instances,
    Skeletons,
    IndirectArgs,
    VisibleClusters,
}

impl BufferRole {
    #[must_use]
    pub fn usage(self) -> wgpu::BufferUsages {
        let base = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        match self {
            Self::IndirectArgs => base | wgpu::BufferUsages::INDIRECT,
            _ => base,
        }
    }
}

/// A buffer living on the device, updated whole or by sparse patches.
pub trait ResidentBuffer: Send {
    /// Current size in bytes.
    fn size(&self) -> u64;

    /// Id of the current device allocation. Changes on every [`reallocate`](Self::reallocate),
    /// which tells binders their descriptor sets are stale.
    fn resource_id(&self) -> u64;

    /// Replaces the storage with a new allocation holding `contents`.
    fn reallocate(&mut self, contents: &[u8]);

    /// Writes `patch` into the current storage. `frame` selects the
    /// frame-in-flight staging slot.
    fn scatter(&mut self, frame: usize, patch: &Patch);
}

pub type SharedBuffer = Arc<Mutex<dyn ResidentBuffer>>;

/// Creates resident buffers for the storage.
pub trait GpuBackend: Send + Sync {
    fn create_buffer(&self, label: &str, role: BufferRole) -> SharedBuffer;
}

// ============================================================================
// Host backend
// ============================================================================

/// System-memory resident buffer.
#[derive(Debug, Default)]
pub struct HostBuffer {
    pub label: String,
    bytes: Vec<u8>,
    resource_id: u64,
    /// Number of full reallocations performed.
    pub reallocations: u32,
    /// Number of patches applied.
    pub patches: u32,
    /// The most recently applied patch with its frame slot.
    pub last_patch: Option<(usize, Patch)>,
}

impl HostBuffer {
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            resource_id: generate_resource_id(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the contents out as `T` elements.
    #[must_use]
    pub fn read<T: bytemuck::Pod>(&self) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&self.bytes)
    }
}

impl ResidentBuffer for HostBuffer {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn resource_id(&self) -> u64 {
        self.resource_id
    }

    fn reallocate(&mut self, contents: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(contents);
        self.resource_id = generate_resource_id();
        self.reallocations += 1;
    }

    fn scatter(&mut self, frame: usize, patch: &Patch) {
        patch.apply(&mut self.bytes);
        self.patches += 1;
        self.last_patch = Some((frame, patch.clone()));
    }
}

/// Backend that creates [`HostBuffer`]s and keeps them reachable by label.
#[derive(Default)]
pub struct HostBackend {
    buffers: Mutex<FxHashMap<String, Arc<Mutex<HostBuffer>>>>,
}

impl HostBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer created under `label`, if any.
    #[must_use]
    pub fn buffer(&self, label: &str) -> Option<Arc<Mutex<HostBuffer>>> {
        self.buffers.lock().get(label).cloned()
    }
}

impl GpuBackend for HostBackend {
    fn create_buffer(&self, label: &str, _role: BufferRole) -> SharedBuffer {
        let buffer = Arc::new(Mutex::new(HostBuffer::new(label)));
        self.buffers.lock().insert(label.to_string(), buffer.clone());
        buffer
    }
}
