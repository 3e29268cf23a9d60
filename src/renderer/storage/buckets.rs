//! Bucket Registry
//!
//! A bucket groups objects sharing one (mesh, material) pair and therefore
//! one set of GPU bindings. Buckets are created lazily and hold at most
//! `bucket_capacity` objects; further objects spill into a new, compatible
//! bucket. Bucket ids are indices and stay stable for the registry's lifetime.

use bytemuck::{Pod, Zeroable};
use slotmap::Key;

use crate::renderer::core::{DirtyBits, Patch, ResidentBuffer};
use crate::resources::{BoundingBox, Material, MeshDesc, MeshRef};
use crate::scene::{GpuBufferKey, TextureKey};

/// Resolved bindings of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketBindings {
    pub texture: TextureKey,
    pub vertex_buffer: GpuBufferKey,
    pub index_buffer: GpuBufferKey,
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub material: Material,
    pub mesh: MeshRef,
    pub bindings: BucketBindings,
    /// Object-space bounds of the mesh.
    pub bounds: BoundingBox,
    objects: u32,
}

impl Bucket {
    #[inline]
    #[must_use]
    pub fn object_count(&self) -> u32 {
        self.objects
    }

    fn gpu(&self) -> BucketGpu {
        let (min, max) = if self.bounds.is_empty() {
            ([0.0; 3], [0.0; 3])
        } else {
            (self.bounds.min.to_array(), self.bounds.max.to_array())
        };
        let mut flags = self.material.alpha as u32;
        if self.mesh.is_skinned() {
            flags |= BucketGpu::FLAG_SKINNED;
        }
        BucketGpu {
            bbox_min: min,
            texture: texture_slot(self.bindings.texture),
            bbox_max: max,
            flags,
            tex_scroll: self.material.tex_scroll,
            tex_anim_fps: self.material.tex_anim_fps,
            _pad: 0,
        }
    }
}

/// GPU record of one bucket.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BucketGpu {
    pub bbox_min: [f32; 3],
    /// Slot index of the bound texture in the descriptor array.
    pub texture: u32,
    pub bbox_max: [f32; 3],
    /// Low byte: alpha mode. See the `FLAG_*` constants for the rest.
    pub flags: u32,
    pub tex_scroll: [f32; 2],
    pub tex_anim_fps: u32,
    pub _pad: u32,
}

impl BucketGpu {
    pub const FLAG_SKINNED: u32 = 1 << 8;
}

/// Descriptor-array slot of a texture key.
#[inline]
fn texture_slot(key: TextureKey) -> u32 {
    // Low half of the FFI form is the slot index.
    key.data().as_ffi() as u32
}

const BUCKET_STRIDE: u32 = size_of::<BucketGpu>() as u32;

pub struct BucketRegistry {
    buckets: Vec<Bucket>,
    capacity: u32,
    fallback_texture: TextureKey,
    dirty: DirtyBits,
    uploaded_len: Option<u32>,
}

impl BucketRegistry {
    #[must_use]
    pub fn new(capacity: u32, fallback_texture: TextureKey) -> Self {
        Self {
            buckets: Vec::new(),
            capacity: capacity.max(1),
            fallback_texture,
            dirty: DirtyBits::new(),
            uploaded_len: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.buckets.len() as u32
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Bucket> {
        self.buckets.get(id as usize)
    }

    #[must_use]
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Returns a compatible bucket with room for one more object, creating
    /// one when none exists.
    pub fn get_bucket(&mut self, material: &Material, mesh: &MeshDesc) -> u32 {
        let found = self
            .buckets
            .iter()
            .position(|b| b.mesh == mesh.mesh && b.objects < self.capacity && b.material == *material);
        if let Some(id) = found {
            return id as u32;
        }

        let texture = match material.texture {
            Some(t) if !t.is_null() => t,
            _ => self.fallback_texture,
        };

        let id = self.len();
        self.buckets.push(Bucket {
            material: material.clone(),
            mesh: mesh.mesh,
            bindings: BucketBindings {
                texture,
                vertex_buffer: mesh.vertex_buffer,
                index_buffer: mesh.index_buffer,
            },
            bounds: mesh.bounds,
            objects: 0,
        });
        self.dirty.resize(self.len());
        self.dirty.mark(id, 1);

        log::debug!("Created bucket {} for {:?} ({:?})", id, mesh.mesh, material.alpha);
        id
    }

    /// Drops buckets created after the registry held `len` buckets. Rolls back
    /// a [`get_bucket`](Self::get_bucket) whose object could not be registered.
    pub fn truncate(&mut self, len: u32) {
        if len < self.len() {
            log::debug!("Discarding {} unused bucket(s)", self.len() - len);
            self.buckets.truncate(len as usize);
            self.dirty.resize(len);
        }
    }

    /// Counts one more object in bucket `id`.
    pub fn acquire(&mut self, id: u32) {
        if let Some(b) = self.buckets.get_mut(id as usize) {
            b.objects += 1;
        }
    }

    /// Counts one object less in bucket `id`.
    pub fn release(&mut self, id: u32) {
        if let Some(b) = self.buckets.get_mut(id as usize) {
            b.objects = b.objects.saturating_sub(1);
        }
    }

    /// Uploads bucket records. Returns `true` when the buffer was reallocated.
    pub fn commit(&mut self, frame: usize, target: &mut dyn ResidentBuffer) -> bool {
        let records: Vec<BucketGpu> = self.buckets.iter().map(Bucket::gpu).collect();

        if self.uploaded_len != Some(self.len()) {
            target.reallocate(bytemuck::cast_slice(&records));
            log::info!("Bucket buffer reallocated: {} buckets", records.len());
            self.uploaded_len = Some(self.len());
            self.dirty.clear();
            return true;
        }

        if let Some(patch) = Patch::gather(&mut self.dirty, bytemuck::cast_slice(&records), BUCKET_STRIDE) {
            target.scatter(frame, &patch);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use slotmap::SlotMap;

    use super::*;
    use crate::resources::AlphaMode;
    use crate::scene::MeshKey;

    fn mesh() -> MeshDesc {
        let mut meshes: SlotMap<MeshKey, ()> = SlotMap::with_key();
        MeshDesc::new(
            MeshRef::Static(meshes.insert(())),
            GpuBufferKey::default(),
            GpuBufferKey::default(),
            BoundingBox::new(Vec3::splat(-1.0), Vec3::ONE),
        )
    }

    #[test]
    fn equal_material_and_mesh_share_bucket() {
        let mut reg = BucketRegistry::new(8, TextureKey::default());
        let m = mesh();
        let a = reg.get_bucket(&Material::default(), &m);
        reg.acquire(a);
        let b = reg.get_bucket(&Material::default(), &m);
        assert_eq!(a, b);

        let c = reg.get_bucket(&Material::new(AlphaMode::Additive, None), &m);
        assert_ne!(a, c);
    }

    #[test]
    fn full_bucket_spills_into_new_one() {
        let mut reg = BucketRegistry::new(2, TextureKey::default());
        let m = mesh();
        let first = reg.get_bucket(&Material::default(), &m);
        reg.acquire(first);
        reg.acquire(first);
        let second = reg.get_bucket(&Material::default(), &m);
        assert_ne!(first, second);

        reg.release(first);
        assert_eq!(reg.get_bucket(&Material::default(), &m), first);
    }

    #[test]
    fn missing_texture_resolves_to_fallback() {
        let mut textures: SlotMap<TextureKey, ()> = SlotMap::with_key();
        let fallback = textures.insert(());
        let mut reg = BucketRegistry::new(8, fallback);
        let id = reg.get_bucket(&Material::default(), &mesh());
        assert_eq!(reg.get(id).unwrap().bindings.texture, fallback);
    }
}
