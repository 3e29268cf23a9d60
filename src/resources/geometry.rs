//! Bounds and mesh-range descriptions.

use std::ops::Range;

use glam::{Mat4, Vec3};

use crate::scene::{GpuBufferKey, MeshKey};

// ============================================================================
// Bounding volumes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    /// Inverted box; the identity of [`union`](Self::union).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn center(&self) -> Vec3 { (self.min + self.max) * 0.5 }
    pub fn size(&self) -> Vec3 { self.max - self.min }

    #[must_use]
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// World-space box enclosing the eight transformed corners.
    #[must_use]
    pub fn transform(&self, matrix: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let corners = [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ];

        let mut new_min = Vec3::splat(f32::INFINITY);
        let mut new_max = Vec3::splat(f32::NEG_INFINITY);

        for point in corners {
            let transformed = matrix.transform_point3(point);
            new_min = new_min.min(transformed);
            new_max = new_max.max(transformed);
        }

        Self { min: new_min, max: new_max }
    }

    /// Sphere centered on the box that encloses it.
    #[must_use]
    pub fn bounding_sphere(&self) -> BoundingSphere {
        if self.is_empty() {
            return BoundingSphere::INVALID;
        }
        BoundingSphere {
            center: self.center(),
            radius: self.size().length() * 0.5,
        }
    }
}

/// Sphere bounds; a negative radius marks a released cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub const INVALID: Self = Self {
        center: Vec3::ZERO,
        radius: -1.0,
    };

    #[must_use]
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.radius >= 0.0
    }

    /// Transforms the center and scales the radius by the largest axis scale.
    #[must_use]
    pub fn transform(&self, matrix: &Mat4) -> Self {
        if !self.is_valid() {
            return *self;
        }
        let scale = matrix
            .x_axis
            .truncate()
            .length()
            .max(matrix.y_axis.truncate().length())
            .max(matrix.z_axis.truncate().length());
        Self {
            center: matrix.transform_point3(self.center),
            radius: self.radius * scale,
        }
    }
}

// ============================================================================
// Mesh references
// ============================================================================

/// Reference to a mesh owned by the asset collaborator.
///
/// Bucket identity compares these by key, so two objects referencing the same
/// mesh with equal materials can share bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshRef {
    Static(MeshKey),
    Skinned(MeshKey),
}

impl MeshRef {
    #[must_use]
    pub fn key(self) -> MeshKey {
        match self {
            Self::Static(k) | Self::Skinned(k) => k,
        }
    }

    #[must_use]
    pub fn is_skinned(self) -> bool {
        matches!(self, Self::Skinned(_))
    }
}

/// Everything the storage needs to know about a loaded mesh.
#[derive(Debug, Clone)]
pub struct MeshDesc {
    pub mesh: MeshRef,
    pub vertex_buffer: GpuBufferKey,
    pub index_buffer: GpuBufferKey,
    /// Object-space bounds of the whole mesh.
    pub bounds: BoundingBox,
    /// Object-space bounds of each meshlet, indexed by meshlet number.
    /// Empty when the loader did not precompute them.
    pub meshlet_bounds: Vec<BoundingSphere>,
}

impl MeshDesc {
    #[must_use]
    pub fn new(mesh: MeshRef, vertex_buffer: GpuBufferKey, index_buffer: GpuBufferKey, bounds: BoundingBox) -> Self {
        Self {
            mesh,
            vertex_buffer,
            index_buffer,
            bounds,
            meshlet_bounds: Vec::new(),
        }
    }
}

/// The sub-range of a mesh an object draws.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSlice {
    pub mesh: MeshRef,
    /// Index range into the mesh's index buffer.
    pub indices: Range<u32>,
    /// Object-space bounds of the range.
    pub bounds: BoundingBox,
}

impl MeshSlice {
    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.indices.end.saturating_sub(self.indices.start)
    }

    /// First meshlet and number of meshlets the index range touches.
    #[must_use]
    pub fn meshlets(&self, indices_per_meshlet: u32) -> (u32, u32) {
        let first = self.indices.start / indices_per_meshlet;
        if self.index_count() == 0 {
            return (first, 0);
        }
        let last = (self.indices.end - 1) / indices_per_meshlet;
        (first, last - first + 1)
    }
}
