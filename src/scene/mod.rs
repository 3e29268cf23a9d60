//! Scene vocabulary shared by the storage core.
//!
//! - Resource keys handed in by the asset collaborator
//! - [`ObjectKind`]: the category of a registered renderable
//! - [`CameraView`] / [`ViewMask`]: the per-frame camera views
//! - [`Frustum`]: culling volume of one view

pub mod camera;

pub use camera::{Containment, Frustum};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    pub struct MeshKey;
    pub struct TextureKey;
    pub struct GpuBufferKey;
}

/// Category of a registered renderable.
///
/// The kind selects the pipeline variant, whether the object lives in the
/// static BVH or the dynamic visibility list, and whether it gets an
/// acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Landscape,
    Static,
    Movable,
    Animated,
    Particle,
    Morph,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 6] = [
        ObjectKind::Landscape,
        ObjectKind::Static,
        ObjectKind::Movable,
        ObjectKind::Animated,
        ObjectKind::Particle,
        ObjectKind::Morph,
    ];

    /// Objects that never move after registration.
    #[inline]
    #[must_use]
    pub fn is_static(self) -> bool {
        matches!(self, Self::Landscape | Self::Static)
    }

    /// Objects that carry a per-instance transform block.
    #[inline]
    #[must_use]
    pub fn has_instance_data(self) -> bool {
        !matches!(self, Self::Landscape)
    }

    /// Objects that get bottom-level acceleration structures on ray-query devices.
    #[inline]
    #[must_use]
    pub fn is_ray_traced(self) -> bool {
        self.is_static()
    }

    /// Objects whose clusters are culled with per-meshlet bounds. Deforming
    /// objects use the whole-object sphere for every cluster.
    #[inline]
    #[must_use]
    pub fn uses_meshlet_bounds(self) -> bool {
        self.is_static()
    }
}

/// One of the camera views rendered per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CameraView {
    Shadow0,
    Shadow1,
    Main,
    HiZ,
}

/// Number of [`CameraView`] variants.
pub const VIEW_COUNT: usize = 4;

impl CameraView {
    pub const ALL: [CameraView; VIEW_COUNT] = [
        CameraView::Shadow0,
        CameraView::Shadow1,
        CameraView::Main,
        CameraView::HiZ,
    ];

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    #[must_use]
    pub fn mask(self) -> ViewMask {
        ViewMask::from_bits_truncate(1 << self.index())
    }

    #[inline]
    #[must_use]
    pub fn is_shadow(self) -> bool {
        matches!(self, Self::Shadow0 | Self::Shadow1)
    }
}

bitflags! {
    /// Set of camera views a draw command has pipelines for.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ViewMask: u8 {
        const SHADOW0 = 1 << 0;
        const SHADOW1 = 1 << 1;
        const MAIN    = 1 << 2;
        const HIZ     = 1 << 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_masks_match_indices() {
        assert_eq!(CameraView::Shadow0.mask(), ViewMask::SHADOW0);
        assert_eq!(CameraView::Main.mask(), ViewMask::MAIN);
        assert_eq!(CameraView::HiZ.mask(), ViewMask::HIZ);
        assert_eq!(CameraView::ALL.len(), VIEW_COUNT);
    }
}
