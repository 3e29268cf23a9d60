use serde::{Deserialize, Serialize};

use crate::scene::TextureKey;

// ============================================================================
// Alpha modes & draw phases
// ============================================================================

/// How a material composes with the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlphaMode {
    Solid,
    AlphaTest,
    Water,
    Ghost,
    Multiply,
    Transparent,
    Additive,
}

impl AlphaMode {
    #[inline]
    #[must_use]
    pub fn phase(self) -> DrawPhase {
        match self {
            Self::Solid | Self::AlphaTest => DrawPhase::Opaque,
            Self::Water => DrawPhase::Water,
            Self::Ghost | Self::Multiply | Self::Transparent | Self::Additive => DrawPhase::Translucent,
        }
    }

    /// Only opaque geometry is rendered into shadow maps and Hi-Z.
    #[inline]
    #[must_use]
    pub fn casts_shadow(self) -> bool {
        self.phase() == DrawPhase::Opaque
    }
}

/// Alpha-mode filter used by draw submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPhase {
    Opaque,
    Water,
    Translucent,
}

// ============================================================================
// Material
// ============================================================================

/// Material descriptor as seen by the storage.
///
/// Equality is structural; two objects share a bucket only when their
/// materials compare equal.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub alpha: AlphaMode,
    /// Diffuse texture; `None` resolves to the registry's fallback texture.
    pub texture: Option<TextureKey>,
    /// Texture animation frames per second, 0 for static textures.
    pub tex_anim_fps: u32,
    /// UV scroll speed in texels per second.
    pub tex_scroll: [f32; 2],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            alpha: AlphaMode::Solid,
            texture: None,
            tex_anim_fps: 0,
            tex_scroll: [0.0; 2],
        }
    }
}

impl Material {
    #[must_use]
    pub fn new(alpha: AlphaMode, texture: Option<TextureKey>) -> Self {
        Self {
            alpha,
            texture,
            ..Default::default()
        }
    }

    /// Copy of this material rendered see-through.
    #[must_use]
    pub fn as_ghost(&self) -> Self {
        Self {
            alpha: AlphaMode::Ghost,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn is_animated(&self) -> bool {
        self.tex_anim_fps != 0 || self.tex_scroll != [0.0; 2]
    }
}

// ============================================================================
// Animation parameters
// ============================================================================

/// Vertex wind animation applied in the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WindMode {
    #[default]
    None,
    /// Whole object sways around its base.
    Trunk,
    /// Fast, small-amplitude flutter.
    Leaves,
}

impl WindMode {
    /// Sway period in milliseconds.
    #[must_use]
    pub fn period_ms(self) -> u64 {
        match self {
            Self::None => 0,
            Self::Trunk => 4000,
            Self::Leaves => 1200,
        }
    }

    #[must_use]
    pub fn as_gpu(self) -> u32 {
        self as u32
    }
}

/// A morph (vertex-animation) clip started on an object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphAnim {
    /// Index of the clip in the morph-target storage of the mesh.
    pub anim_id: u32,
    /// First sample of the clip in the morph-target storage.
    pub first_sample: u32,
    /// Number of samples in the clip.
    pub sample_count: u32,
    /// Samples per second.
    pub fps: f32,
    /// Blend weight applied in the shader.
    pub intensity: f32,
    /// Play time in milliseconds; 0 loops until replaced.
    pub duration_ms: u64,
}
