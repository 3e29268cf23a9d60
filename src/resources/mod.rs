//! Resource descriptions consumed from the asset collaborator.
//!
//! These structures never own GPU memory; they describe which mesh range and
//! material a renderable object uses:
//! - Geometry: bounds, mesh references and index ranges
//! - Material: alpha mode, texture and animation parameters

pub mod geometry;
pub mod material;

pub use geometry::{BoundingBox, BoundingSphere, MeshDesc, MeshRef, MeshSlice};
pub use material::{AlphaMode, DrawPhase, Material, MorphAnim, WindMode};
