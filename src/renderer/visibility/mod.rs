//! Visibility
//!
//! - `Bvh`: lazily rebuilt static-object hierarchy
//! - `VisibleSet`: lock-free, fixed-capacity per-view index list
//! - `VisibilityGroup`: static and dynamic membership plus the per-view pass

pub mod bvh;
pub mod group;
pub mod visible_set;

pub use bvh::Bvh;
pub use group::{VisibilityGroup, VisibilityToken};
pub use visible_set::VisibleSet;
