//! Visibility Group
//!
//! Owns the static BVH, the flat dynamic-object list and one
//! [`VisibleSet`] per camera view.
//!
//! # Overview
//!
//! - Static objects (landscape, static) go into the BVH. Any insert, update
//!   or removal sets one dirty flag; the tree is rebuilt lazily at the start
//!   of the next pass.
//! - Dynamic objects are sphere-tested individually, partitioned over the
//!   worker pool.
//! - Each view's set receives object ids; views without a frustum are cleared.

use rustc_hash::FxHashMap;

use super::bvh::Bvh;
use super::visible_set::VisibleSet;
use crate::renderer::core::WorkerPool;
use crate::resources::{BoundingBox, BoundingSphere};
use crate::scene::{CameraView, Frustum, VIEW_COUNT};

/// Membership of one object in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisibilityToken {
    id: u32,
    is_static: bool,
}

impl VisibilityToken {
    #[inline]
    #[must_use]
    pub fn id(self) -> u32 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn is_static(self) -> bool {
        self.is_static
    }
}

#[derive(Debug, Clone, Copy)]
struct DynamicEntry {
    id: u32,
    sphere: BoundingSphere,
}

pub struct VisibilityGroup {
    statics: FxHashMap<u32, BoundingBox>,
    bvh: Bvh,
    bvh_dirty: bool,
    dynamics: Vec<DynamicEntry>,
    dynamic_index: FxHashMap<u32, usize>,
    sets: [VisibleSet; VIEW_COUNT],
}

impl VisibilityGroup {
    #[must_use]
    pub fn new(visible_capacity: u32, bvh_leaf_size: u32) -> Self {
        Self {
            statics: FxHashMap::default(),
            bvh: Bvh::new(bvh_leaf_size),
            bvh_dirty: false,
            dynamics: Vec::new(),
            dynamic_index: FxHashMap::default(),
            sets: std::array::from_fn(|_| VisibleSet::new(visible_capacity)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statics.len() + self.dynamics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    #[must_use]
    pub fn is_bvh_dirty(&self) -> bool {
        self.bvh_dirty
    }

    /// Registers object `id` with its world-space bounds.
    pub fn insert(&mut self, id: u32, is_static: bool, bounds: BoundingBox) -> VisibilityToken {
        if is_static {
            self.statics.insert(id, bounds);
            self.bvh_dirty = true;
        } else {
            self.dynamic_index.insert(id, self.dynamics.len());
            self.dynamics.push(DynamicEntry {
                id,
                sphere: bounds.bounding_sphere(),
            });
        }
        VisibilityToken { id, is_static }
    }

    /// Replaces the world-space bounds of a registered object.
    pub fn update(&mut self, token: VisibilityToken, bounds: BoundingBox) {
        if token.is_static {
            if let Some(entry) = self.statics.get_mut(&token.id) {
                *entry = bounds;
                self.bvh_dirty = true;
            }
        } else if let Some(&index) = self.dynamic_index.get(&token.id) {
            self.dynamics[index].sphere = bounds.bounding_sphere();
        }
    }

    pub fn remove(&mut self, token: VisibilityToken) {
        if token.is_static {
            if self.statics.remove(&token.id).is_some() {
                self.bvh_dirty = true;
            }
            return;
        }

        let Some(index) = self.dynamic_index.remove(&token.id) else {
            return;
        };
        self.dynamics.swap_remove(index);
        if let Some(moved) = self.dynamics.get(index) {
            self.dynamic_index.insert(moved.id, index);
        }
    }

    #[must_use]
    pub fn visible(&self, view: CameraView) -> &VisibleSet {
        &self.sets[view.index()]
    }

    /// Fills each view's visible set from its frustum.
    pub fn visibility_pass(&mut self, frustums: &[Option<Frustum>; VIEW_COUNT], pool: &WorkerPool) {
        if self.bvh_dirty {
            self.bvh.build(self.statics.iter().map(|(&id, &bounds)| (id, bounds)));
            self.bvh_dirty = false;
        }

        let needed = self.len() as u32;
        for set in &mut self.sets {
            set.ensure_capacity(needed);
            set.clear();
        }

        for (view, frustum) in CameraView::ALL.iter().zip(frustums) {
            let Some(frustum) = frustum else {
                continue;
            };
            let set = &self.sets[view.index()];

            self.bvh.walk(frustum, |id| {
                set.push(id);
            });

            let dynamics = &self.dynamics;
            pool.parallel_ranges(dynamics.len(), |range| {
                for entry in &dynamics[range] {
                    if frustum.intersects_sphere(entry.sphere.center, entry.sphere.radius) {
                        set.push(entry.id);
                    }
                }
            });

            if set.dropped() > 0 {
                log::warn!("{:?} visible set overflowed, {} objects dropped", view, set.dropped());
            }
        }
    }
}
