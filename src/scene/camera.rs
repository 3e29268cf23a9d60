use glam::{Mat4, Vec3, Vec4};

use crate::resources::geometry::{BoundingBox, BoundingSphere};

/// Result of testing a volume against a frustum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Outside,
    Partial,
    Inside,
}

/// Six half-space planes bounding one camera view.
///
/// Planes are stored as `(normal, distance)` with normals pointing inward, so
/// a point `p` is inside a plane when `dot(n, p) + d >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6], // Left, Right, Bottom, Top, Near, Far
}

impl Default for Frustum {
    fn default() -> Self {
        Self::from_matrix(Mat4::IDENTITY)
    }
}

impl Frustum {
    /// Extracts the planes of a view-projection matrix (Gribb-Hartmann).
    ///
    /// Assumes WGPU clip space, NDC depth in `[0, 1]`.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        let mut planes = [
            rows[3] + rows[0], // Left
            rows[3] - rows[0], // Right
            rows[3] + rows[1], // Bottom
            rows[3] - rows[1], // Top
            rows[2],           // Near
            rows[3] - rows[2], // Far
        ];

        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }

        Self { planes }
    }

    /// Builds a frustum from already normalized inward-facing planes.
    #[must_use]
    pub fn from_planes(planes: [Vec4; 6]) -> Self {
        Self { planes }
    }

    #[must_use]
    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    #[inline]
    fn distance(plane: Vec4, point: Vec3) -> f32 {
        plane.truncate().dot(point) + plane.w
    }

    /// Conservative sphere test: `false` only if the sphere is fully outside.
    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        if radius.is_nan() || radius < 0.0 {
            return false;
        }
        self.planes
            .iter()
            .all(|plane| Self::distance(*plane, center) >= -radius)
    }

    #[must_use]
    pub fn classify_sphere(&self, sphere: &BoundingSphere) -> Containment {
        if !sphere.is_valid() {
            return Containment::Outside;
        }
        let mut result = Containment::Inside;
        for plane in &self.planes {
            let d = Self::distance(*plane, sphere.center);
            if d < -sphere.radius {
                return Containment::Outside;
            }
            if d < sphere.radius {
                result = Containment::Partial;
            }
        }
        result
    }

    /// Box test using the positive / negative vertex of each plane.
    #[must_use]
    pub fn classify_aabb(&self, aabb: &BoundingBox) -> Containment {
        let mut result = Containment::Inside;
        for plane in &self.planes {
            let n = plane.truncate();
            let positive = Vec3::select(n.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            let negative = Vec3::select(n.cmpge(Vec3::ZERO), aabb.min, aabb.max);

            if Self::distance(*plane, positive) < 0.0 {
                return Containment::Outside;
            }
            if Self::distance(*plane, negative) < 0.0 {
                result = Containment::Partial;
            }
        }
        result
    }
}
