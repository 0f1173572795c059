//! Shared numeric helpers: boxes, point masses and medians

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// A position with a weight, the unit every force law works on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointMass {
    pub position: Vec3,
    pub weight: f32,
}

impl PointMass {
    pub fn new(position: Vec3, weight: f32) -> Self {
        Self { position, weight }
    }

    /// This aggregate with `part` taken back out.
    ///
    /// `None` when nothing meaningful is left, i.e. `part` carried (almost)
    /// all of the weight.
    pub fn without(self, part: PointMass) -> Option<PointMass> {
        let weight = self.weight - part.weight;
        if weight <= self.weight * 1e-6 {
            return None;
        }
        let position = (self.position * self.weight - part.position * part.weight) / weight;
        Some(PointMass::new(position, weight))
    }
}

/// Axis-aligned bounding box, inclusive on every face
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Box spanning two arbitrary corners
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Cube centered on the origin with the given half extent
    pub fn cube(half_extent: f32) -> Self {
        Self::new(Vec3::splat(-half_extent), Vec3::splat(half_extent))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Squared corner-to-corner length
    pub fn diagonal_squared(&self) -> f32 {
        self.size().length_squared()
    }

    /// True when every axis has positive extent
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.max.cmpgt(self.min).all()
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Nearest point of the box to `point`
    pub fn clamp(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }

    /// Squared distance from `point` to the nearest point on the box, zero inside
    pub fn closest_distance_squared(&self, point: Vec3) -> f32 {
        (point - self.clamp(point)).length_squared()
    }

    /// Octant index of `point` relative to `split`.
    ///
    /// Bit 0 is set for `x >= split.x`, bit 1 for y, bit 2 for z.
    pub fn octant_of(split: Vec3, point: Vec3) -> usize {
        usize::from(point.x >= split.x)
            | (usize::from(point.y >= split.y) << 1)
            | (usize::from(point.z >= split.z) << 2)
    }

    /// Sub-box of `self` for `octant` when divided at `split`
    pub fn octant_bounds(&self, split: Vec3, octant: usize) -> Aabb {
        let pick = |bit: usize, lo: f32, mid: f32, hi: f32| {
            if octant & bit != 0 { (mid, hi) } else { (lo, mid) }
        };
        let (min_x, max_x) = pick(1, self.min.x, split.x, self.max.x);
        let (min_y, max_y) = pick(2, self.min.y, split.y, self.max.y);
        let (min_z, max_z) = pick(4, self.min.z, split.z, self.max.z);
        Aabb {
            min: Vec3::new(min_x, min_y, min_z),
            max: Vec3::new(max_x, max_y, max_z),
        }
    }

    /// True when the two boxes share interior volume
    pub fn overlaps_interior(&self, other: &Aabb) -> bool {
        self.min.cmplt(other.max).all() && other.min.cmplt(self.max).all()
    }

    pub fn volume(&self) -> f32 {
        let size = self.size();
        size.x * size.y * size.z
    }
}

/// Median of `values`, reordering the slice. `None` when empty.
///
/// Even-length input averages the two middle values.
pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) * 0.5)
    }
}

/// Weighted centroid and total weight of a set of point masses.
///
/// Falls back to `empty_center` when the total weight is zero.
pub fn weighted_centroid(
    masses: impl IntoIterator<Item = PointMass>,
    empty_center: Vec3,
) -> (Vec3, f32) {
    let (sum, weight) = masses
        .into_iter()
        .fold((Vec3::ZERO, 0.0_f32), |(sum, weight), mass| {
            (sum + mass.position * mass.weight, weight + mass.weight)
        });
    if weight > 0.0 {
        (sum / weight, weight)
    } else {
        (empty_center, 0.0)
    }
}
