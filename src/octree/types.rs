//! Octree node, element and configuration types

use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::math::{Aabb, PointMass};

// =============================================================================
// Default Constants
// =============================================================================

/// Default half extent of the root box on every axis
pub const DEFAULT_HALF_EXTENT: f32 = 10_000.0;

/// Default maximum depth of the tree (root is depth 0)
pub const DEFAULT_MAX_DEPTH: u32 = 15;

/// Default number of elements a leaf holds before it splits
pub const DEFAULT_MAX_ELEMENTS_PER_LEAF: usize = 10;

/// Stable index of an octant in the tree's arena.
///
/// Slots are recycled after a prune, so an id is only meaningful while the
/// octant it names is still attached to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OctantId(pub(crate) u32);

impl OctantId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OctantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An element stored directly in a leaf
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element<K> {
    pub key: K,
    /// Position as last seen by the index (clamped under `BoundsPolicy::Clamp`)
    pub position: Vec3,
    pub weight: f32,
}

impl<K> Element<K> {
    pub fn mass(&self) -> PointMass {
        PointMass::new(self.position, self.weight)
    }
}

/// What to do with an element whose position is outside the root box
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsPolicy {
    /// Fail the operation with `LayoutError::OutOfBounds`
    #[default]
    Reject,
    /// Index the element at the nearest point of the root box
    Clamp,
}

/// Configuration for the octree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    /// Extent of the root octant
    pub bounds: Aabb,
    /// Leaves at this depth never split
    pub max_depth: u32,
    /// A leaf splits once it holds more than this many elements
    pub max_elements_per_leaf: usize,
    /// Out-of-bounds handling
    pub bounds_policy: BoundsPolicy,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            bounds: Aabb::cube(DEFAULT_HALF_EXTENT),
            max_depth: DEFAULT_MAX_DEPTH,
            max_elements_per_leaf: DEFAULT_MAX_ELEMENTS_PER_LEAF,
            bounds_policy: BoundsPolicy::Reject,
        }
    }
}

impl OctreeConfig {
    pub fn with_bounds(mut self, bounds: Aabb) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_elements_per_leaf(mut self, max_elements: usize) -> Self {
        self.max_elements_per_leaf = max_elements;
        self
    }

    pub fn with_bounds_policy(mut self, policy: BoundsPolicy) -> Self {
        self.bounds_policy = policy;
        self
    }
}

/// One node of the octree.
///
/// A leaf stores elements directly; an internal octant stores none and owns
/// at least one live child. The aggregate (centroid, weight, count) always
/// summarises the whole subtree.
#[derive(Debug, Clone)]
pub struct Octant<K> {
    pub(crate) bounds: Aabb,
    pub(crate) split: Vec3,
    pub(crate) is_leaf: bool,
    pub(crate) children: [Option<OctantId>; 8],
    pub(crate) child_count: u8,
    pub(crate) elements: Vec<Element<K>>,
    pub(crate) centroid: Vec3,
    pub(crate) weight: f32,
    pub(crate) count: usize,
    pub(crate) depth: u32,
    pub(crate) parent: Option<OctantId>,
    pub(crate) in_pool: bool,
}

impl<K> Octant<K> {
    pub(crate) fn new(bounds: Aabb, parent: Option<OctantId>, depth: u32) -> Self {
        let center = bounds.center();
        Self {
            bounds,
            split: center,
            is_leaf: true,
            children: [None; 8],
            child_count: 0,
            elements: Vec::new(),
            centroid: center,
            weight: 0.0,
            count: 0,
            depth,
            parent,
            in_pool: false,
        }
    }

    /// Restore creation defaults, keeping the element buffer's allocation
    pub(crate) fn reset(&mut self, bounds: Aabb, parent: Option<OctantId>, depth: u32) {
        let center = bounds.center();
        self.bounds = bounds;
        self.split = center;
        self.is_leaf = true;
        self.children = [None; 8];
        self.child_count = 0;
        self.elements.clear();
        self.centroid = center;
        self.weight = 0.0;
        self.count = 0;
        self.depth = depth;
        self.parent = parent;
        self.in_pool = false;
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Point the octant divides its box at
    pub fn split(&self) -> Vec3 {
        self.split
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Elements stored directly (empty for internal octants)
    pub fn elements(&self) -> &[Element<K>] {
        &self.elements
    }

    /// Weighted centroid of the subtree
    pub fn centroid(&self) -> Vec3 {
        self.centroid
    }

    /// Total weight of the subtree
    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Number of elements in the subtree
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn parent(&self) -> Option<OctantId> {
        self.parent
    }

    /// Number of live child slots
    pub fn child_count(&self) -> usize {
        usize::from(self.child_count)
    }

    /// Child in the given octant slot
    pub fn child(&self, octant: usize) -> Option<OctantId> {
        self.children.get(octant).copied().flatten()
    }

    /// The subtree collapsed into a single pseudo-element
    pub fn aggregate(&self) -> PointMass {
        PointMass::new(self.centroid, self.weight)
    }
}

/// Structural summary of an octree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OctreeStats {
    /// Octants attached to the tree
    pub octants: usize,
    /// Attached octants that are leaves
    pub leaves: usize,
    /// Released octants waiting for reuse
    pub pooled: usize,
    /// Deepest attached octant
    pub max_depth: u32,
    /// Elements stored in the tree
    pub elements: usize,
}
