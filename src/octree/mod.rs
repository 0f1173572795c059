//! Dynamic octree over weighted points
//!
//! The tree partitions a fixed root box into octants and keeps, for every
//! octant, the weighted centroid, total weight and element count of its
//! subtree. That aggregate lets a distant cluster of points stand in as a
//! single pseudo-element (the Barnes-Hut approximation used by
//! [`crate::layout::BarnesHut`]).
//!
//! # Example
//!
//! ```rust
//! use glam::Vec3;
//! use octolayout::octree::{Octree, OctreeConfig};
//!
//! let mut tree: Octree<u32> = Octree::new(OctreeConfig::default()).unwrap();
//! tree.insert(1, Vec3::new(10.0, 0.0, 0.0), 1.0).unwrap();
//! tree.insert(2, Vec3::new(-10.0, 0.0, 0.0), 3.0).unwrap();
//!
//! let root = tree.octant(tree.root()).unwrap();
//! assert_eq!(root.count(), 2);
//! assert_eq!(root.weight(), 4.0);
//! assert_eq!(root.centroid(), Vec3::new(-5.0, 0.0, 0.0));
//!
//! tree.remove(&2).unwrap();
//! assert_eq!(tree.octant(tree.root()).unwrap().weight(), 1.0);
//! ```
//!
//! # Structure
//!
//! - Octants are created lazily the first time an element lands in an empty
//!   octant slot.
//! - A leaf splits once it holds more than `max_elements_per_leaf` elements,
//!   unless it sits at `max_depth`. The split point becomes the per-axis median
//!   of the held elements, falling back to the box midpoint on any axis where
//!   the median is not strictly inside the box.
//! - A non-root octant whose subtree empties is detached and pooled. The root
//!   is never detached; it resets to an empty leaf instead.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;

use glam::Vec3;
use tracing::trace;

use crate::error::{LayoutError, LayoutResult};
use crate::math::{Aabb, PointMass, median, weighted_centroid};

mod arena;
mod types;

use arena::Arena;

pub use types::{
    BoundsPolicy, DEFAULT_HALF_EXTENT, DEFAULT_MAX_DEPTH, DEFAULT_MAX_ELEMENTS_PER_LEAF, Element,
    Octant, OctantId, OctreeConfig, OctreeStats,
};

/// Relative tolerance used when checking aggregates in [`Octree::validate`]
const AGGREGATE_TOLERANCE: f32 = 1e-4;

/// Octree keyed by `K`, storing one position and weight per key
#[derive(Debug, Clone)]
pub struct Octree<K> {
    arena: Arena<K>,
    root: OctantId,
    config: OctreeConfig,
    /// Cached leaf of every element
    locations: HashMap<K, OctantId>,
}

impl<K> Octree<K>
where
    K: Copy + Eq + Hash + fmt::Debug,
{
    /// Create an empty tree whose root spans `config.bounds`
    pub fn new(config: OctreeConfig) -> LayoutResult<Self> {
        if !config.bounds.is_valid() {
            return Err(LayoutError::InvalidConfig(format!(
                "octree bounds must be finite with positive extent, got {}..{}",
                config.bounds.min, config.bounds.max
            )));
        }
        if config.max_elements_per_leaf == 0 {
            return Err(LayoutError::InvalidConfig(
                "max_elements_per_leaf must be at least 1".to_string(),
            ));
        }

        let mut arena = Arena::new();
        let root = arena.alloc(config.bounds, None, 0);
        Ok(Self {
            arena,
            root,
            config,
            locations: HashMap::new(),
        })
    }

    pub fn config(&self) -> &OctreeConfig {
        &self.config
    }

    pub fn root(&self) -> OctantId {
        self.root
    }

    /// Number of elements in the tree
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.locations.contains_key(key)
    }

    /// Leaf currently holding `key`
    pub fn find(&self, key: &K) -> Option<OctantId> {
        self.locations.get(key).copied()
    }

    /// Keys of every stored element, in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.locations.keys()
    }

    /// The octant behind `id`, or `None` if the slot is pooled
    pub fn octant(&self, id: OctantId) -> Option<&Octant<K>> {
        self.arena.is_live(id).then(|| self.arena.get(id))
    }

    /// Stored element for `key`
    pub fn element(&self, key: &K) -> Option<&Element<K>> {
        let leaf = self.find(key)?;
        self.arena
            .get(leaf)
            .elements
            .iter()
            .find(|element| element.key == *key)
    }

    /// Change the split limits.
    ///
    /// Leaves already over the new element limit split during the next
    /// [`Octree::reconcile_positions`] pass that visits them.
    pub fn set_limits(
        &mut self,
        max_depth: u32,
        max_elements_per_leaf: usize,
    ) -> LayoutResult<()> {
        if max_elements_per_leaf == 0 {
            return Err(LayoutError::InvalidConfig(
                "max_elements_per_leaf must be at least 1".to_string(),
            ));
        }
        self.config.max_depth = max_depth;
        self.config.max_elements_per_leaf = max_elements_per_leaf;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Insert / remove
    // -------------------------------------------------------------------------

    /// Insert an element, descending from the root.
    ///
    /// Returns the leaf that holds the element once any split has settled.
    pub fn insert(&mut self, key: K, position: Vec3, weight: f32) -> LayoutResult<OctantId> {
        if self.locations.contains_key(&key) {
            return Err(LayoutError::DuplicateElement(format!("{key:?}")));
        }
        check_weight(weight)?;
        let position = self.admit(position)?;

        let leaf = self.place(self.root, Element { key, position, weight })?;
        self.refresh_upward(leaf);
        Ok(leaf)
    }

    /// Remove an element and prune any octant its departure empties
    pub fn remove(&mut self, key: &K) -> LayoutResult<Element<K>> {
        let leaf = self
            .locations
            .remove(key)
            .ok_or_else(|| LayoutError::ElementNotFound(format!("{key:?}")))?;

        let elements = &mut self.arena.get_mut(leaf).elements;
        let index = elements
            .iter()
            .position(|element| element.key == *key)
            .ok_or_else(|| {
                LayoutError::InvalidTopology(format!(
                    "element {key:?} missing from its cached leaf {leaf}"
                ))
            })?;
        let element = elements.swap_remove(index);

        self.prune_upward(leaf);
        Ok(element)
    }

    /// Bring stored positions up to date and move elements that left their leaf.
    ///
    /// `source` yields the live position and weight for a key. Elements whose
    /// position is no longer inside their leaf are removed and reinserted from
    /// the root. With `recursive` every leaf under `start` is visited,
    /// otherwise only `start` itself (when it is a leaf). Aggregates of the
    /// visited subtree and its ancestors are exact afterwards.
    ///
    /// Returns the number of elements that changed leaf.
    pub fn reconcile_positions<F>(
        &mut self,
        start: OctantId,
        recursive: bool,
        mut source: F,
    ) -> LayoutResult<usize>
    where
        F: FnMut(&K) -> Option<PointMass>,
    {
        if !self.arena.is_live(start) {
            return Err(LayoutError::InvalidTopology(format!(
                "octant {start} is not attached to the tree"
            )));
        }

        let leaves = if recursive {
            self.leaves_under(start)
        } else if self.arena.get(start).is_leaf {
            vec![start]
        } else {
            Vec::new()
        };

        let misplaced = self.refresh_masses(&leaves, &mut source)?;
        self.refresh_subtree(start);
        if let Some(parent) = self.arena.get(start).parent {
            self.refresh_upward(parent);
        }

        for key in &misplaced {
            let element = self.remove(key)?;
            let leaf = self.place(self.root, element)?;
            self.refresh_upward(leaf);
        }

        for leaf in leaves {
            if self.is_overfull(leaf) {
                self.split(leaf)?;
                self.refresh_upward(leaf);
            }
        }

        if !misplaced.is_empty() {
            trace!(moved = misplaced.len(), "reinserted elements from root");
        }
        Ok(misplaced.len())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Squared distance from `point` to the nearest point of the octant's box
    pub fn closest_boundary_distance_squared(&self, id: OctantId, point: Vec3) -> f32 {
        self.arena.get(id).bounds.closest_distance_squared(point)
    }

    /// Occupied child slots of an octant
    pub fn children(&self, id: OctantId) -> impl Iterator<Item = OctantId> + '_ {
        self.arena.get(id).children.iter().flatten().copied()
    }

    /// Barnes-Hut acceptance test.
    ///
    /// `theta` is the ratio of box diagonal to distance: the octant may stand
    /// in for its whole subtree when `theta² · distance² > diagonal²`. A
    /// `theta` of zero never accepts, and a point inside the box never does.
    pub fn accepts(&self, id: OctantId, point: Vec3, theta: f32) -> bool {
        let bounds = self.arena.get(id).bounds;
        theta * theta * bounds.closest_distance_squared(point) > bounds.diagonal_squared()
    }

    /// Attached octants, breadth first from the root
    pub fn octants(&self) -> Vec<OctantId> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.children(id));
        }
        order
    }

    /// Mean depth over attached octants, or over leaves only
    pub fn average_depth(&self, leaves_only: bool) -> f32 {
        let depths: Vec<u32> = self
            .octants()
            .into_iter()
            .map(|id| self.arena.get(id))
            .filter(|octant| !leaves_only || octant.is_leaf)
            .map(|octant| octant.depth)
            .collect();
        if depths.is_empty() {
            return 0.0;
        }
        depths.iter().sum::<u32>() as f32 / depths.len() as f32
    }

    pub fn stats(&self) -> OctreeStats {
        let octants = self.octants();
        let mut stats = OctreeStats {
            octants: octants.len(),
            pooled: self.arena.pooled(),
            elements: self.len(),
            ..OctreeStats::default()
        };
        for id in octants {
            let octant = self.arena.get(id);
            if octant.is_leaf {
                stats.leaves += 1;
            }
            stats.max_depth = stats.max_depth.max(octant.depth);
        }
        stats
    }

    /// Check every structural invariant of the tree.
    ///
    /// Reports the first violation found as `InvalidTopology`.
    pub fn validate(&self) -> LayoutResult<()> {
        let root = self.arena.get(self.root);
        if root.parent.is_some() {
            return invalid("root octant has a parent");
        }
        if root.depth != 0 {
            return invalid(format!("root octant has depth {}", root.depth));
        }
        if root.count != self.locations.len() {
            return invalid(format!(
                "root counts {} elements but {} are indexed",
                root.count,
                self.locations.len()
            ));
        }

        for id in self.octants() {
            self.validate_octant(id)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Apply the bounds policy to an incoming position
    fn admit(&self, position: Vec3) -> LayoutResult<Vec3> {
        let bounds = self.config.bounds;
        if position.is_finite() && bounds.contains(position) {
            return Ok(position);
        }
        match self.config.bounds_policy {
            BoundsPolicy::Clamp if position.is_finite() => Ok(bounds.clamp(position)),
            _ => Err(LayoutError::OutOfBounds {
                position,
                min: bounds.min,
                max: bounds.max,
            }),
        }
    }

    /// Descend from `start` and store the element in the first leaf reached.
    ///
    /// Aggregates above the returned leaf are left for the caller to refresh.
    fn place(&mut self, start: OctantId, element: Element<K>) -> LayoutResult<OctantId> {
        let mut id = start;
        while !self.arena.get(id).is_leaf {
            id = self.child_for(id, element.position)?;
        }

        self.arena.get_mut(id).elements.push(element);
        self.locations.insert(element.key, id);

        if self.is_overfull(id) {
            self.split(id)?;
            return self.find(&element.key).ok_or_else(|| {
                LayoutError::InvalidTopology(format!(
                    "element {:?} lost while splitting octant {id}",
                    element.key
                ))
            });
        }
        Ok(id)
    }

    fn is_overfull(&self, id: OctantId) -> bool {
        if !self.arena.is_live(id) {
            return false;
        }
        let octant = self.arena.get(id);
        octant.is_leaf
            && octant.elements.len() > self.config.max_elements_per_leaf
            && octant.depth < self.config.max_depth
    }

    /// Child of `id` covering `position`, created on first use
    fn child_for(&mut self, id: OctantId, position: Vec3) -> LayoutResult<OctantId> {
        let octant = self.arena.get(id);
        let slot = Aabb::octant_of(octant.split, position);
        if let Some(child) = octant.children[slot] {
            return Ok(child);
        }
        if octant.is_leaf {
            return invalid(format!("cannot attach a child under leaf octant {id}"));
        }

        let bounds = octant.bounds.octant_bounds(octant.split, slot);
        let depth = octant.depth + 1;
        let child = self.arena.alloc(bounds, Some(id), depth);

        let parent = self.arena.get_mut(id);
        parent.children[slot] = Some(child);
        parent.child_count += 1;
        Ok(child)
    }

    /// Turn a leaf into an internal octant and push its elements down
    fn split(&mut self, id: OctantId) -> LayoutResult<()> {
        let octant = self.arena.get_mut(id);
        if !octant.is_leaf {
            return invalid(format!("octant {id} is already split"));
        }
        if octant.child_count != 0 {
            return invalid(format!("leaf octant {id} still has children"));
        }

        let elements = std::mem::take(&mut octant.elements);
        octant.split = split_point(octant.bounds, &elements);
        octant.is_leaf = false;
        trace!(
            octant = %id,
            depth = octant.depth,
            elements = elements.len(),
            split = %octant.split,
            "split octant"
        );

        for element in elements {
            self.place(id, element)?;
        }
        self.refresh_subtree(id);
        Ok(())
    }

    /// Recompute one octant's aggregate from its elements or children
    fn refresh(&mut self, id: OctantId) {
        let octant = self.arena.get(id);
        let center = octant.bounds.center();
        let (centroid, weight, count) = if octant.is_leaf {
            let (centroid, weight) =
                weighted_centroid(octant.elements.iter().map(Element::mass), center);
            (centroid, weight, octant.elements.len())
        } else {
            let children = || octant.children.iter().flatten().map(|&c| self.arena.get(c));
            let (centroid, weight) = weighted_centroid(children().map(Octant::aggregate), center);
            (centroid, weight, children().map(|child| child.count).sum())
        };

        let octant = self.arena.get_mut(id);
        octant.centroid = centroid;
        octant.weight = weight;
        octant.count = count;
    }

    fn refresh_upward(&mut self, from: OctantId) {
        let mut current = Some(from);
        while let Some(id) = current {
            self.refresh(id);
            current = self.arena.get(id).parent;
        }
    }

    fn refresh_subtree(&mut self, start: OctantId) {
        let mut order = vec![start];
        let mut index = 0;
        while index < order.len() {
            order.extend(self.children(order[index]));
            index += 1;
        }
        for id in order.into_iter().rev() {
            self.refresh(id);
        }
    }

    /// Walk from a leaf to the root, fixing aggregates and pruning empties
    fn prune_upward(&mut self, from: OctantId) {
        let mut current = Some(from);
        while let Some(id) = current {
            self.refresh(id);
            let octant = self.arena.get(id);
            let parent = octant.parent;
            if octant.count == 0 {
                match parent {
                    Some(parent) => self.detach(parent, id),
                    None => self.reset_root(),
                }
            }
            current = parent;
        }
    }

    fn detach(&mut self, parent: OctantId, child: OctantId) {
        let octant = self.arena.get_mut(parent);
        if let Some(slot) = octant.children.iter().position(|c| *c == Some(child)) {
            octant.children[slot] = None;
            octant.child_count -= 1;
        }
        self.release_subtree(child);
        trace!(octant = %child, parent = %parent, "pruned empty octant");
    }

    fn release_subtree(&mut self, id: OctantId) {
        let children: Vec<OctantId> = self.children(id).collect();
        for child in children {
            self.release_subtree(child);
        }
        self.arena.release(id);
    }

    fn reset_root(&mut self) {
        let children: Vec<OctantId> = self.children(self.root).collect();
        for child in children {
            self.release_subtree(child);
        }
        let bounds = self.config.bounds;
        self.arena.get_mut(self.root).reset(bounds, None, 0);
    }

    fn leaves_under(&self, start: OctantId) -> Vec<OctantId> {
        let mut leaves = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if self.arena.get(id).is_leaf {
                leaves.push(id);
            } else {
                stack.extend(self.children(id));
            }
        }
        leaves
    }

    /// Copy live masses into the given leaves, noting elements that left them
    /// Write fresh masses into the leaves' elements, returning the keys that
    /// left their leaf.
    ///
    /// Every mass is read and admitted before any is written, so a failure
    /// leaves the tree untouched.
    fn refresh_masses<F>(&mut self, leaves: &[OctantId], source: &mut F) -> LayoutResult<Vec<K>>
    where
        F: FnMut(&K) -> Option<PointMass>,
    {
        let mut updates = Vec::new();
        for &leaf in leaves {
            for (index, element) in self.arena.get(leaf).elements.iter().enumerate() {
                let key = element.key;
                let mass =
                    source(&key).ok_or_else(|| LayoutError::ElementNotFound(format!("{key:?}")))?;
                check_weight(mass.weight)?;
                let position = self.admit(mass.position)?;
                updates.push((leaf, index, position, mass.weight));
            }
        }

        let mut misplaced = Vec::new();
        for (leaf, index, position, weight) in updates {
            let octant = self.arena.get_mut(leaf);
            let element = &mut octant.elements[index];
            element.position = position;
            element.weight = weight;
            if !octant.bounds.contains(position) {
                misplaced.push(element.key);
            }
        }
        Ok(misplaced)
    }

    fn validate_octant(&self, id: OctantId) -> LayoutResult<()> {
        let octant = self.arena.get(id);
        if octant.in_pool {
            return invalid(format!("pooled octant {id} is still attached"));
        }
        if !octant.bounds.is_valid() {
            return invalid(format!("octant {id} has degenerate bounds"));
        }

        if let Some(parent_id) = octant.parent {
            let parent = self.arena.get(parent_id);
            if octant.depth != parent.depth + 1 {
                return invalid(format!(
                    "octant {id} has depth {} under parent depth {}",
                    octant.depth, parent.depth
                ));
            }
            let Some(slot) = parent.children.iter().position(|c| *c == Some(id)) else {
                return invalid(format!("octant {id} is not a child of its parent {parent_id}"));
            };
            if octant.bounds != parent.bounds.octant_bounds(parent.split, slot) {
                return invalid(format!("octant {id} does not tile its parent's box"));
            }
            if octant.count == 0 {
                return invalid(format!("empty octant {id} was not pruned"));
            }
        } else if id != self.root {
            return invalid(format!("octant {id} has no parent but is not the root"));
        }

        let live_children = octant.children.iter().flatten().count();
        if live_children != octant.child_count() {
            return invalid(format!(
                "octant {id} records {} children but has {live_children}",
                octant.child_count
            ));
        }

        let (expected_centroid, expected_weight, expected_count) = if octant.is_leaf {
            if live_children != 0 {
                return invalid(format!("leaf octant {id} has children"));
            }
            for element in &octant.elements {
                if self.locations.get(&element.key) != Some(&id) {
                    return invalid(format!(
                        "element {:?} is not cached as living in octant {id}",
                        element.key
                    ));
                }
                if !octant.bounds.contains(element.position) {
                    return invalid(format!(
                        "element {:?} at {} is outside octant {id}",
                        element.key, element.position
                    ));
                }
            }
            let (centroid, weight) = weighted_centroid(
                octant.elements.iter().map(Element::mass),
                octant.bounds.center(),
            );
            (centroid, weight, octant.elements.len())
        } else {
            if !octant.elements.is_empty() {
                return invalid(format!("internal octant {id} stores elements"));
            }
            if live_children == 0 {
                return invalid(format!("internal octant {id} has no children"));
            }
            let children: Vec<&Octant<K>> = self.children(id).map(|c| self.arena.get(c)).collect();
            let (centroid, weight) = weighted_centroid(
                children.iter().map(|child| child.aggregate()),
                octant.bounds.center(),
            );
            (centroid, weight, children.iter().map(|child| child.count).sum())
        };

        if octant.count != expected_count {
            return invalid(format!(
                "octant {id} counts {} elements but holds {expected_count}",
                octant.count
            ));
        }
        let weight_tolerance = AGGREGATE_TOLERANCE * expected_weight.max(1.0);
        if (octant.weight - expected_weight).abs() > weight_tolerance {
            return invalid(format!(
                "octant {id} weighs {} but its contents weigh {expected_weight}",
                octant.weight
            ));
        }
        let position_tolerance = AGGREGATE_TOLERANCE * octant.bounds.size().max_element().max(1.0);
        if octant.centroid.distance(expected_centroid) > position_tolerance {
            return invalid(format!(
                "octant {id} centroid {} differs from {expected_centroid}",
                octant.centroid
            ));
        }
        Ok(())
    }
}

impl<K> fmt::Display for Octree<K>
where
    K: Copy + Eq + Hash + fmt::Debug,
{
    /// Indented outline of the tree: slot, kind, depth, count and weight
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(self.root, None::<usize>)];
        while let Some((id, slot)) = stack.pop() {
            let octant = self.arena.get(id);
            let indent = "  ".repeat(octant.depth as usize);
            let label = slot.map_or_else(|| "root".to_string(), |slot| format!("[{slot}]"));
            let kind = if octant.is_leaf { "leaf" } else { "internal" };
            writeln!(
                f,
                "{indent}{label} {kind} depth={} count={} weight={}",
                octant.depth, octant.count, octant.weight
            )?;
            for slot in (0..8).rev() {
                if let Some(child) = octant.children[slot] {
                    stack.push((child, Some(slot)));
                }
            }
        }
        Ok(())
    }
}

/// Split point for a leaf about to divide
fn split_point<K>(bounds: Aabb, elements: &[Element<K>]) -> Vec3 {
    let mut split = bounds.center();
    let mut values = Vec::with_capacity(elements.len());
    for axis in 0..3 {
        values.clear();
        values.extend(elements.iter().map(|element| element.position[axis]));
        if let Some(m) = median(&mut values) {
            if m > bounds.min[axis] && m < bounds.max[axis] {
                split[axis] = m;
            }
        }
    }
    split
}

fn check_weight(weight: f32) -> LayoutResult<()> {
    if weight.is_finite() && weight > 0.0 {
        Ok(())
    } else {
        Err(LayoutError::InvalidWeight(weight))
    }
}

fn invalid<T>(message: impl Into<String>) -> LayoutResult<T> {
    Err(LayoutError::InvalidTopology(message.into()))
}

#[cfg(test)]
mod tests;
