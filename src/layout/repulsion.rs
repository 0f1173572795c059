//! Repulsion strategies
//!
//! Both strategies answer the same question, "total repulsion on body `i`
//! from every other body", against a snapshot taken once per step by
//! [`Repulsion::prepare`]. [`AllPairs`] sums exactly; [`BarnesHut`] walks an
//! octree and lets distant octants stand in for their whole subtree.

use std::collections::HashMap;

use glam::Vec3;
use rand::RngCore;

use crate::error::LayoutResult;
use crate::graph::NodeId;
use crate::math::PointMass;
use crate::octree::{OctantId, Octree, OctreeConfig};

use super::forces::ForceModel;
use super::types::StepStats;

/// A node's identity and mass as captured at the start of a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub id: NodeId,
    pub mass: PointMass,
}

/// Total repulsion on one body from all the others
pub trait Repulsion {
    /// Capture the bodies for this step.
    ///
    /// Returns the number of indexed elements that changed leaf.
    fn prepare(&mut self, bodies: &[Body]) -> LayoutResult<usize>;

    /// Repulsion on `bodies[index]` from the prepared snapshot
    fn force_on(
        &self,
        index: usize,
        forces: &ForceModel,
        rng: &mut dyn RngCore,
        stats: &mut StepStats,
    ) -> Vec3;

    /// Spatial index backing the strategy, if any
    fn index(&self) -> Option<&Octree<NodeId>> {
        None
    }
}

/// Exact O(N²) summation
#[derive(Debug, Clone, Default)]
pub struct AllPairs {
    bodies: Vec<Body>,
}

impl AllPairs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repulsion for AllPairs {
    fn prepare(&mut self, bodies: &[Body]) -> LayoutResult<usize> {
        self.bodies.clear();
        self.bodies.extend_from_slice(bodies);
        Ok(0)
    }

    fn force_on(
        &self,
        index: usize,
        forces: &ForceModel,
        rng: &mut dyn RngCore,
        stats: &mut StepStats,
    ) -> Vec3 {
        let Some(on) = self.bodies.get(index) else {
            return Vec3::ZERO;
        };

        let mut total = Vec3::ZERO;
        for (other_index, other) in self.bodies.iter().enumerate() {
            if other_index == index {
                continue;
            }
            total += evaluate(forces, on.mass, other.mass, rng, stats);
        }
        total
    }
}

/// Octree-backed approximation.
///
/// The tree persists between steps; `prepare` inserts new bodies, drops
/// vanished ones and reconciles everyone else's position.
#[derive(Debug, Clone)]
pub struct BarnesHut {
    tree: Octree<NodeId>,
    theta: f32,
    bodies: Vec<Body>,
    lookup: HashMap<NodeId, usize>,
}

impl BarnesHut {
    pub fn new(config: OctreeConfig, theta: f32) -> LayoutResult<Self> {
        Ok(Self {
            tree: Octree::new(config)?,
            theta,
            bodies: Vec::new(),
            lookup: HashMap::new(),
        })
    }

    pub fn theta(&self) -> f32 {
        self.theta
    }

    pub fn set_theta(&mut self, theta: f32) {
        self.theta = theta;
    }

    pub fn tree(&self) -> &Octree<NodeId> {
        &self.tree
    }

    /// Stored mass of `id` and every octant whose aggregate includes it
    fn lineage(&self, id: &NodeId) -> (Option<PointMass>, Vec<OctantId>) {
        let Some(element) = self.tree.element(id) else {
            return (None, Vec::new());
        };
        let mut chain = Vec::new();
        let mut next = self.tree.find(id);
        while let Some(octant_id) = next {
            chain.push(octant_id);
            next = self.tree.octant(octant_id).and_then(|octant| octant.parent());
        }
        (Some(element.mass()), chain)
    }
}

impl Repulsion for BarnesHut {
    fn prepare(&mut self, bodies: &[Body]) -> LayoutResult<usize> {
        self.bodies.clear();
        self.bodies.extend_from_slice(bodies);
        self.lookup.clear();
        self.lookup
            .extend(bodies.iter().enumerate().map(|(index, body)| (body.id, index)));

        let stale: Vec<NodeId> = self
            .tree
            .keys()
            .filter(|id| !self.lookup.contains_key(*id))
            .copied()
            .collect();
        for id in &stale {
            self.tree.remove(id)?;
        }
        for body in bodies {
            if !self.tree.contains(&body.id) {
                self.tree
                    .insert(body.id, body.mass.position, body.mass.weight)?;
            }
        }

        let lookup = &self.lookup;
        let root = self.tree.root();
        self.tree.reconcile_positions(root, true, |id| {
            lookup.get(id).map(|&index| bodies[index].mass)
        })
    }

    fn force_on(
        &self,
        index: usize,
        forces: &ForceModel,
        rng: &mut dyn RngCore,
        stats: &mut StepStats,
    ) -> Vec3 {
        let Some(on) = self.bodies.get(index) else {
            return Vec3::ZERO;
        };

        // A clamped body is stored away from its live position, so an octant
        // holding it can still pass the acceptance test.
        let (own, lineage) = self.lineage(&on.id);

        let mut total = Vec3::ZERO;
        let mut pending = vec![self.tree.root()];
        while let Some(id) = pending.pop() {
            let Some(octant) = self.tree.octant(id) else {
                continue;
            };
            if octant.count() == 0 {
                continue;
            }

            if self.tree.accepts(id, on.mass.position, self.theta) {
                let mut source = octant.aggregate();
                if let Some(own) = own.filter(|_| lineage.contains(&id)) {
                    match source.without(own) {
                        Some(rest) => source = rest,
                        None => continue,
                    }
                }
                stats.approximations += 1;
                total += evaluate(forces, on.mass, source, rng, stats);
            } else if octant.is_leaf() {
                stats.leaf_scans += 1;
                for element in octant.elements() {
                    if element.key != on.id {
                        total += evaluate(forces, on.mass, element.mass(), rng, stats);
                    }
                }
            } else {
                stats.descents += 1;
                pending.extend(self.tree.children(id));
            }
        }
        total
    }

    fn index(&self) -> Option<&Octree<NodeId>> {
        Some(&self.tree)
    }
}

fn evaluate(
    forces: &ForceModel,
    on: PointMass,
    from: PointMass,
    rng: &mut dyn RngCore,
    stats: &mut StepStats,
) -> Vec3 {
    let sample = forces.repulsion(on, from, rng);
    stats.repulsion_evaluations += 1;
    if sample.jittered {
        stats.jitters += 1;
    }
    sample.force
}
