//! Graph model seam
//!
//! The simulator does not own graph storage. It reads and writes node
//! fields through [`GraphModel`], which a host application implements over
//! whatever node store it already has. `Vec<Node>` implements it directly,
//! with a node's index as its [`NodeId`].

use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, LayoutResult};

/// Handle of a node in a [`GraphModel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// One direction of an undirected edge.
///
/// Every edge is stored as two half-links, one on each endpoint, sharing the
/// same `handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalfLink {
    pub from: NodeId,
    pub to: NodeId,
    /// Opaque handle owned by the caller (e.g. a renderer's line object)
    pub handle: Option<u64>,
}

/// A graph node as seen by the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Mass, must be finite and > 0
    pub weight: f32,
    /// Outgoing half-links; `from` is always this node
    pub links: Vec<HalfLink>,
    /// Deleted nodes are skipped by the simulator and dropped from its index
    pub deleted: bool,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            weight: 1.0,
            links: Vec::new(),
            deleted: false,
        }
    }
}

impl Node {
    /// Node at rest at `position` with weight 1
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Neighbours in link order
    pub fn neighbours(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.links.iter().map(|link| link.to)
    }

    pub fn is_linked_to(&self, other: NodeId) -> bool {
        self.links.iter().any(|link| link.to == other)
    }
}

/// Node storage the simulator reads from and writes back to
pub trait GraphModel {
    /// Live node handles in a stable order
    fn node_ids(&self) -> Vec<NodeId>;

    fn node(&self, id: NodeId) -> Option<&Node>;

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node>;
}

impl GraphModel for Vec<Node> {
    fn node_ids(&self) -> Vec<NodeId> {
        self.iter()
            .enumerate()
            .filter(|(_, node)| !node.deleted)
            .map(|(index, _)| NodeId(index))
            .collect()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.get_mut(id.0)
    }
}

/// Link `a` and `b` with a pair of half-links.
///
/// Returns `false` when the nodes are already linked or `a == b`.
pub fn connect<G>(graph: &mut G, a: NodeId, b: NodeId, handle: Option<u64>) -> LayoutResult<bool>
where
    G: GraphModel + ?Sized,
{
    require(graph, a)?;
    require(graph, b)?;
    if a == b || graph.node(a).is_some_and(|node| node.is_linked_to(b)) {
        return Ok(false);
    }

    for (from, to) in [(a, b), (b, a)] {
        if let Some(node) = graph.node_mut(from) {
            node.links.push(HalfLink { from, to, handle });
        }
    }
    Ok(true)
}

/// Remove both half-links between `a` and `b`.
///
/// Returns `false` when they were not linked.
pub fn disconnect<G>(graph: &mut G, a: NodeId, b: NodeId) -> LayoutResult<bool>
where
    G: GraphModel + ?Sized,
{
    require(graph, a)?;
    require(graph, b)?;

    let mut removed = false;
    for (from, to) in [(a, b), (b, a)] {
        if let Some(node) = graph.node_mut(from) {
            let before = node.links.len();
            node.links.retain(|link| link.to != to);
            removed |= node.links.len() != before;
        }
    }
    Ok(removed)
}

fn require<G>(graph: &G, id: NodeId) -> LayoutResult<()>
where
    G: GraphModel + ?Sized,
{
    match graph.node(id) {
        Some(_) => Ok(()),
        None => Err(LayoutError::ElementNotFound(id.to_string())),
    }
}

/// Position `index` of `total` on a Fibonacci lattice over a sphere.
///
/// Gives an even spread of starting positions, so no two nodes begin
/// coincident.
pub fn fibonacci_sphere(index: usize, total: usize, radius: f32) -> Vec3 {
    let golden_ratio = (1.0 + 5.0_f32.sqrt()) / 2.0;
    let i = index as f32;
    let n = total.max(1) as f32;

    let theta = std::f32::consts::TAU * i / golden_ratio;
    let phi = (1.0 - 2.0 * (i + 0.5) / n).clamp(-1.0, 1.0).acos();

    Vec3::new(
        radius * phi.sin() * theta.cos(),
        radius * phi.sin() * theta.sin(),
        radius * phi.cos(),
    )
}
