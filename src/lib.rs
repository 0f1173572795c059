//! octolayout - Force-directed 3D graph layout backed by a dynamic octree.
//!
//! The crate has two halves: a spatial index ([`octree`]) that keeps weighted
//! aggregates over a moving point set, and a force simulator ([`layout`]) that
//! uses it to approximate all-pairs repulsion. Graph storage stays with the
//! caller behind the [`graph::GraphModel`] trait.

pub mod error;
pub mod graph;
pub mod layout;
pub mod math;
pub mod octree;

pub use error::{LayoutError, LayoutResult};
pub use graph::{GraphModel, HalfLink, Node, NodeId};
pub use layout::{SimulationConfig, Simulator, StepStats};
pub use octree::{Octree, OctreeConfig};
