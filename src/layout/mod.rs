//! Force-directed 3D graph layout
//!
//! Moves the nodes of a [`GraphModel`](crate::graph::GraphModel) toward a
//! layout where spring attraction along edges balances inverse-square
//! repulsion between every pair of nodes.
//!
//! # Example
//!
//! ```rust
//! use glam::Vec3;
//! use octolayout::graph::{connect, fibonacci_sphere, Node, NodeId};
//! use octolayout::layout::{SimulationConfig, Simulator};
//!
//! let mut graph: Vec<Node> = (0..3)
//!     .map(|i| Node::at(fibonacci_sphere(i, 3, 100.0)))
//!     .collect();
//! connect(&mut graph, NodeId(0), NodeId(1), None).unwrap();
//! connect(&mut graph, NodeId(1), NodeId(2), None).unwrap();
//!
//! let mut sim = Simulator::new(SimulationConfig::default().with_seed(1)).unwrap();
//! for _ in 0..100 {
//!     sim.step(&mut graph, 1.0 / 60.0).unwrap();
//! }
//! assert!(graph.iter().all(|node| node.position.is_finite()));
//! ```
//!
//! # Forces
//!
//! - **Spring**: `spring * (neighbour - node)` along every edge
//! - **Repulsion**: `repulsion * w_a * w_b / d²` between every pair, exact
//!   ([`RepulsionMode::AllPairs`]) or octree-approximated
//!   ([`RepulsionMode::BarnesHut`])
//! - **Gravity**: one constant vector added to every node when enabled
//!
//! # Integration
//!
//! Forces are evaluated for all nodes against one snapshot, then applied.
//! Velocity is clamped to `max_speed`, or to the lower limit of a
//! [`SpeedCooling`] schedule, and decays as `damping^dt`. After each step the
//! mean velocity is removed and the layout is recentered.
//! [`Simulator::reset_positions`] scatters the nodes again and restarts the
//! cooling schedule.

mod forces;
mod repulsion;
mod simulation;
mod types;

pub use forces::{ForceModel, RepulsionSample};
pub use repulsion::{AllPairs, BarnesHut, Body, Repulsion};
pub use simulation::Simulator;
pub use types::{
    // Default constants for customization
    DEFAULT_COOLING_FLOOR,
    DEFAULT_COOLING_SCALE,
    DEFAULT_DAMPING,
    DEFAULT_EPSILON,
    DEFAULT_GRAVITY,
    DEFAULT_MAX_SPEED,
    DEFAULT_MAX_TIME_STEP,
    DEFAULT_RECENTER_SMOOTHING,
    DEFAULT_REPULSION,
    DEFAULT_RESET_EXTENT,
    DEFAULT_SPRING,
    DEFAULT_TEMPORAL_SMOOTHING,
    DEFAULT_THETA,
    RecenterMode,
    RepulsionMode,
    SimulationConfig,
    SpeedCooling,
    StepStats,
};
