//! Simulation configuration and per-step diagnostics

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, LayoutResult};
use crate::graph::NodeId;
use crate::octree::OctreeConfig;

// =============================================================================
// Default Constants
// =============================================================================

/// Default spring multiplier along edges
pub const DEFAULT_SPRING: f32 = 8000.0;

/// Default inverse-square repulsion multiplier
pub const DEFAULT_REPULSION: f32 = 2000.0;

/// Default fraction of velocity kept after one second of simulated time
pub const DEFAULT_DAMPING: f32 = 0.97;

/// Default scale from force to velocity change
pub const DEFAULT_TEMPORAL_SMOOTHING: f32 = 0.001;

/// Default speed limit in units per second
pub const DEFAULT_MAX_SPEED: f32 = 5000.0;

/// Default cap on a step's time delta, in seconds
pub const DEFAULT_MAX_TIME_STEP: f32 = 0.1;

/// Default Barnes-Hut acceptance ratio (box diagonal over distance)
pub const DEFAULT_THETA: f32 = 0.5;

/// Default distance below which two points count as coincident
pub const DEFAULT_EPSILON: f32 = 0.1;

/// Default gravity vector, applied only when gravity is enabled
pub const DEFAULT_GRAVITY: Vec3 = Vec3::new(0.0, -1.0, 0.0);

/// Default fraction of the recentering offset applied per step
pub const DEFAULT_RECENTER_SMOOTHING: f32 = 1.0;

/// Default cooling numerator: the speed limit is `scale / t²` at run time `t`
pub const DEFAULT_COOLING_SCALE: f32 = 100_000.0;

/// Default speed limit the cooling schedule settles at
pub const DEFAULT_COOLING_FLOOR: f32 = 1000.0;

/// Default edge length of the cube node positions are re-seeded into
pub const DEFAULT_RESET_EXTENT: f32 = 5000.0;

/// Speed limit that starts high and falls with simulated run time.
///
/// At run time `t` the limit is `max(scale / t², floor)`, never above
/// [`SimulationConfig::max_speed`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedCooling {
    pub scale: f32,
    pub floor: f32,
}

impl Default for SpeedCooling {
    fn default() -> Self {
        Self {
            scale: DEFAULT_COOLING_SCALE,
            floor: DEFAULT_COOLING_FLOOR,
        }
    }
}

impl SpeedCooling {
    pub fn limit(&self, run_time: f32) -> f32 {
        if run_time <= 0.0 {
            return f32::INFINITY;
        }
        (self.scale / (run_time * run_time)).max(self.floor)
    }
}

/// How the layout is kept centered on the origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecenterMode {
    /// Subtract the mean node position
    #[default]
    Mean,
    /// Subtract the position of one node, pinning it to the origin
    Anchor(NodeId),
    Disabled,
}

/// Strategy used to sum repulsion on each node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepulsionMode {
    /// Exact sum over every other node, O(N²) per step
    AllPairs,
    /// Octree approximation, roughly O(N log N) per step
    #[default]
    BarnesHut,
}

/// Configuration for the force simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Spring multiplier (force per unit of separation along an edge)
    pub spring: f32,
    /// Repulsion multiplier between every pair of nodes
    pub repulsion: f32,
    /// Fraction of velocity retained per second, in (0, 1]
    pub damping: f32,
    /// Scale applied to force before it becomes a velocity change
    pub temporal_smoothing: f32,
    /// Speeds above this are clamped
    pub max_speed: f32,
    /// Upper bound on the time delta of one step
    pub max_time_step: f32,
    /// Barnes-Hut acceptance ratio; 0 disables approximation
    pub theta: f32,
    /// Coincidence floor for repulsion
    pub epsilon: f32,
    pub gravity_enabled: bool,
    /// Gravity force added to every node when enabled
    pub gravity: Vec3,
    pub recenter: RecenterMode,
    /// Fraction of the recentering offset applied each step, in [0, 1]
    pub recenter_smoothing: f32,
    /// Subtract the mean velocity after each step
    pub remove_drift: bool,
    pub repulsion_mode: RepulsionMode,
    /// Spatial index settings used by Barnes-Hut
    pub octree: OctreeConfig,
    /// Lower the speed limit as the layout runs; `None` keeps it fixed
    pub cooling: Option<SpeedCooling>,
    /// Divide `repulsion` by `ln(N)` for `N` live nodes
    pub scale_repulsion_by_count: bool,
    /// Edge length of the origin-centered cube used by `reset_positions`
    pub reset_extent: f32,
    /// Seed for the coincidence jitter and position resets; `None` seeds
    /// from the OS
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            spring: DEFAULT_SPRING,
            repulsion: DEFAULT_REPULSION,
            damping: DEFAULT_DAMPING,
            temporal_smoothing: DEFAULT_TEMPORAL_SMOOTHING,
            max_speed: DEFAULT_MAX_SPEED,
            max_time_step: DEFAULT_MAX_TIME_STEP,
            theta: DEFAULT_THETA,
            epsilon: DEFAULT_EPSILON,
            gravity_enabled: false,
            gravity: DEFAULT_GRAVITY,
            recenter: RecenterMode::Mean,
            recenter_smoothing: DEFAULT_RECENTER_SMOOTHING,
            remove_drift: true,
            repulsion_mode: RepulsionMode::BarnesHut,
            octree: OctreeConfig::default(),
            cooling: None,
            scale_repulsion_by_count: false,
            reset_extent: DEFAULT_RESET_EXTENT,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn with_spring(mut self, spring: f32) -> Self {
        self.spring = spring;
        self
    }

    pub fn with_repulsion(mut self, repulsion: f32) -> Self {
        self.repulsion = repulsion;
        self
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_temporal_smoothing(mut self, smoothing: f32) -> Self {
        self.temporal_smoothing = smoothing;
        self
    }

    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.max_speed = max_speed;
        self
    }

    pub fn with_max_time_step(mut self, max_time_step: f32) -> Self {
        self.max_time_step = max_time_step;
        self
    }

    pub fn with_theta(mut self, theta: f32) -> Self {
        self.theta = theta;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Enable gravity with the given force vector
    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity_enabled = true;
        self.gravity = gravity;
        self
    }

    pub fn with_recenter(mut self, recenter: RecenterMode) -> Self {
        self.recenter = recenter;
        self
    }

    pub fn with_recenter_smoothing(mut self, smoothing: f32) -> Self {
        self.recenter_smoothing = smoothing;
        self
    }

    pub fn with_remove_drift(mut self, remove_drift: bool) -> Self {
        self.remove_drift = remove_drift;
        self
    }

    pub fn with_repulsion_mode(mut self, mode: RepulsionMode) -> Self {
        self.repulsion_mode = mode;
        self
    }

    pub fn with_octree(mut self, octree: OctreeConfig) -> Self {
        self.octree = octree;
        self
    }

    pub fn with_cooling(mut self, cooling: SpeedCooling) -> Self {
        self.cooling = Some(cooling);
        self
    }

    pub fn with_scale_repulsion_by_count(mut self, scale: bool) -> Self {
        self.scale_repulsion_by_count = scale;
        self
    }

    pub fn with_reset_extent(mut self, extent: f32) -> Self {
        self.reset_extent = extent;
        self
    }

    /// Repulsion multiplier in effect for `nodes` live nodes
    pub fn repulsion_for(&self, nodes: usize) -> f32 {
        if self.scale_repulsion_by_count && nodes >= 2 {
            self.repulsion / (nodes as f32).ln()
        } else {
            self.repulsion
        }
    }

    /// Speed limit in effect after `run_time` seconds of simulated time
    pub fn speed_limit(&self, run_time: f32) -> f32 {
        match self.cooling {
            Some(cooling) => cooling.limit(run_time).min(self.max_speed),
            None => self.max_speed,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject knobs that would make the integrator diverge or divide by zero
    pub fn validate(&self) -> LayoutResult<()> {
        let non_negative = [
            ("spring", self.spring),
            ("repulsion", self.repulsion),
            ("temporal_smoothing", self.temporal_smoothing),
            ("max_time_step", self.max_time_step),
            ("theta", self.theta),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{name} must be finite and >= 0, got {value}")));
            }
        }

        if !self.max_speed.is_finite() || self.max_speed <= 0.0 {
            return Err(invalid(format!(
                "max_speed must be finite and > 0, got {}",
                self.max_speed
            )));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(invalid(format!(
                "epsilon must be finite and > 0, got {}",
                self.epsilon
            )));
        }
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(invalid(format!(
                "damping must lie in (0, 1], got {}",
                self.damping
            )));
        }
        if !(0.0..=1.0).contains(&self.recenter_smoothing) {
            return Err(invalid(format!(
                "recenter_smoothing must lie in [0, 1], got {}",
                self.recenter_smoothing
            )));
        }
        if !self.reset_extent.is_finite() || self.reset_extent <= 0.0 {
            return Err(invalid(format!(
                "reset_extent must be finite and > 0, got {}",
                self.reset_extent
            )));
        }
        if let Some(cooling) = self.cooling {
            if !cooling.scale.is_finite() || cooling.scale < 0.0 {
                return Err(invalid(format!(
                    "cooling scale must be finite and >= 0, got {}",
                    cooling.scale
                )));
            }
            if !cooling.floor.is_finite() || cooling.floor <= 0.0 {
                return Err(invalid(format!(
                    "cooling floor must be finite and > 0, got {}",
                    cooling.floor
                )));
            }
        }
        if !self.gravity.is_finite() {
            return Err(invalid(format!("gravity must be finite, got {}", self.gravity)));
        }
        if !self.octree.bounds.is_valid() {
            return Err(invalid("octree bounds must have positive extent".to_string()));
        }
        if self.octree.max_elements_per_leaf == 0 {
            return Err(invalid("octree max_elements_per_leaf must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> LayoutError {
    LayoutError::InvalidConfig(message)
}

/// Diagnostics for one simulation step.
///
/// None of these feed back into the layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StepStats {
    /// Steps taken so far, including this one
    pub frame: u64,
    /// Time delta actually integrated, after capping
    pub dt: f32,
    /// Live nodes that took part
    pub nodes: usize,
    /// Nodes whose speed was clamped
    pub speeding: usize,
    /// Pairwise repulsion evaluations (element or aggregate)
    pub repulsion_evaluations: usize,
    /// Evaluations that fell under the coincidence floor
    pub jitters: usize,
    /// Octants accepted as a single pseudo-element
    pub approximations: usize,
    /// Leaves compared element by element
    pub leaf_scans: usize,
    /// Internal octants descended into
    pub descents: usize,
    /// Elements that changed leaf while reconciling the index
    pub elements_moved: usize,
    /// Mean magnitude of the total force per node
    pub mean_force: f32,
    /// Speed limit applied this step
    pub max_speed: f32,
    /// Repulsion multiplier applied this step
    pub repulsion: f32,
}
