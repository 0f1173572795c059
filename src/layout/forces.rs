//! Pairwise and global force laws
//!
//! All functions here are pure apart from the random direction drawn for
//! near-coincident points.

use std::f32::consts::TAU;

use glam::Vec3;
use rand::Rng;

use crate::math::PointMass;

use super::types::SimulationConfig;

/// Result of one repulsion evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepulsionSample {
    pub force: Vec3,
    /// The points were closer than the coincidence floor and the direction
    /// was drawn at random
    pub jittered: bool,
}

/// Force multipliers shared by every node in a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceModel {
    spring: f32,
    repulsion: f32,
    epsilon: f32,
    gravity: Option<Vec3>,
}

impl ForceModel {
    pub fn new(spring: f32, repulsion: f32, epsilon: f32) -> Self {
        Self {
            spring,
            repulsion,
            epsilon,
            gravity: None,
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.spring, config.repulsion, config.epsilon)
            .with_gravity(config.gravity_enabled.then_some(config.gravity))
    }

    pub fn with_gravity(mut self, gravity: Option<Vec3>) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn set_gravity(&mut self, gravity: Option<Vec3>) {
        self.gravity = gravity;
    }

    /// Current repulsion multiplier
    pub fn repulsion_strength(&self) -> f32 {
        self.repulsion
    }

    pub fn set_repulsion_strength(&mut self, repulsion: f32) {
        self.repulsion = repulsion;
    }

    /// Inverse-square push on `on` away from `from`.
    ///
    /// Magnitude is `repulsion * w_on * w_from / d²`. Closer than `epsilon`
    /// the direction is a uniformly random unit vector and the magnitude is
    /// taken at `d = epsilon`, so coincident points separate instead of
    /// dividing by zero.
    pub fn repulsion<R>(&self, on: PointMass, from: PointMass, rng: &mut R) -> RepulsionSample
    where
        R: Rng + ?Sized,
    {
        let scale = self.repulsion * on.weight * from.weight;
        let offset = on.position - from.position;
        let distance_squared = offset.length_squared();
        let floor = self.epsilon * self.epsilon;

        if distance_squared < floor {
            return RepulsionSample {
                force: random_unit_vector(rng) * (scale / floor),
                jittered: true,
            };
        }

        let distance = distance_squared.sqrt();
        RepulsionSample {
            force: offset * (scale / (distance_squared * distance)),
            jittered: false,
        }
    }

    /// Spring pull on a node at `on` toward a neighbour at `toward`.
    ///
    /// Linear in separation: `spring * (toward - on)`.
    pub fn attraction(&self, on: Vec3, toward: Vec3) -> Vec3 {
        (toward - on) * self.spring
    }

    /// Gravity force, zero when disabled
    pub fn gravity(&self) -> Vec3 {
        self.gravity.unwrap_or(Vec3::ZERO)
    }

    /// Edge length at which spring and repulsion cancel for an isolated pair.
    ///
    /// `None` when there is no spring to balance against.
    pub fn equilibrium_distance(&self, weight_a: f32, weight_b: f32) -> Option<f32> {
        if self.spring <= 0.0 {
            return None;
        }
        Some((self.repulsion * weight_a * weight_b / self.spring).cbrt())
    }
}

/// Uniformly distributed direction on the unit sphere
fn random_unit_vector<R>(rng: &mut R) -> Vec3
where
    R: Rng + ?Sized,
{
    let z: f32 = rng.random_range(-1.0..=1.0);
    let azimuth: f32 = rng.random_range(0.0..TAU);
    let ring = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(ring * azimuth.cos(), ring * azimuth.sin(), z)
}
