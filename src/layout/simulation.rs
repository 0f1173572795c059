//! Force-directed layout simulator
//!
//! One step:
//!
//! 1. Snapshot every live node and bring the repulsion strategy up to date
//!    (for Barnes-Hut: index membership, then reconciliation).
//! 2. Sum gravity, springs and repulsion for every node against that
//!    snapshot.
//! 3. Integrate all nodes: `Δv = Δt · smoothing / mass · F`, clamp speed,
//!    damp, move.
//! 4. Remove drift and recenter.
//!
//! Optionally the speed limit cools with simulated run time and repulsion is
//! divided by `ln(N)` so larger graphs do not fly apart.
//!
//! Forces for every node are computed before any node moves, so the result
//! does not depend on node order.

use std::time::Instant;

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::error::{LayoutError, LayoutResult};
use crate::graph::{GraphModel, Node, NodeId};
use crate::math::PointMass;
use crate::octree::Octree;

use super::forces::ForceModel;
use super::repulsion::{AllPairs, BarnesHut, Body, Repulsion};
use super::types::{RecenterMode, RepulsionMode, SimulationConfig, StepStats};

/// Steps a [`GraphModel`] toward a force-balanced layout
pub struct Simulator {
    config: SimulationConfig,
    forces: ForceModel,
    repulsion: Box<dyn Repulsion>,
    rng: StdRng,
    last_tick: Option<Instant>,
    frame: u64,
    run_time: f32,
    stats: StepStats,
    bodies: Vec<Body>,
    totals: Vec<Vec3>,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> LayoutResult<Self> {
        config.validate()?;

        let repulsion: Box<dyn Repulsion> = match config.repulsion_mode {
            RepulsionMode::AllPairs => Box::new(AllPairs::new()),
            RepulsionMode::BarnesHut => Box::new(BarnesHut::new(config.octree, config.theta)?),
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            forces: ForceModel::from_config(&config),
            config,
            repulsion,
            rng,
            last_tick: None,
            frame: 0,
            run_time: 0.0,
            stats: StepStats::default(),
            bodies: Vec::new(),
            totals: Vec::new(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn forces(&self) -> &ForceModel {
        &self.forces
    }

    /// Diagnostics of the most recent step
    pub fn stats(&self) -> StepStats {
        self.stats
    }

    /// Steps taken so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Simulated seconds since construction or the last position reset
    pub fn run_time(&self) -> f32 {
        self.run_time
    }

    /// Octree behind Barnes-Hut repulsion, `None` in all-pairs mode
    pub fn index(&self) -> Option<&Octree<NodeId>> {
        self.repulsion.index()
    }

    /// Forget the previous tick time; the next `tick` only synchronises
    pub fn reset_clock(&mut self) {
        self.last_tick = None;
    }

    /// Scatter every live node uniformly over the reset cube and give it a
    /// small random velocity.
    ///
    /// Positions are clamped into the octree bounds. The cooling schedule
    /// restarts from zero run time.
    pub fn reset_positions<G>(&mut self, graph: &mut G) -> LayoutResult<()>
    where
        G: GraphModel + ?Sized,
    {
        let half = self.config.reset_extent * 0.5;
        let bounds = self.config.octree.bounds;

        let mut count = 0;
        for id in graph.node_ids() {
            let node = lookup_mut(graph, id)?;
            if node.deleted {
                continue;
            }
            node.position = bounds.clamp(random_vector(&mut self.rng, half));
            node.velocity = random_vector(&mut self.rng, 0.5);
            count += 1;
        }
        self.run_time = 0.0;

        debug!(nodes = count, extent = self.config.reset_extent, "reset node positions");
        Ok(())
    }

    /// Point gravity opposite the renderer's `up` vector, keeping its strength.
    ///
    /// A zero or non-finite `up` leaves gravity unchanged.
    pub fn set_gravity_direction(&mut self, up: Vec3) {
        let Some(up) = up.try_normalize() else {
            warn!(%up, "ignoring degenerate up vector for gravity");
            return;
        };
        self.config.gravity = -up * self.config.gravity.length();
        self.forces
            .set_gravity(self.config.gravity_enabled.then_some(self.config.gravity));
    }

    /// Step using the wall-clock time since the previous tick.
    ///
    /// The first tick (and the first after [`Simulator::reset_clock`]) sees
    /// zero elapsed time.
    pub fn tick<G>(&mut self, graph: &mut G) -> LayoutResult<StepStats>
    where
        G: GraphModel + ?Sized,
    {
        let now = Instant::now();
        let elapsed = self
            .last_tick
            .replace(now)
            .map_or(0.0, |last| now.duration_since(last).as_secs_f32());
        self.step(graph, elapsed)
    }

    /// Advance the layout by `dt` seconds.
    ///
    /// `dt` is capped at `max_time_step`; negative or NaN deltas count as
    /// zero. A zero delta synchronises the index and moves nothing.
    pub fn step<G>(&mut self, graph: &mut G, dt: f32) -> LayoutResult<StepStats>
    where
        G: GraphModel + ?Sized,
    {
        let dt = self.cap_time_step(dt);

        self.snapshot(graph)?;
        let elements_moved = self.repulsion.prepare(&self.bodies)?;

        self.frame += 1;
        let mut stats = StepStats {
            frame: self.frame,
            dt,
            nodes: self.bodies.len(),
            elements_moved,
            ..StepStats::default()
        };

        stats.repulsion = self.config.repulsion_for(stats.nodes);
        self.forces.set_repulsion_strength(stats.repulsion);
        self.run_time += dt;
        stats.max_speed = self.config.speed_limit(self.run_time);

        if dt > 0.0 {
            self.accumulate(graph, &mut stats)?;
            self.integrate(graph, dt, &mut stats)?;
            self.stabilize(graph)?;
        }

        debug!(
            frame = stats.frame,
            dt = stats.dt,
            nodes = stats.nodes,
            speeding = stats.speeding,
            evaluations = stats.repulsion_evaluations,
            approximations = stats.approximations,
            jitters = stats.jitters,
            moved = stats.elements_moved,
            mean_force = stats.mean_force,
            max_speed = stats.max_speed,
            "layout step"
        );
        self.stats = stats;
        Ok(stats)
    }

    fn cap_time_step(&self, dt: f32) -> f32 {
        if dt.is_nan() || dt <= 0.0 {
            return 0.0;
        }
        if dt > self.config.max_time_step {
            warn!(
                requested = dt,
                cap = self.config.max_time_step,
                "clamping long time step"
            );
            return self.config.max_time_step;
        }
        dt
    }

    /// Capture id, position and weight of every live node
    fn snapshot<G>(&mut self, graph: &G) -> LayoutResult<()>
    where
        G: GraphModel + ?Sized,
    {
        self.bodies.clear();
        for id in graph.node_ids() {
            let node = lookup(graph, id)?;
            if node.deleted {
                continue;
            }
            if !(node.weight.is_finite() && node.weight > 0.0) {
                return Err(LayoutError::InvalidWeight(node.weight));
            }
            if !node.position.is_finite() {
                let bounds = self.config.octree.bounds;
                return Err(LayoutError::OutOfBounds {
                    position: node.position,
                    min: bounds.min,
                    max: bounds.max,
                });
            }
            self.bodies.push(Body {
                id,
                mass: PointMass::new(node.position, node.weight),
            });
        }
        Ok(())
    }

    /// Total force on every body, in snapshot order
    fn accumulate<G>(&mut self, graph: &G, stats: &mut StepStats) -> LayoutResult<()>
    where
        G: GraphModel + ?Sized,
    {
        let gravity = self.forces.gravity();
        self.totals.clear();

        let mut magnitude = 0.0;
        for (index, body) in self.bodies.iter().enumerate() {
            let node = lookup(graph, body.id)?;
            let mut total = gravity;

            for link in &node.links {
                if link.to == body.id {
                    continue;
                }
                let neighbour = lookup(graph, link.to)?;
                if neighbour.deleted {
                    continue;
                }
                total += self
                    .forces
                    .attraction(body.mass.position, neighbour.position);
            }

            total += self
                .repulsion
                .force_on(index, &self.forces, &mut self.rng, stats);

            magnitude += total.length();
            self.totals.push(total);
        }

        if !self.bodies.is_empty() {
            stats.mean_force = magnitude / self.bodies.len() as f32;
        }
        Ok(())
    }

    fn integrate<G>(&mut self, graph: &mut G, dt: f32, stats: &mut StepStats) -> LayoutResult<()>
    where
        G: GraphModel + ?Sized,
    {
        let damping = self.config.damping.powf(dt);
        let max_speed = stats.max_speed;

        for (body, force) in self.bodies.iter().zip(&self.totals) {
            let node = lookup_mut(graph, body.id)?;

            let mut velocity =
                node.velocity + *force * (dt * self.config.temporal_smoothing / body.mass.weight);
            let speed = velocity.length();
            if speed > max_speed {
                stats.speeding += 1;
                velocity *= max_speed / speed;
            }
            velocity *= damping;

            node.velocity = velocity;
            node.position += velocity * dt;
        }
        Ok(())
    }

    /// Drift removal and recentering
    fn stabilize<G>(&self, graph: &mut G) -> LayoutResult<()>
    where
        G: GraphModel + ?Sized,
    {
        if self.bodies.is_empty() {
            return Ok(());
        }
        let count = self.bodies.len() as f32;

        if self.config.remove_drift {
            let mut drift = Vec3::ZERO;
            for body in &self.bodies {
                drift += lookup(graph, body.id)?.velocity;
            }
            drift /= count;
            for body in &self.bodies {
                lookup_mut(graph, body.id)?.velocity -= drift;
            }
        }

        let center = match self.config.recenter {
            RecenterMode::Disabled => None,
            RecenterMode::Mean => {
                let mut sum = Vec3::ZERO;
                for body in &self.bodies {
                    sum += lookup(graph, body.id)?.position;
                }
                Some(sum / count)
            }
            RecenterMode::Anchor(anchor) => match graph.node(anchor) {
                Some(node) if !node.deleted => Some(node.position),
                _ => {
                    warn!(%anchor, "recentering anchor is missing; skipping recenter");
                    None
                }
            },
        };

        if let Some(center) = center {
            let offset = center * self.config.recenter_smoothing;
            for body in &self.bodies {
                lookup_mut(graph, body.id)?.position -= offset;
            }
        }
        Ok(())
    }
}

/// Uniform sample from the cube `[-half, half)³`
fn random_vector<R>(rng: &mut R, half: f32) -> Vec3
where
    R: Rng + ?Sized,
{
    Vec3::new(
        rng.random_range(-half..half),
        rng.random_range(-half..half),
        rng.random_range(-half..half),
    )
}

fn lookup<G>(graph: &G, id: NodeId) -> LayoutResult<&Node>
where
    G: GraphModel + ?Sized,
{
    graph
        .node(id)
        .ok_or_else(|| LayoutError::ElementNotFound(id.to_string()))
}

fn lookup_mut<G>(graph: &mut G, id: NodeId) -> LayoutResult<&mut Node>
where
    G: GraphModel + ?Sized,
{
    graph
        .node_mut(id)
        .ok_or_else(|| LayoutError::ElementNotFound(id.to_string()))
}
