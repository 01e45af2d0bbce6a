//! Simulated robot run: circular trajectory, a ring of point landmarks and a
//! relative-position sensor with Gaussian noise.

use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::config::SimulationConfig;
use crate::error::{EkfError, Result};

/// Position on a circle of `radius` at `time`.
pub fn circular_motion(time: f64, radius: f64, angular_velocity: f64) -> Vector2<f64> {
    let phase = time * angular_velocity;
    Vector2::new(radius * phase.cos(), radius * phase.sin())
}

/// Velocity on a circle of `radius` at `time`.
pub fn circular_motion_vel(time: f64, radius: f64, angular_velocity: f64) -> Vector2<f64> {
    let phase = time * angular_velocity;
    Vector2::new(
        -radius * angular_velocity * phase.sin(),
        radius * angular_velocity * phase.cos(),
    )
}

/// `count` landmarks evenly spread on a circle.
pub fn landmark_ring(count: usize, radius: f64) -> Vec<Vector2<f64>> {
    (0..count)
        .map(|i| {
            let angle = std::f64::consts::TAU * i as f64 / count as f64;
            Vector2::new(radius * angle.cos(), radius * angle.sin())
        })
        .collect()
}

/// Adds zero-mean Gaussian noise to both components.
pub fn add_noise(
    state: Vector2<f64>,
    noise: &Normal<f64>,
    rng: &mut StdRng,
) -> Vector2<f64> {
    state + Vector2::new(noise.sample(rng), noise.sample(rng))
}

/// One landmark sighting.
#[derive(Clone, Copy, Debug)]
pub struct Sighting {
    pub landmark: usize,
    /// Landmark position relative to the sensor
    pub measured: Vector2<f64>,
}

/// Everything produced by one simulated time step.
#[derive(Clone, Debug)]
pub struct Step {
    pub time: f64,
    /// Ground truth at the start of the step
    pub true_position: Vector2<f64>,
    /// Noisy velocity to apply over the step
    pub odometry: Vector2<f64>,
    pub sightings: Vec<Sighting>,
}

/// Ground truth and noise generator for a planar run.
pub struct Simulation {
    config: SimulationConfig,
    angular_velocity: f64,
    landmarks: Vec<Vector2<f64>>,
    sensor_offset: Vector2<f64>,
    velocity_noise: Normal<f64>,
    observation_noise: Normal<f64>,
    rng: StdRng,
}

impl Simulation {
    pub fn new(config: SimulationConfig, sensor_offset: Vector2<f64>) -> Result<Self> {
        let velocity_noise = Normal::new(0.0, config.velocity_sigma)
            .map_err(|e| EkfError::Config(format!("velocity_sigma: {e}")))?;
        let observation_noise = Normal::new(0.0, config.observation_sigma)
            .map_err(|e| EkfError::Config(format!("observation_sigma: {e}")))?;
        let duration = config.steps.max(1) as f64 * config.delta_time;
        Ok(Self {
            angular_velocity: std::f64::consts::TAU / duration,
            landmarks: landmark_ring(config.landmarks, config.landmark_radius),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            sensor_offset,
            velocity_noise,
            observation_noise,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn landmarks(&self) -> &[Vector2<f64>] {
        &self.landmarks
    }

    pub fn sensor_offset(&self) -> Vector2<f64> {
        self.sensor_offset
    }

    pub fn true_position(&self, time: f64) -> Vector2<f64> {
        circular_motion(time, self.config.trajectory_radius, self.angular_velocity)
    }

    /// Simulates step `k`: sightings from the current position, then the
    /// odometry that moves the robot to the next one.
    pub fn step(&mut self, k: usize) -> Step {
        let dt = self.config.delta_time;
        let time = k as f64 * dt;
        let position = self.true_position(time);
        let sensor = position + self.sensor_offset;

        let mut sightings = Vec::new();
        for (landmark, l) in self.landmarks.iter().enumerate() {
            if (l - position).norm() <= self.config.sensor_range {
                let measured = add_noise(l - sensor, &self.observation_noise, &mut self.rng);
                sightings.push(Sighting { landmark, measured });
            }
        }

        let velocity = (self.true_position(time + dt) - position) / dt;
        let odometry = add_noise(velocity, &self.velocity_noise, &mut self.rng);

        Step {
            time,
            true_position: position,
            odometry,
            sightings,
        }
    }
}
