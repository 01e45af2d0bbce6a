//! Configuration loading

use crate::error::{EkfError, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub filter: EkfConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Filter settings
#[derive(Clone, Debug, Deserialize)]
pub struct EkfConfig {
    /// Number of coordinates in the shared state (default: 64)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Largest tolerated |P − Pᵗ| entry in a correction term (default: 1e-9)
    #[serde(default = "default_symmetry_tolerance")]
    pub symmetry_tolerance: f64,

    /// Squared Mahalanobis gate for accepting an observation (default: 13.8, χ²₂ at 99.9%)
    #[serde(default = "default_mahalanobis_gate")]
    pub mahalanobis_gate: f64,
}

/// Simulated run used by the demo binary
#[derive(Clone, Debug, Deserialize)]
pub struct SimulationConfig {
    /// Number of time steps (default: 200)
    #[serde(default = "default_steps")]
    pub steps: usize,

    /// Time step in seconds (default: 0.1)
    #[serde(default = "default_delta_time")]
    pub delta_time: f64,

    /// Number of landmarks on the ring (default: 8)
    #[serde(default = "default_landmarks")]
    pub landmarks: usize,

    /// Landmark ring radius in meters (default: 3.0)
    #[serde(default = "default_landmark_radius")]
    pub landmark_radius: f64,

    /// Robot circle radius in meters (default: 1.5)
    #[serde(default = "default_trajectory_radius")]
    pub trajectory_radius: f64,

    /// Odometry velocity noise standard deviation (default: 0.05)
    #[serde(default = "default_velocity_sigma")]
    pub velocity_sigma: f64,

    /// Observation noise standard deviation (default: 0.05)
    #[serde(default = "default_observation_sigma")]
    pub observation_sigma: f64,

    /// Sensor range in meters (default: 2.5)
    #[serde(default = "default_sensor_range")]
    pub sensor_range: f64,

    /// Keep the sensor mounting offset in the filter (default: false)
    #[serde(default)]
    pub filtered_sensor: bool,

    /// Corrections a landmark receives in anchored form before it is
    /// reparametrized to a plain position (default: 5)
    #[serde(default = "default_anchored_corrections")]
    pub anchored_corrections: usize,

    /// Random seed (default: 7)
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            symmetry_tolerance: default_symmetry_tolerance(),
            mahalanobis_gate: default_mahalanobis_gate(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            delta_time: default_delta_time(),
            landmarks: default_landmarks(),
            landmark_radius: default_landmark_radius(),
            trajectory_radius: default_trajectory_radius(),
            velocity_sigma: default_velocity_sigma(),
            observation_sigma: default_observation_sigma(),
            sensor_range: default_sensor_range(),
            filtered_sensor: false,
            anchored_corrections: default_anchored_corrections(),
            seed: default_seed(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.filter.symmetry_tolerance <= 0.0 {
            return Err(EkfError::Config(
                "filter.symmetry_tolerance must be positive".to_string(),
            ));
        }
        if self.simulation.delta_time <= 0.0 {
            return Err(EkfError::Config(
                "simulation.delta_time must be positive".to_string(),
            ));
        }
        // anchored landmarks take 4 coordinates, plus 2 while being converted
        let needed = 4 * self.simulation.landmarks + 6;
        if self.filter.capacity < needed {
            return Err(EkfError::Config(format!(
                "filter.capacity {} cannot hold {} landmarks (need {})",
                self.filter.capacity, self.simulation.landmarks, needed
            )));
        }
        Ok(())
    }
}

fn default_capacity() -> usize {
    64
}

fn default_symmetry_tolerance() -> f64 {
    1e-9
}

fn default_mahalanobis_gate() -> f64 {
    13.8
}

fn default_steps() -> usize {
    200
}

fn default_delta_time() -> f64 {
    0.1
}

fn default_landmarks() -> usize {
    8
}

fn default_landmark_radius() -> f64 {
    3.0
}

fn default_trajectory_radius() -> f64 {
    1.5
}

fn default_velocity_sigma() -> f64 {
    0.05
}

fn default_observation_sigma() -> f64 {
    0.05
}

fn default_sensor_range() -> f64 {
    2.5
}

fn default_anchored_corrections() -> usize {
    5
}

fn default_seed() -> u64 {
    7
}
