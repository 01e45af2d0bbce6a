//! Sparse Extended Kalman Filter for real-time SLAM.
//!
//! One shared mean/covariance over robot, sensor and landmark blocks, updated
//! in place. Each operation is restricted to the coordinates it names through
//! [`IndexSet`]s, so its cost depends on the blocks involved and not on the
//! size of the map.

pub mod config;
pub mod engine;
pub mod error;
pub mod index_set;
pub mod innovation;
pub mod kernel;
pub mod planar;
pub mod plot;
pub mod pose;
pub mod reference;
pub mod simulation;
pub mod state;

pub use config::{Config, EkfConfig, SimulationConfig};
pub use engine::{KalmanGain, SparseEkf};
pub use error::{EkfError, Result};
pub use index_set::IndexSet;
pub use innovation::Innovation;
pub use kernel::{partitioned_update, KernelStats};
pub use plot::plot;
pub use pose::{Gaussian, PoseStorage, Sensor};
pub use state::{BlockId, BlockStatus, StateBlock, StateEstimate};
