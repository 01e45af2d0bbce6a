//! Pose storage for robots and sensors.
//!
//! A pose is either kept privately (its own mean and covariance, never
//! correlated with the map) or lives in a block of the shared state. The
//! choice is made when the quantity is created and never changes.

use nalgebra::{DMatrix, DVector};

use crate::error::{EkfError, Result};
use crate::index_set::IndexSet;
use crate::state::{BlockId, StateEstimate};

/// Mean and covariance held outside the filter.
#[derive(Clone, Debug, PartialEq)]
pub struct Gaussian {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

impl Gaussian {
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self> {
        let n = mean.len();
        EkfError::check_shape("gaussian covariance", (n, n), covariance.shape())?;
        Ok(Self { mean, covariance })
    }

    /// Perfectly known value.
    pub fn exact(mean: DVector<f64>) -> Self {
        let n = mean.len();
        Self {
            mean,
            covariance: DMatrix::zeros(n, n),
        }
    }
}

/// Where a pose's uncertainty is tracked.
#[derive(Clone, Debug, PartialEq)]
pub enum PoseStorage {
    /// Private mean/covariance, excluded from joint correlation
    Unfiltered(Gaussian),
    /// Block of the shared state
    Filtered(BlockId),
}

impl PoseStorage {
    pub fn is_filtered(&self) -> bool {
        matches!(self, PoseStorage::Filtered(_))
    }

    pub fn mean(&self, state: &StateEstimate) -> Result<DVector<f64>> {
        match self {
            PoseStorage::Unfiltered(g) => Ok(g.mean.clone()),
            PoseStorage::Filtered(id) => state.block_mean(*id),
        }
    }

    pub fn covariance(&self, state: &StateEstimate) -> Result<DMatrix<f64>> {
        match self {
            PoseStorage::Unfiltered(g) => Ok(g.covariance.clone()),
            PoseStorage::Filtered(id) => state.block_covariance(*id),
        }
    }

    /// Filtered coordinates of the pose; empty when unfiltered.
    pub fn indices(&self, state: &StateEstimate) -> Result<IndexSet> {
        match self {
            PoseStorage::Unfiltered(_) => Ok(IndexSet::empty()),
            PoseStorage::Filtered(id) => Ok(state.indices(*id)?.clone()),
        }
    }

    /// Covariance that must be added as independent noise when the pose is
    /// not in the filter, `None` otherwise.
    pub fn private_covariance(&self) -> Option<&DMatrix<f64>> {
        match self {
            PoseStorage::Unfiltered(g) => Some(&g.covariance),
            PoseStorage::Filtered(_) => None,
        }
    }
}

/// A sensor mounted on a robot.
#[derive(Clone, Debug)]
pub struct Sensor {
    pub name: String,
    /// Owning robot's pose block
    pub robot: BlockId,
    /// Mounting pose relative to the robot
    pub pose: PoseStorage,
}

impl Sensor {
    /// Sensor whose mounting pose is kept outside the filter.
    pub fn unfiltered(name: impl Into<String>, robot: BlockId, pose: Gaussian) -> Self {
        Self {
            name: name.into(),
            robot,
            pose: PoseStorage::Unfiltered(pose),
        }
    }

    /// Sensor whose mounting pose is estimated jointly with the map.
    ///
    /// The pose enters the state uncorrelated with everything else.
    pub fn filtered(
        name: impl Into<String>,
        robot: BlockId,
        pose: &Gaussian,
        state: &mut StateEstimate,
    ) -> Result<Self> {
        let name = name.into();
        let id = state.insert_independent_block(format!("{name}.pose"), &pose.mean, &pose.covariance)?;
        Ok(Self {
            name,
            robot,
            pose: PoseStorage::Filtered(id),
        })
    }

    /// Filtered coordinates an observation by this sensor depends on: the
    /// robot's, followed by the sensor's own when it is filtered.
    pub fn mapped_indices(&self, state: &StateEstimate) -> Result<IndexSet> {
        let robot = state.indices(self.robot)?;
        Ok(IndexSet::union(robot, &self.pose.indices(state)?))
    }
}
