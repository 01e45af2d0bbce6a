//! Planar SLAM on top of the sparse filter.
//!
//! The robot state is a 2-D position driven by velocity odometry. A sensor
//! mounted at an offset measures landmark positions relative to itself.
//! Landmarks are first mapped in anchored form (anchor = robot position at
//! first sighting, plus an offset), which keeps the initialization linear in
//! the sensor noise, and are converted to a plain position once they have been
//! corrected a few times.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector, Vector2};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::SparseEkf;
use crate::error::{EkfError, Result};
use crate::index_set::IndexSet;
use crate::innovation::Innovation;
use crate::pose::{Gaussian, Sensor};
use crate::state::BlockId;

/// Representation of a mapped landmark.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LandmarkForm {
    /// `[anchor, offset]`, position = anchor + offset
    Anchored,
    /// `[position]`
    Euclidean,
}

#[derive(Clone, Copy, Debug)]
struct MappedLandmark {
    block: BlockId,
    form: LandmarkForm,
    corrections: usize,
}

/// What happened to one observation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    /// New landmark added to the map
    Initialized,
    /// Landmark already mapped, state corrected
    Corrected,
    /// Innovation outside the Mahalanobis gate, observation dropped
    Gated { distance_squared: f64 },
    /// Innovation covariance not invertible, observation dropped
    Rejected,
}

/// Counters over a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MappingStats {
    pub initialized: usize,
    pub corrected: usize,
    pub gated: usize,
    pub rejected: usize,
    pub reparametrized: usize,
}

/// Robot, sensor and landmark map sharing one sparse filter.
pub struct PlanarSlam {
    ekf: SparseEkf,
    robot: BlockId,
    sensor: Sensor,
    landmarks: BTreeMap<usize, MappedLandmark>,
    velocity_cov: DMatrix<f64>,
    observation_cov: DMatrix<f64>,
    anchored_corrections: usize,
    stats: MappingStats,
}

fn to_dvector(v: &Vector2<f64>) -> DVector<f64> {
    DVector::from_column_slice(v.as_slice())
}

fn to_vector2(v: &DVector<f64>) -> Vector2<f64> {
    Vector2::new(v[0], v[1])
}

fn identity_at(m: &mut DMatrix<f64>, row: usize, col: usize, scale: f64) {
    for i in 0..2 {
        m[(row + i, col + i)] = scale;
    }
}

impl PlanarSlam {
    /// Starts a map with the robot at `initial_position` (known exactly) and a
    /// sensor with mounting offset `mount`.
    ///
    /// `config.simulation.filtered_sensor` decides whether the mounting offset
    /// is estimated with the map or kept as private, fixed uncertainty.
    pub fn new(config: &Config, initial_position: Vector2<f64>, mount: Gaussian) -> Result<Self> {
        let mut ekf = SparseEkf::new(config.filter.clone());
        let robot = ekf.state_mut().insert_independent_block(
            "robot",
            &to_dvector(&initial_position),
            &DMatrix::zeros(2, 2),
        )?;
        let sensor = if config.simulation.filtered_sensor {
            Sensor::filtered("sensor", robot, &mount, ekf.state_mut())?
        } else {
            Sensor::unfiltered("sensor", robot, mount)
        };
        let sim = &config.simulation;
        Ok(Self {
            ekf,
            robot,
            sensor,
            landmarks: BTreeMap::new(),
            velocity_cov: DMatrix::identity(2, 2) * sim.velocity_sigma.powi(2),
            observation_cov: DMatrix::identity(2, 2) * sim.observation_sigma.powi(2),
            anchored_corrections: sim.anchored_corrections,
            stats: MappingStats::default(),
        })
    }

    pub fn ekf(&self) -> &SparseEkf {
        &self.ekf
    }

    pub fn sensor(&self) -> &Sensor {
        &self.sensor
    }

    pub fn stats(&self) -> MappingStats {
        self.stats
    }

    pub fn robot_position(&self) -> Result<Vector2<f64>> {
        Ok(to_vector2(&self.ekf.state().block_mean(self.robot)?))
    }

    /// Trace of the robot position covariance.
    pub fn robot_uncertainty(&self) -> Result<f64> {
        Ok(self.ekf.state().trace_of(self.ekf.state().indices(self.robot)?))
    }

    pub fn sensor_offset(&self) -> Result<Vector2<f64>> {
        Ok(to_vector2(&self.sensor.pose.mean(self.ekf.state())?))
    }

    pub fn landmark_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.landmarks.keys().copied()
    }

    pub fn landmark_form(&self, id: usize) -> Option<LandmarkForm> {
        self.landmarks.get(&id).map(|l| l.form)
    }

    /// Estimated position of a mapped landmark.
    pub fn landmark_position(&self, id: usize) -> Result<Option<Vector2<f64>>> {
        match self.landmarks.get(&id) {
            Some(l) => Ok(Some(self.position_of(l)?)),
            None => Ok(None),
        }
    }

    /// Covariance trace of a mapped landmark's coordinates.
    pub fn landmark_uncertainty(&self, id: usize) -> Result<Option<f64>> {
        match self.landmarks.get(&id) {
            Some(l) => {
                let indices = self.ekf.state().indices(l.block)?;
                Ok(Some(self.ekf.state().trace_of(indices)))
            }
            None => Ok(None),
        }
    }

    fn position_of(&self, l: &MappedLandmark) -> Result<Vector2<f64>> {
        let mean = self.ekf.state().block_mean(l.block)?;
        Ok(match l.form {
            LandmarkForm::Anchored => Vector2::new(mean[0] + mean[2], mean[1] + mean[3]),
            LandmarkForm::Euclidean => to_vector2(&mean),
        })
    }

    /// Moves the robot by `velocity · dt`.
    pub fn predict(&mut self, velocity: Vector2<f64>, dt: f64) -> Result<()> {
        let ia_robot = self.ekf.state().indices(self.robot)?.clone();
        let ia_x = self.ekf.state().filtered_indices();
        let f_u = DMatrix::identity(2, 2) * dt;
        self.ekf.predict_with_control(
            &ia_x,
            &DMatrix::identity(2, 2),
            &ia_robot,
            &f_u,
            &self.velocity_cov,
        )?;
        let x = self.ekf.state_mut().mean_mut();
        for (k, i) in ia_robot.iter().enumerate() {
            x[i] += velocity[k] * dt;
        }
        Ok(())
    }

    /// Processes one sighting of landmark `id` measured relative to the sensor.
    pub fn observe(&mut self, id: usize, measured: Vector2<f64>) -> Result<Outcome> {
        match self.landmarks.get(&id).copied() {
            None => self.initialize_landmark(id, measured),
            Some(landmark) => self.correct_landmark(id, landmark, measured),
        }
    }

    fn initialize_landmark(&mut self, id: usize, measured: Vector2<f64>) -> Result<Outcome> {
        let state = self.ekf.state();
        let ia_rs = self.sensor.mapped_indices(state)?;
        let anchor = self.robot_position()?;
        let offset = self.sensor_offset()? + measured;

        let block = self
            .ekf
            .state_mut()
            .allocate_block(format!("landmark {id}"), 4)?;
        let ia_l = self.ekf.state().indices(block)?.clone();
        let mean = DVector::from_column_slice(&[anchor.x, anchor.y, offset.x, offset.y]);
        self.ekf.state_mut().set_block_mean(block, &mean)?;

        // anchor copies the robot, offset follows the sensor (when filtered) and the measurement
        let mut g_v = DMatrix::zeros(4, ia_rs.len());
        identity_at(&mut g_v, 0, 0, 1.0);
        if self.sensor.pose.is_filtered() {
            identity_at(&mut g_v, 2, 2, 1.0);
        }
        let mut g_y = DMatrix::zeros(4, 2);
        identity_at(&mut g_y, 2, 0, 1.0);

        let ia_x = IndexSet::union(&self.ekf.state().filtered_indices(), &ia_l);
        let result = match self.sensor.pose.private_covariance() {
            Some(n) => self.ekf.initialize_with_perturbation(
                &ia_x,
                &g_v,
                &ia_rs,
                &ia_l,
                &g_y,
                &self.observation_cov,
                &g_y,
                n,
            ),
            None => self
                .ekf
                .initialize(&ia_x, &g_v, &ia_rs, &ia_l, &g_y, &self.observation_cov),
        };
        if let Err(e) = result {
            self.ekf.state_mut().release_block(block)?;
            return Err(e);
        }

        self.landmarks.insert(
            id,
            MappedLandmark {
                block,
                form: LandmarkForm::Anchored,
                corrections: 0,
            },
        );
        self.stats.initialized += 1;
        debug!(landmark = id, coordinates = %ia_l, "landmark initialized");
        Ok(Outcome::Initialized)
    }

    fn correct_landmark(
        &mut self,
        id: usize,
        mut landmark: MappedLandmark,
        measured: Vector2<f64>,
    ) -> Result<Outcome> {
        let state = self.ekf.state();
        let ia_rs = self.sensor.mapped_indices(state)?;
        let ia_l = state.indices(landmark.block)?.clone();
        let ia_rsl = IndexSet::union(&ia_rs, &ia_l);

        let expected = self.position_of(&landmark)? - self.robot_position()? - self.sensor_offset()?;

        let mut h = DMatrix::zeros(2, ia_rsl.len());
        identity_at(&mut h, 0, 0, -1.0);
        if self.sensor.pose.is_filtered() {
            identity_at(&mut h, 0, 2, -1.0);
        }
        for block in 0..ia_l.len() / 2 {
            identity_at(&mut h, 0, ia_rs.len() + 2 * block, 1.0);
        }

        let expectation_cov = self.ekf.expectation_covariance(&ia_rsl, &h)?;
        let mut measurement_cov = self.observation_cov.clone();
        if let Some(n) = self.sensor.pose.private_covariance() {
            measurement_cov += n;
        }
        let mut inn = Innovation::from_expectation(
            &to_dvector(&expected),
            &expectation_cov,
            &to_dvector(&measured),
            &measurement_cov,
        )?;

        match inn.mahalanobis_squared() {
            Ok(d2) if d2 > self.ekf.config().mahalanobis_gate => {
                self.stats.gated += 1;
                debug!(landmark = id, d2, "observation outside gate");
                return Ok(Outcome::Gated { distance_squared: d2 });
            }
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                self.stats.rejected += 1;
                return Ok(Outcome::Rejected);
            }
            Err(e) => return Err(e),
        }

        let ia_x = self.ekf.state().filtered_indices();
        match self.ekf.correct(&ia_x, &mut inn, &h, &ia_rsl) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                self.stats.rejected += 1;
                return Ok(Outcome::Rejected);
            }
            Err(e) => return Err(e),
        }
        self.stats.corrected += 1;

        landmark.corrections += 1;
        self.landmarks.insert(id, landmark);
        // the correction is already applied; a failed conversion keeps the anchored form
        if landmark.form == LandmarkForm::Anchored
            && landmark.corrections >= self.anchored_corrections
        {
            if let Err(e) = self.reparametrize_landmark(id) {
                warn!(landmark = id, "landmark stays anchored: {e}");
            }
        }
        Ok(Outcome::Corrected)
    }

    /// Converts an anchored landmark to a plain position in fresh coordinates
    /// and frees the old ones.
    ///
    /// Needs two free coordinates while both forms coexist. On error the
    /// landmark and the state are left as they were.
    pub fn reparametrize_landmark(&mut self, id: usize) -> Result<()> {
        let mut landmark = *self
            .landmarks
            .get(&id)
            .ok_or(EkfError::UnknownLandmark(id))?;
        if landmark.form == LandmarkForm::Euclidean {
            return Ok(());
        }
        let ia_old = self.ekf.state().indices(landmark.block)?.clone();
        let position = self.position_of(&landmark)?;

        let block = self
            .ekf
            .state_mut()
            .allocate_block(format!("landmark {id}"), 2)?;
        let ia_new = self.ekf.state().indices(block)?.clone();
        self.ekf
            .state_mut()
            .set_block_mean(block, &to_dvector(&position))?;

        let mut j = DMatrix::zeros(2, 4);
        identity_at(&mut j, 0, 0, 1.0);
        identity_at(&mut j, 0, 2, 1.0);
        let ia_x = IndexSet::union(&self.ekf.state().filtered_indices(), &ia_new);
        if let Err(e) = self.ekf.reparametrize(&ia_x, &j, &ia_old, &ia_new) {
            self.ekf.state_mut().release_block(block)?;
            return Err(e);
        }
        self.ekf.commit_reserved(&ia_new);
        self.ekf.state_mut().release_block(landmark.block)?;

        landmark.block = block;
        landmark.form = LandmarkForm::Euclidean;
        self.landmarks.insert(id, landmark);
        self.stats.reparametrized += 1;
        info!(landmark = id, from = %ia_old, to = %ia_new, "landmark reparametrized");
        Ok(())
    }
}
