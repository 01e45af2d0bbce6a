//! Extended Kalman filter with sparse access governed by index sets.
//!
//! The filter owns one [`StateEstimate`] and mutates it in place. Every
//! operation receives a scope `ia_x` (the coordinates it may touch) and the
//! variant coordinates it transforms; the rest of the scope becomes the
//! invariant set whose correlations are propagated. Coordinates outside the
//! scope are never read or written.
//!
//! All index and shape checks run before the first write, so a failing call
//! leaves the state exactly as it was.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::config::EkfConfig;
use crate::error::{EkfError, Result};
use crate::index_set::IndexSet;
use crate::innovation::Innovation;
use crate::kernel::{partitioned_update, project_jacobian, KernelStats};
use crate::state::{BlockStatus, StateEstimate};

/// Gain of one correction, together with the cross term it was built from.
#[derive(Clone, Debug)]
pub struct KalmanGain {
    /// `K = −PJt · S⁻¹`, |ia_x| × |innovation|
    pub k: DMatrix<f64>,
    /// `PJt = P[ia_x, ia_rsl] · INN_rslᵗ`
    pub pjt: DMatrix<f64>,
}

/// Sparse extended Kalman filter over a shared state estimate.
#[derive(Clone, Debug)]
pub struct SparseEkf {
    state: StateEstimate,
    config: EkfConfig,
    last_stats: KernelStats,
}

impl SparseEkf {
    /// Creates a filter with `config.capacity` zeroed coordinates.
    pub fn new(config: EkfConfig) -> Self {
        Self {
            state: StateEstimate::new(config.capacity),
            config,
            last_stats: KernelStats::default(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(EkfConfig {
            capacity,
            ..EkfConfig::default()
        })
    }

    pub fn state(&self) -> &StateEstimate {
        &self.state
    }

    /// Mutable state access, for writing means and allocating blocks.
    pub fn state_mut(&mut self) -> &mut StateEstimate {
        &mut self.state
    }

    pub fn config(&self) -> &EkfConfig {
        &self.config
    }

    /// Work done by the last successful operation.
    pub fn last_stats(&self) -> KernelStats {
        self.last_stats
    }

    fn check_scope(&self, ia_x: &IndexSet) -> Result<()> {
        ia_x.check_bounds(self.state.capacity())
    }

    /// Covariance prediction with control noise `U` projected through `F_u`.
    ///
    /// `P[ia_v, ia_v] ← F_v·P·F_vᵗ + F_u·U·F_uᵗ`, cross terms with the rest of
    /// `ia_x` ← `P[inv, ia_v]·F_vᵗ`. The mean is propagated by the caller.
    pub fn predict_with_control(
        &mut self,
        ia_x: &IndexSet,
        f_v: &DMatrix<f64>,
        ia_v: &IndexSet,
        f_u: &DMatrix<f64>,
        u: &DMatrix<f64>,
    ) -> Result<()> {
        EkfError::check_shape("F_u", (ia_v.len(), f_u.ncols()), f_u.shape())?;
        let q = project_jacobian("U", u, f_u)?;
        self.predict(ia_x, f_v, ia_v, &q)
    }

    /// Covariance prediction with process noise `Q` already in state space.
    pub fn predict(
        &mut self,
        ia_x: &IndexSet,
        f_v: &DMatrix<f64>,
        ia_v: &IndexSet,
        q: &DMatrix<f64>,
    ) -> Result<()> {
        self.check_scope(ia_x)?;
        let ia_inv = IndexSet::complement(ia_x, ia_v)?;
        EkfError::check_shape("F_v", (ia_v.len(), ia_v.len()), f_v.shape())?;
        EkfError::check_shape("Q", (ia_v.len(), ia_v.len()), q.shape())?;

        let stats = partitioned_update(
            self.state.covariance_mut(),
            &ia_inv,
            f_v,
            ia_v,
            ia_v,
            Some(q),
        )?;
        debug!(variant = ia_v.len(), invariant = ia_inv.len(), flops = stats.flops, "predict");
        self.last_stats = stats;
        Ok(())
    }

    /// Correlates a new block `ia_l` with its parent coordinates `ia_rs`.
    ///
    /// The new block's covariance becomes `G_v·P[rs, rs]·G_vᵗ + G_y·R·G_yᵗ` and
    /// its cross-covariance with the rest of `ia_x` is `P[inv, rs]·G_vᵗ`. The
    /// caller writes the block's mean beforehand.
    pub fn initialize(
        &mut self,
        ia_x: &IndexSet,
        g_v: &DMatrix<f64>,
        ia_rs: &IndexSet,
        ia_l: &IndexSet,
        g_y: &DMatrix<f64>,
        r: &DMatrix<f64>,
    ) -> Result<()> {
        EkfError::check_shape("G_y", (ia_l.len(), g_y.ncols()), g_y.shape())?;
        let noise = project_jacobian("R", r, g_y)?;
        self.initialize_with_noise(ia_x, g_v, ia_rs, ia_l, &noise)
    }

    /// Like [`SparseEkf::initialize`], with a second independent noise source
    /// `N` projected through `G_n` (e.g. an unfiltered sensor pose).
    ///
    /// # Arguments
    ///
    /// * `ia_x` - Scope of the operation, must contain `ia_rs` and `ia_l`
    /// * `g_v` - Jacobian of the new block w.r.t. its parents, |ia_l| × |ia_rs|
    /// * `ia_rs` - Filtered parent coordinates (robot, sensor)
    /// * `ia_l` - Coordinates of the new block, not yet filtered
    /// * `g_y` - Jacobian w.r.t. the measurement
    /// * `r` - Measurement covariance
    /// * `g_n` - Jacobian w.r.t. the perturbation
    /// * `n` - Perturbation covariance
    #[allow(clippy::too_many_arguments)]
    pub fn initialize_with_perturbation(
        &mut self,
        ia_x: &IndexSet,
        g_v: &DMatrix<f64>,
        ia_rs: &IndexSet,
        ia_l: &IndexSet,
        g_y: &DMatrix<f64>,
        r: &DMatrix<f64>,
        g_n: &DMatrix<f64>,
        n: &DMatrix<f64>,
    ) -> Result<()> {
        EkfError::check_shape("G_y", (ia_l.len(), g_y.ncols()), g_y.shape())?;
        EkfError::check_shape("G_n", (ia_l.len(), g_n.ncols()), g_n.shape())?;
        let noise = project_jacobian("R", r, g_y)? + project_jacobian("N", n, g_n)?;
        self.initialize_with_noise(ia_x, g_v, ia_rs, ia_l, &noise)
    }

    fn initialize_with_noise(
        &mut self,
        ia_x: &IndexSet,
        g_v: &DMatrix<f64>,
        ia_rs: &IndexSet,
        ia_l: &IndexSet,
        noise: &DMatrix<f64>,
    ) -> Result<()> {
        self.check_scope(ia_x)?;
        let ia_inv = IndexSet::complement(ia_x, ia_l)?;
        if ia_l.intersects(ia_rs) {
            return Err(EkfError::AliasingViolation(format!(
                "new block {ia_l} overlaps its parent {ia_rs}"
            )));
        }
        ia_rs.require_subset_of(&ia_inv, "parent set")?;
        EkfError::check_shape("G_v", (ia_l.len(), ia_rs.len()), g_v.shape())?;
        let filtered = self.state.filtered_indices();
        if ia_l.intersects(&filtered) {
            return Err(EkfError::AliasingViolation(format!(
                "new block {ia_l} overlaps filtered coordinates"
            )));
        }

        let stats = partitioned_update(
            self.state.covariance_mut(),
            &ia_inv,
            g_v,
            ia_rs,
            ia_l,
            Some(noise),
        )?;
        self.state.promote_reserved_within(ia_l);
        debug!(parent = ia_rs.len(), new = ia_l.len(), flops = stats.flops, "initialize");
        self.last_stats = stats;
        Ok(())
    }

    /// Changes a block's representation through `J_l`, from `ia_old` to `ia_new`.
    ///
    /// Correlations with `ia_x \ (ia_old ∪ ia_new)` are carried over. The old
    /// coordinates are left stale when they differ from the new ones; rebinding
    /// or releasing them is up to the caller.
    pub fn reparametrize(
        &mut self,
        ia_x: &IndexSet,
        j_l: &DMatrix<f64>,
        ia_old: &IndexSet,
        ia_new: &IndexSet,
    ) -> Result<()> {
        self.check_scope(ia_x)?;
        let ia_touched = IndexSet::union(ia_old, ia_new);
        let ia_inv = IndexSet::complement(ia_x, &ia_touched)?;
        EkfError::check_shape("J_l", (ia_new.len(), ia_old.len()), j_l.shape())?;

        let stats =
            partitioned_update(self.state.covariance_mut(), &ia_inv, j_l, ia_old, ia_new, None)?;
        debug!(old = ia_old.len(), new = ia_new.len(), flops = stats.flops, "reparametrize");
        self.last_stats = stats;
        Ok(())
    }

    /// Innovation-space covariance of the expectation, `INN_rsl·P[rsl, rsl]·INN_rslᵗ`.
    pub fn expectation_covariance(
        &self,
        ia_rsl: &IndexSet,
        inn_rsl: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        self.check_scope(ia_rsl)?;
        EkfError::check_shape("INN_rsl", (inn_rsl.nrows(), ia_rsl.len()), inn_rsl.shape())?;
        let p_rsl = IndexSet::gather_matrix(ia_rsl, ia_rsl, self.state.covariance());
        Ok(inn_rsl * p_rsl * inn_rsl.transpose())
    }

    /// Kalman gain for an innovation whose Jacobian `INN_rsl` is taken with
    /// respect to the filtered coordinates `ia_rsl`.
    pub fn compute_kalman_gain(
        &self,
        ia_x: &IndexSet,
        inn: &mut Innovation,
        inn_rsl: &DMatrix<f64>,
        ia_rsl: &IndexSet,
    ) -> Result<KalmanGain> {
        self.check_scope(ia_x)?;
        ia_rsl.require_subset_of(ia_x, "observed set")?;
        EkfError::check_shape("INN_rsl", (inn.size(), ia_rsl.len()), inn_rsl.shape())?;

        let pjt = IndexSet::gather_matrix(ia_x, ia_rsl, self.state.covariance()) * inn_rsl.transpose();
        let ip = inn.inverse_covariance()?;
        let k = -(&pjt * ip);
        Ok(KalmanGain { k, pjt })
    }

    /// EKF correction restricted to `ia_x`.
    ///
    /// `x[ia_x] += K·z` and `P[ia_x, ia_x] += K·PJtᵗ`. A singular innovation
    /// covariance fails before anything is written.
    ///
    /// Only the product of residual and Jacobian sign matters: an innovation
    /// `expected − measured` with Jacobian `H`, or `measured − expected` with
    /// `−H`, give the same update.
    ///
    /// # Arguments
    ///
    /// * `ia_x` - Coordinates to correct, must contain `ia_rsl`
    /// * `inn` - Innovation; its inverse covariance is computed and cached
    /// * `inn_rsl` - Jacobian of the residual w.r.t. `ia_rsl`
    /// * `ia_rsl` - Observed coordinates (robot, sensor, landmark)
    pub fn correct(
        &mut self,
        ia_x: &IndexSet,
        inn: &mut Innovation,
        inn_rsl: &DMatrix<f64>,
        ia_rsl: &IndexSet,
    ) -> Result<()> {
        let gain = match self.compute_kalman_gain(ia_x, inn, inn_rsl, ia_rsl) {
            Ok(gain) => gain,
            Err(e) => {
                if e.is_recoverable() {
                    warn!("correction rejected: {e}");
                }
                return Err(e);
            }
        };

        let dx: DVector<f64> = &gain.k * inn.residual();
        let dp = &gain.k * gain.pjt.transpose();
        let asymmetry = max_asymmetry(&dp);
        if asymmetry > self.config.symmetry_tolerance {
            warn!(asymmetry, "covariance correction term is not symmetric");
        }

        let (x, p) = self.state.parts_mut();
        for (r, gr) in ia_x.iter().enumerate() {
            x[gr] += dx[r];
            for (c, gc) in ia_x.iter().enumerate() {
                p[(gr, gc)] += 0.5 * (dp[(r, c)] + dp[(c, r)]);
            }
        }

        let n_x = ia_x.len();
        let n_rsl = ia_rsl.len();
        let n_inn = inn.size();
        self.last_stats = KernelStats {
            flops: n_x * n_rsl * n_inn + n_x * n_inn * n_inn + n_x * n_x * n_inn,
            written: n_x * n_x + n_x,
        };
        debug!(scope = n_x, observed = n_rsl, flops = self.last_stats.flops, "correct");
        Ok(())
    }

    /// Marks a reserved block as filtered without touching the covariance.
    ///
    /// For quantities whose prior was written directly and which start out
    /// uncorrelated with the rest of the map.
    pub fn commit_reserved(&mut self, indices: &IndexSet) {
        self.state.promote_reserved_within(indices);
    }

    /// True if every coordinate of `indices` belongs to a filtered block.
    pub fn is_filtered(&self, indices: &IndexSet) -> bool {
        indices.is_subset_of(&self.state.filtered_indices())
    }

    /// Status of the block holding `position`, if any.
    pub fn status_of(&self, position: usize) -> Option<BlockStatus> {
        self.state
            .blocks()
            .find(|(_, b)| b.indices.contains(position))
            .map(|(_, b)| b.status)
    }
}

fn max_asymmetry(m: &DMatrix<f64>) -> f64 {
    let n = m.nrows();
    let mut worst = 0.0_f64;
    for r in 0..n {
        for c in (r + 1)..n {
            worst = worst.max((m[(r, c)] - m[(c, r)]).abs());
        }
    }
    worst
}
