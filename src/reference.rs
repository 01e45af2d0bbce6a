use kfilter::{
    measurement::LinearMeasurement,
    system::{NonLinearSystem, StepFunction},
    Kalman1M, KalmanFilter, KalmanPredictInput,
};
use nalgebra::{DMatrix, DVector, SMatrix, SVector};

/// Dense EKF over a fixed-size state, used to cross-check the sparse filter.
pub struct DenseReference<
    // Size of the State Vector
    const S: usize,
    // Size of the Measurement Vector
    const M: usize,
    // Size of the Input Vector
    const U: usize,
> {
    /// The Extended Kalman Filter
    ekf: Kalman1M<f64, S, U, M, NonLinearSystem<f64, S, U>, LinearMeasurement<f64, S, M>>,
}

impl<const S: usize, const M: usize, const U: usize> DenseReference<S, M, U> {
    /// Initializes a new dense reference filter
    ///
    /// # Arguments
    ///
    /// * `initial_state` - The initial state of the system
    /// * `initial_covariance` - The initial state covariance (P)
    /// * `h` - The observation matrix
    /// * `r` - The measurement covariance (R)
    /// * `step_fn` - State transition returning the Jacobian and process noise
    pub fn new(
        initial_state: SVector<f64, S>,
        initial_covariance: SMatrix<f64, S, S>,
        h: SMatrix<f64, M, S>,
        r: SMatrix<f64, M, M>,
        step_fn: StepFunction<f64, S, U>,
    ) -> Self {
        Self {
            ekf: Kalman1M::new_ekf_with_input(step_fn, h, r, initial_state, initial_covariance),
        }
    }

    /// Corrects the state with a measurement
    pub fn update(&mut self, measurement: SVector<f64, M>) {
        self.ekf.update(measurement);
    }

    /// Propagates the state with the given input
    pub fn predict(&mut self, input: SVector<f64, U>) -> &SVector<f64, S> {
        self.ekf.predict(input)
    }

    pub fn state(&self) -> DVector<f64> {
        DVector::from_column_slice(self.ekf.state().as_slice())
    }

    pub fn covariance(&self) -> DMatrix<f64> {
        DMatrix::from_column_slice(S, S, self.ekf.covariance().as_slice())
    }
}
