//! Observation innovation: residual and covariance, with a cached inverse.

use nalgebra::{DMatrix, DVector};

use crate::error::{EkfError, Result};

/// Residual between expected and measured observation, with its covariance.
///
/// The residual is `expected − measured`. With this sign the filter gain is
/// `K = −P·Hᵗ·S⁻¹`, so `x += K·residual` moves the estimate towards the
/// measurement.
#[derive(Clone, Debug)]
pub struct Innovation {
    residual: DVector<f64>,
    covariance: DMatrix<f64>,
    inverse: Option<DMatrix<f64>>,
}

impl Innovation {
    pub fn new(residual: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self> {
        let n = residual.len();
        EkfError::check_shape("innovation covariance", (n, n), covariance.shape())?;
        Ok(Self {
            residual,
            covariance,
            inverse: None,
        })
    }

    /// Builds the innovation from an expectation and a measurement.
    ///
    /// `expectation_cov` is the expectation's covariance projected from the
    /// state (see `SparseEkf::expectation_covariance`), `measurement_cov` the
    /// sensor noise.
    pub fn from_expectation(
        expected: &DVector<f64>,
        expectation_cov: &DMatrix<f64>,
        measured: &DVector<f64>,
        measurement_cov: &DMatrix<f64>,
    ) -> Result<Self> {
        let n = expected.len();
        EkfError::check_shape("measurement", (n, 1), measured.shape())?;
        EkfError::check_shape("expectation covariance", (n, n), expectation_cov.shape())?;
        EkfError::check_shape("measurement covariance", (n, n), measurement_cov.shape())?;
        Self::new(expected - measured, expectation_cov + measurement_cov)
    }

    pub fn size(&self) -> usize {
        self.residual.len()
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Inverse covariance, computed on first use and cached.
    ///
    /// Cholesky is tried first since the covariance should be positive
    /// definite; LU covers indefinite but still invertible matrices.
    pub fn inverse_covariance(&mut self) -> Result<&DMatrix<f64>> {
        if self.inverse.is_none() {
            let inverse = match self.covariance.clone().cholesky() {
                Some(chol) => chol.inverse(),
                None => self
                    .covariance
                    .clone()
                    .try_inverse()
                    .ok_or(EkfError::SingularInnovationCovariance)?,
            };
            if inverse.iter().any(|v| !v.is_finite()) {
                return Err(EkfError::SingularInnovationCovariance);
            }
            self.inverse = Some(inverse);
        }
        self.inverse
            .as_ref()
            .ok_or(EkfError::SingularInnovationCovariance)
    }

    /// Squared Mahalanobis distance `zᵗ·S⁻¹·z`, used for gating.
    pub fn mahalanobis_squared(&mut self) -> Result<f64> {
        let residual = self.residual.clone();
        let inverse = self.inverse_covariance()?;
        Ok(residual.dot(&(inverse * &residual)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    #[test]
    fn test_residual_is_expected_minus_measured() {
        let inn = Innovation::from_expectation(
            &dvector![1.0, 2.0],
            &DMatrix::identity(2, 2),
            &dvector![0.5, 3.0],
            &DMatrix::identity(2, 2),
        )
        .unwrap();
        assert_eq!(inn.residual(), &dvector![0.5, -1.0]);
        assert_eq!(inn.covariance(), &(DMatrix::identity(2, 2) * 2.0));
    }

    #[test]
    fn test_inverse_is_cached() {
        let mut inn = Innovation::new(dvector![1.0], DMatrix::from_element(1, 1, 4.0)).unwrap();
        assert_relative_eq!(inn.inverse_covariance().unwrap()[(0, 0)], 0.25);
        inn.covariance = DMatrix::from_element(1, 1, 1.0);
        assert_relative_eq!(inn.inverse_covariance().unwrap()[(0, 0)], 0.25);
    }

    #[test]
    fn test_singular_covariance() {
        let mut inn = Innovation::new(dvector![1.0, 1.0], DMatrix::from_element(2, 2, 1.0)).unwrap();
        assert!(matches!(
            inn.inverse_covariance(),
            Err(EkfError::SingularInnovationCovariance)
        ));
    }

    #[test]
    fn test_mahalanobis() {
        let mut inn =
            Innovation::new(dvector![2.0, 0.0], DMatrix::from_diagonal_element(2, 2, 4.0)).unwrap();
        assert_relative_eq!(inn.mahalanobis_squared().unwrap(), 1.0);
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(matches!(
            Innovation::new(dvector![1.0, 2.0], DMatrix::identity(3, 3)),
            Err(EkfError::DimensionMismatch { .. })
        ));
    }
}
