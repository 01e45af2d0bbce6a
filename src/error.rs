//! Error types for the sparse EKF

/// Result type alias
pub type Result<T> = std::result::Result<T, EkfError>;

/// Sparse EKF error types
///
/// Every variant except [`EkfError::SingularInnovationCovariance`] is a contract
/// violation detected before the filter state is touched.
#[derive(Debug, thiserror::Error)]
pub enum EkfError {
    /// Index set out of range, with duplicates, or not inside its universe
    #[error("Invalid index set: {0}")]
    InvalidIndexSet(String),

    /// A Jacobian or noise matrix disagrees with its index sets
    #[error("Dimension mismatch for {what}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Name of the offending matrix
        what: &'static str,
        /// Expected (rows, cols)
        expected: (usize, usize),
        /// Supplied (rows, cols)
        actual: (usize, usize),
    },

    /// New block overlaps coordinates already in the filter
    #[error("Aliasing violation: {0}")]
    AliasingViolation(String),

    /// Innovation covariance could not be inverted
    #[error("Innovation covariance is singular")]
    SingularInnovationCovariance,

    /// Not enough free coordinates left in the state
    #[error("Capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded {
        /// Coordinates requested
        requested: usize,
        /// Coordinates still free
        available: usize,
    },

    /// Block handle does not resolve to a live block
    #[error("Unknown block: {0}")]
    UnknownBlock(usize),

    /// Landmark id not present in the map
    #[error("Unknown landmark: {0}")]
    UnknownLandmark(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for EkfError {
    fn from(e: toml::de::Error) -> Self {
        EkfError::Config(e.to_string())
    }
}

impl EkfError {
    /// Checks a matrix shape, producing `DimensionMismatch` on disagreement.
    pub(crate) fn check_shape(
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(EkfError::DimensionMismatch {
                what,
                expected,
                actual,
            })
        }
    }

    /// True for errors the caller can recover from by dropping the observation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EkfError::SingularInnovationCovariance)
    }
}
