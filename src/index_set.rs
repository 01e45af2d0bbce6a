//! Index set algebra over the global state vector.
//!
//! An [`IndexSet`] is an ordered set of unique positions into the mean vector
//! and covariance matrix. Operations describe "everything else" through
//! [`IndexSet::complement`] instead of enumerating it, which is what keeps the
//! sparse updates proportional to the touched block instead of the whole map.

use std::collections::HashSet;
use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::error::{EkfError, Result};

/// Ordered set of unique positions into the global vector/matrix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IndexSet {
    indices: Vec<usize>,
}

impl IndexSet {
    /// Builds a set from positions, keeping their order.
    ///
    /// Fails with `InvalidIndexSet` if a position appears twice.
    pub fn new(indices: Vec<usize>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(indices.len());
        for &i in &indices {
            if !seen.insert(i) {
                return Err(EkfError::InvalidIndexSet(format!(
                    "position {i} appears more than once"
                )));
            }
        }
        Ok(Self { indices })
    }

    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Contiguous positions `start..start + len`.
    pub fn range(start: usize, len: usize) -> Self {
        Self {
            indices: (start..start + len).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.indices.contains(&position)
    }

    /// Largest position in the set, if any.
    pub fn max(&self) -> Option<usize> {
        self.indices.iter().copied().max()
    }

    /// True if every position of `self` is in `universe`.
    pub fn is_subset_of(&self, universe: &IndexSet) -> bool {
        let members: HashSet<usize> = universe.iter().collect();
        self.iter().all(|i| members.contains(&i))
    }

    /// True if the two sets share at least one position.
    pub fn intersects(&self, other: &IndexSet) -> bool {
        let members: HashSet<usize> = other.iter().collect();
        self.iter().any(|i| members.contains(&i))
    }

    /// Elements of `a`, followed by the elements of `b` not already in `a`.
    pub fn union(a: &IndexSet, b: &IndexSet) -> IndexSet {
        let members: HashSet<usize> = a.iter().collect();
        let mut indices = a.indices.clone();
        indices.extend(b.iter().filter(|i| !members.contains(i)));
        IndexSet { indices }
    }

    /// `universe` minus `subset`, in the universe's order.
    ///
    /// Fails with `InvalidIndexSet` when `subset` is not contained in `universe`.
    pub fn complement(universe: &IndexSet, subset: &IndexSet) -> Result<IndexSet> {
        let excluded: HashSet<usize> = subset.iter().collect();
        let members: HashSet<usize> = universe.iter().collect();
        if let Some(stray) = subset.iter().find(|i| !members.contains(i)) {
            return Err(EkfError::InvalidIndexSet(format!(
                "position {stray} of {subset} is outside universe {universe}"
            )));
        }
        Ok(IndexSet {
            indices: universe
                .iter()
                .filter(|i| !excluded.contains(i))
                .collect(),
        })
    }

    /// Checks every position lies in `[0, n)`.
    pub fn check_bounds(&self, n: usize) -> Result<()> {
        match self.max().filter(|&i| i >= n) {
            Some(i) => Err(EkfError::InvalidIndexSet(format!(
                "position {i} is out of range for a state of size {n}"
            ))),
            None => Ok(()),
        }
    }

    /// Fails with `InvalidIndexSet` unless `self ⊆ universe`.
    pub fn require_subset_of(&self, universe: &IndexSet, role: &str) -> Result<()> {
        if self.is_subset_of(universe) {
            Ok(())
        } else {
            Err(EkfError::InvalidIndexSet(format!(
                "{role} {self} is not contained in {universe}"
            )))
        }
    }

    /// Sub-vector `v[self]`.
    pub fn gather(&self, v: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.iter().map(|i| v[i]))
    }

    /// Sub-matrix `m[rows, cols]`.
    pub fn gather_matrix(rows: &IndexSet, cols: &IndexSet, m: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(rows.len(), cols.len(), |r, c| {
            m[(rows.indices[r], cols.indices[c])]
        })
    }
}

impl fmt::Display for IndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.indices)
    }
}
