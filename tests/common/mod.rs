//! Shared fixtures for the filter integration tests

#![allow(dead_code)]

use nalgebra::{DMatrix, DVector};
use sparse_ekf::{IndexSet, SparseEkf};

/// Deterministic symmetric positive definite matrix.
pub fn spd(n: usize, seed: usize) -> DMatrix<f64> {
    let a = DMatrix::from_fn(n, n, |r, c| (((r + 1) * (c + 3) * (seed + 5)) % 11) as f64 * 0.05);
    &a * a.transpose() + DMatrix::identity(n, n)
}

/// Filter whose whole state is a single correlated filtered block.
pub fn correlated_filter(n: usize, seed: usize) -> SparseEkf {
    let mut ekf = SparseEkf::with_capacity(n);
    let mean = DVector::from_fn(n, |i, _| i as f64 * 0.5);
    ekf.state_mut()
        .insert_independent_block("all", &mean, &spd(n, seed))
        .unwrap();
    ekf
}

/// Asserts every entry with a row or column outside `scope` kept its bits.
pub fn assert_untouched_outside(before: &DMatrix<f64>, after: &DMatrix<f64>, scope: &IndexSet) {
    let n = before.nrows();
    for r in 0..n {
        for c in 0..n {
            if scope.contains(r) && scope.contains(c) {
                continue;
            }
            assert_eq!(
                before[(r, c)].to_bits(),
                after[(r, c)].to_bits(),
                "entry ({r}, {c}) changed outside scope {scope}"
            );
        }
    }
}

/// Asserts every entry whose row and column both avoid `touched` kept its bits.
pub fn assert_untouched_away_from(before: &DMatrix<f64>, after: &DMatrix<f64>, touched: &IndexSet) {
    let n = before.nrows();
    for r in 0..n {
        for c in 0..n {
            if touched.contains(r) || touched.contains(c) {
                continue;
            }
            assert_eq!(
                before[(r, c)].to_bits(),
                after[(r, c)].to_bits(),
                "entry ({r}, {c}) changed away from {touched}"
            );
        }
    }
}
