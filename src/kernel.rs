//! Partitioned covariance update kernel.
//!
//! Every covariance-only operation of the filter reduces to one call of
//! [`partitioned_update`]:
//!
//! ```text
//! P[dst, dst] ← F · P[src, src] · Fᵗ + Q
//! P[inv, dst] ← P[inv, src] · Fᵗ        (mirrored into P[dst, inv])
//! ```
//!
//! Coordinates outside `inv ∪ dst` are never read or written. The caller
//! guarantees that `F` has no coupling to those coordinates; checking it would
//! cost a pass over the whole matrix, so it is left as a precondition.

use nalgebra::DMatrix;

use crate::error::{EkfError, Result};
use crate::index_set::IndexSet;

/// Work done by one kernel call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelStats {
    /// Multiply-add count
    pub flops: usize,
    /// Covariance entries written
    pub written: usize,
}

/// Jacobian-sandwich projection `J · Σ · Jᵗ`.
pub fn project_jacobian(
    what: &'static str,
    sigma: &DMatrix<f64>,
    jacobian: &DMatrix<f64>,
) -> Result<DMatrix<f64>> {
    let n = jacobian.ncols();
    EkfError::check_shape(what, (n, n), sigma.shape())?;
    Ok(jacobian * sigma * jacobian.transpose())
}

/// Multiply-add count of the kernel for the given set sizes.
pub fn kernel_flops(n_inv: usize, n_src: usize, n_dst: usize) -> usize {
    n_dst * n_src * n_src + n_dst * n_dst * n_src + n_inv * n_src * n_dst
}

/// Applies `f` (and the additive `q`) to the covariance block `src`, writing
/// the result at `dst` and propagating correlations to `inv`.
///
/// All inputs are gathered before anything is written, so `src` and `dst`
/// may be the same set or overlap. `inv` must not intersect `dst`.
pub fn partitioned_update(
    p: &mut DMatrix<f64>,
    inv: &IndexSet,
    f: &DMatrix<f64>,
    src: &IndexSet,
    dst: &IndexSet,
    q: Option<&DMatrix<f64>>,
) -> Result<KernelStats> {
    let n = p.nrows();
    EkfError::check_shape("covariance", (n, n), p.shape())?;
    for set in [inv, src, dst] {
        set.check_bounds(n)?;
    }
    if inv.intersects(dst) {
        return Err(EkfError::InvalidIndexSet(format!(
            "invariant set {inv} overlaps destination {dst}"
        )));
    }
    EkfError::check_shape("transform", (dst.len(), src.len()), f.shape())?;
    if let Some(q) = q {
        EkfError::check_shape("additive noise", (dst.len(), dst.len()), q.shape())?;
    }

    let p_ss = IndexSet::gather_matrix(src, src, p);
    let p_is = IndexSet::gather_matrix(inv, src, p);
    let ft = f.transpose();

    let mut p_dd = f * p_ss * &ft;
    if let Some(q) = q {
        p_dd += q;
    }
    let p_id = p_is * &ft;

    for (r, gr) in dst.iter().enumerate() {
        for (c, gc) in dst.iter().enumerate() {
            p[(gr, gc)] = 0.5 * (p_dd[(r, c)] + p_dd[(c, r)]);
        }
    }
    for (r, gr) in inv.iter().enumerate() {
        for (c, gc) in dst.iter().enumerate() {
            let v = p_id[(r, c)];
            p[(gr, gc)] = v;
            p[(gc, gr)] = v;
        }
    }

    Ok(KernelStats {
        flops: kernel_flops(inv.len(), src.len(), dst.len()),
        written: dst.len() * dst.len() + 2 * inv.len() * dst.len(),
    })
}
