//! Host direct solver: sparse LU factorization via faer.
//!
//! Backs the `"default"` solver kind. Refactorizing the Jacobian from
//! scratch every Newton step is cheap at transmission-network sizes; the
//! Krylov kinds take over once factorization cost or fill-in dominates.

use faer::prelude::*;
use faer::sparse::{SparseColMat, Triplet};

use crate::error::{GridflowError, Result};
use crate::sparse::SparseLayout;

/// Solve A x = b by sparse LU with partial pivoting.
///
/// Rejects non-finite coefficients up front (pointing at the offending
/// entry) and treats a non-finite solution as numerical singularity.
pub fn solve_sparse_lu<L: SparseLayout>(a: &L, b: &[f64]) -> Result<Vec<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(GridflowError::Solve(format!(
            "LU needs a square matrix, got {}x{}",
            n,
            a.ncols()
        )));
    }
    if b.len() != n {
        return Err(GridflowError::Solve(format!(
            "right-hand side has length {}, system has {n} rows",
            b.len()
        )));
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut entries = Vec::with_capacity(a.nnz());
    let mut bad_entry = None;
    a.for_each_entry(|row, col, val| {
        if bad_entry.is_none() && !val.is_finite() {
            bad_entry = Some((row, col));
        }
        entries.push(Triplet::new(row, col, val));
    });
    if let Some((row, col)) = bad_entry {
        return Err(GridflowError::Solve(format!(
            "matrix entry at ({row}, {col}) is NaN or infinite"
        )));
    }

    let system = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &entries)
        .map_err(|e| GridflowError::Solve(format!("could not assemble sparse storage: {e:?}")))?;
    let factors = system
        .sp_lu()
        .map_err(|e| GridflowError::Solve(format!("LU factorization failed: {e:?}")))?;

    let mut rhs = faer::Mat::<f64>::zeros(n, 1);
    for (i, &bi) in b.iter().enumerate() {
        rhs[(i, 0)] = bi;
    }
    let solution = factors.solve(rhs);

    let x: Vec<f64> = (0..n).map(|i| solution[(i, 0)]).collect();
    if x.iter().any(|v| !v.is_finite()) {
        return Err(GridflowError::Solve(
            "numerically singular system, LU solution is non-finite".into(),
        ));
    }
    Ok(x)
}
