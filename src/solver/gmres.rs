//! Restarted GMRES(m) with modified Gram-Schmidt.
//!
//! Right-preconditioned: the Krylov basis is built for A·M⁻¹ and the
//! preconditioned basis vectors are kept so the solution update is a single
//! linear combination. Givens rotations maintain the triangular least-squares
//! system incrementally.

use crate::error::{GridflowError, Result};
use crate::sparse::SparseLayout;

use super::{dot, norm2};

pub const DEFAULT_RESTART: usize = 30;

/// Solve A x = b, restarting every `restart` inner iterations; `m_inv`
/// computes z = M⁻¹ r. Returns the solution and the total inner iteration
/// count. Stopping criterion: ‖r‖₂ / ‖b‖₂ < tol.
pub fn gmres<L: SparseLayout>(
    a: &L,
    b: &[f64],
    m_inv: impl Fn(&[f64], &mut [f64]),
    tol: f64,
    restart: usize,
    max_iters: usize,
) -> Result<(Vec<f64>, usize)> {
    let n = b.len();
    assert_eq!(a.nrows(), n, "matrix/rhs dimension mismatch");

    let b_norm = norm2(b);
    if b_norm == 0.0 {
        return Ok((vec![0.0; n], 0));
    }
    let m = restart.max(1).min(n.max(1));

    let mut x = vec![0.0; n];
    let mut total_iters = 0usize;

    // Arnoldi basis V, preconditioned basis Z, Hessenberg column storage.
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
    let mut precond_basis: Vec<Vec<f64>> = Vec::with_capacity(m);
    let mut h = vec![0.0; (m + 1) * m];
    let mut cs = vec![0.0; m];
    let mut sn = vec![0.0; m];
    let mut g = vec![0.0; m + 1];

    while total_iters < max_iters {
        // r = b - A x
        let mut r = vec![0.0; n];
        a.spmv(&x, &mut r);
        for i in 0..n {
            r[i] = b[i] - r[i];
        }
        let beta = norm2(&r);
        if !beta.is_finite() {
            return Err(GridflowError::Breakdown {
                iteration: total_iters,
                detail: "non-finite residual".into(),
            });
        }
        if beta / b_norm < tol {
            return Ok((x, total_iters));
        }

        basis.clear();
        precond_basis.clear();
        h.fill(0.0);
        g.fill(0.0);
        g[0] = beta;
        for v in r.iter_mut() {
            *v /= beta;
        }
        basis.push(r);

        let mut inner = 0;
        for j in 0..m {
            if total_iters >= max_iters {
                break;
            }
            // w = A M⁻¹ v_j
            let mut z = vec![0.0; n];
            m_inv(&basis[j], &mut z);
            let mut w = vec![0.0; n];
            a.spmv(&z, &mut w);
            precond_basis.push(z);

            // Modified Gram-Schmidt against the existing basis.
            for i in 0..=j {
                let hij = dot(&w, &basis[i]);
                h[i * m + j] = hij;
                for k in 0..n {
                    w[k] -= hij * basis[i][k];
                }
            }
            let h_next = norm2(&w);
            h[(j + 1) * m + j] = h_next;

            // Apply the accumulated Givens rotations to the new column.
            for i in 0..j {
                let temp = cs[i] * h[i * m + j] + sn[i] * h[(i + 1) * m + j];
                h[(i + 1) * m + j] = -sn[i] * h[i * m + j] + cs[i] * h[(i + 1) * m + j];
                h[i * m + j] = temp;
            }
            // New rotation zeroing h[j+1][j].
            let denom = (h[j * m + j] * h[j * m + j] + h_next * h_next).sqrt();
            if denom == 0.0 {
                return Err(GridflowError::Breakdown {
                    iteration: total_iters,
                    detail: "Arnoldi stagnation, zero Hessenberg column".into(),
                });
            }
            cs[j] = h[j * m + j] / denom;
            sn[j] = h_next / denom;
            h[j * m + j] = denom;
            h[(j + 1) * m + j] = 0.0;
            g[j + 1] = -sn[j] * g[j];
            g[j] *= cs[j];

            total_iters += 1;
            inner = j + 1;

            if g[j + 1].abs() / b_norm < tol {
                break;
            }
            if h_next == 0.0 {
                // Lucky breakdown: the Krylov space is exhausted and the
                // least-squares solution is exact.
                break;
            }
            for v in w.iter_mut() {
                *v /= h_next;
            }
            basis.push(w);
        }

        if inner == 0 {
            break;
        }

        // Back-substitute H y = g and update x through the preconditioned basis.
        let mut y = vec![0.0; inner];
        for i in (0..inner).rev() {
            let mut sum = g[i];
            for k in (i + 1)..inner {
                sum -= h[i * m + k] * y[k];
            }
            y[i] = sum / h[i * m + i];
        }
        for (yi, z) in y.iter().zip(precond_basis.iter()) {
            for k in 0..n {
                x[k] += yi * z[k];
            }
        }
    }

    // Converged inside the final restart cycle, or out of budget.
    let mut r = vec![0.0; n];
    a.spmv(&x, &mut r);
    for i in 0..n {
        r[i] = b[i] - r[i];
    }
    if norm2(&r) / b_norm < tol {
        return Ok((x, total_iters));
    }
    Err(GridflowError::Breakdown {
        iteration: total_iters,
        detail: "iteration budget exhausted".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::{CscMatrix, CsrMatrix, SparseLayout};
    use approx::assert_abs_diff_eq;

    fn identity_precond(r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }

    fn test_matrix(n: usize) -> Vec<(usize, usize, f64)> {
        // Nonsymmetric, diagonally dominant.
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 5.0 + (i % 4) as f64));
            if i + 1 < n {
                triplets.push((i, i + 1, -1.5));
                triplets.push((i + 1, i, -0.5));
            }
        }
        triplets
    }

    #[test]
    fn solves_small_nonsymmetric_system() {
        let n = 25;
        let a = CsrMatrix::from_triplets(n, n, &test_matrix(n));
        let b: Vec<f64> = (0..n).map(|i| 1.0 + (i as f64 * 0.61).cos()).collect();
        let (x, iters) = gmres(&a, &b, identity_precond, 1e-10, 10, 1000).unwrap();
        assert!(iters > 0);
        let mut ax = vec![0.0; n];
        a.spmv(&x, &mut ax);
        for (axi, bi) in ax.iter().zip(b.iter()) {
            assert_abs_diff_eq!(axi, bi, epsilon = 1e-8);
        }
    }

    #[test]
    fn layouts_agree() {
        let n = 15;
        let triplets = test_matrix(n);
        let b: Vec<f64> = (0..n).map(|i| (i as f64 + 1.0).recip()).collect();
        let csr = CsrMatrix::from_triplets(n, n, &triplets);
        let csc = CscMatrix::from_triplets(n, n, &triplets);
        let (x_r, _) = gmres(&csr, &b, identity_precond, 1e-11, 8, 500).unwrap();
        let (x_c, _) = gmres(&csc, &b, identity_precond, 1e-11, 8, 500).unwrap();
        for (r, c) in x_r.iter().zip(x_c.iter()) {
            assert_abs_diff_eq!(r, c, epsilon = 1e-9);
        }
    }

    #[test]
    fn restart_cycles_still_converge() {
        // Force many restarts with a tiny restart length.
        let n = 40;
        let a = CsrMatrix::from_triplets(n, n, &test_matrix(n));
        let b = vec![1.0; n];
        let (x, _) = gmres(&a, &b, identity_precond, 1e-9, 4, 5000).unwrap();
        let mut ax = vec![0.0; n];
        a.spmv(&x, &mut ax);
        for (axi, bi) in ax.iter().zip(b.iter()) {
            assert_abs_diff_eq!(axi, bi, epsilon = 1e-7);
        }
    }

    #[test]
    fn zero_rhs_short_circuits() {
        let a = CsrMatrix::from_triplets(5, 5, &test_matrix(5));
        let (x, iters) = gmres(&a, &[0.0; 5], identity_precond, 1e-10, 5, 100).unwrap();
        assert_eq!(iters, 0);
        assert_eq!(x, vec![0.0; 5]);
    }

    #[test]
    fn budget_exhaustion_is_breakdown() {
        let n = 50;
        let a = CsrMatrix::from_triplets(n, n, &test_matrix(n));
        let b = vec![1.0; n];
        let err = gmres(&a, &b, identity_precond, 1e-14, 5, 2).unwrap_err();
        assert!(matches!(err, GridflowError::Breakdown { .. }));
    }
}
