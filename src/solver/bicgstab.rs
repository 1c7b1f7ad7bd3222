//! Right-preconditioned BiCGSTAB.
//!
//! Van der Vorst's stabilized bi-conjugate gradient method, written against
//! the [`SparseLayout`] seam so the same loop runs on either storage layout.
//! A plain reference implementation is kept alongside for cross-checking the
//! workspace-reusing primary.

use crate::error::{GridflowError, Result};
use crate::sparse::SparseLayout;

use super::{dot, norm2};

pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// Solve A x = b with right preconditioning; `m_inv` computes z = M⁻¹ r.
///
/// Returns the solution and the iteration count. Stops when
/// ‖r‖₂ / ‖b‖₂ < tol. Loss of biorthogonality or an exhausted iteration
/// budget is a breakdown error.
pub fn bicgstab<L: SparseLayout>(
    a: &L,
    b: &[f64],
    m_inv: impl Fn(&[f64], &mut [f64]),
    tol: f64,
    max_iters: usize,
) -> Result<(Vec<f64>, usize)> {
    let n = b.len();
    assert_eq!(a.nrows(), n, "matrix/rhs dimension mismatch");

    let b_norm = norm2(b);
    if b_norm == 0.0 {
        return Ok((vec![0.0; n], 0));
    }
    let abs_tol = tol * b_norm;

    let mut x = vec![0.0; n];
    // x starts at zero, so r = b.
    let mut r = b.to_vec();
    let r0 = b.to_vec();
    let r0_norm = b_norm;

    let mut rho = 1.0_f64;
    let mut alpha = 1.0_f64;
    let mut omega = 1.0_f64;

    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut y = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut t = vec![0.0; n];

    for iter in 0..max_iters {
        let rho_new = dot(&r0, &r);
        let r_norm = norm2(&r);
        if rho_new.abs() < f64::EPSILON * r_norm * r0_norm {
            return Err(GridflowError::Breakdown {
                iteration: iter,
                detail: "biorthogonality lost, (r, r0) ~ 0".into(),
            });
        }

        let beta = (rho_new / rho) * (alpha / omega);
        rho = rho_new;

        // p = r + beta * (p - omega * v)
        for i in 0..n {
            p[i] = r[i] + beta * (p[i] - omega * v[i]);
        }

        // y = M⁻¹ p, v = A y
        m_inv(&p, &mut y);
        a.spmv(&y, &mut v);

        let r0_dot_v = dot(&r0, &v);
        if r0_dot_v.abs() < f64::EPSILON * norm2(&v) * r0_norm {
            return Err(GridflowError::Breakdown {
                iteration: iter,
                detail: "(A y, r0) ~ 0".into(),
            });
        }
        alpha = rho / r0_dot_v;

        // s = r - alpha * A y
        for i in 0..n {
            s[i] = r[i] - alpha * v[i];
        }
        if norm2(&s) < abs_tol {
            for i in 0..n {
                x[i] += alpha * y[i];
            }
            return Ok((x, iter + 1));
        }

        // z = M⁻¹ s, t = A z
        m_inv(&s, &mut z);
        a.spmv(&z, &mut t);

        let t_dot_t = dot(&t, &t);
        if t_dot_t == 0.0 {
            return Err(GridflowError::Breakdown {
                iteration: iter,
                detail: "‖A z‖ ~ 0".into(),
            });
        }
        omega = dot(&t, &s) / t_dot_t;

        // x += alpha * y + omega * z;  r = s - omega * t
        for i in 0..n {
            x[i] += alpha * y[i] + omega * z[i];
            r[i] = s[i] - omega * t[i];
        }

        let r_norm = norm2(&r);
        if !r_norm.is_finite() {
            return Err(GridflowError::Breakdown {
                iteration: iter,
                detail: "non-finite residual".into(),
            });
        }
        if r_norm < abs_tol {
            return Ok((x, iter + 1));
        }
        if omega == 0.0 {
            return Err(GridflowError::Breakdown {
                iteration: iter,
                detail: "omega ~ 0".into(),
            });
        }
    }

    Err(GridflowError::Breakdown {
        iteration: max_iters,
        detail: "iteration budget exhausted".into(),
    })
}

/// Reference BiCGSTAB: textbook formulation with fresh temporaries and an
/// explicitly recomputed residual. Slower; exists to cross-check [`bicgstab`].
pub fn bicgstab_ref<L: SparseLayout>(
    a: &L,
    b: &[f64],
    m_inv: impl Fn(&[f64], &mut [f64]),
    tol: f64,
    max_iters: usize,
) -> Result<(Vec<f64>, usize)> {
    let n = b.len();
    let b_norm = norm2(b);
    if b_norm == 0.0 {
        return Ok((vec![0.0; n], 0));
    }

    let apply_m = |r: &[f64]| {
        let mut z = vec![0.0; n];
        m_inv(r, &mut z);
        z
    };
    let apply_a = |x: &[f64]| {
        let mut y = vec![0.0; n];
        a.spmv(x, &mut y);
        y
    };

    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let r0 = r.clone();
    let mut p = r.clone();

    for iter in 0..max_iters {
        let y = apply_m(&p);
        let ay = apply_a(&y);
        let denom = dot(&ay, &r0);
        if denom.abs() < f64::EPSILON * norm2(&ay) * b_norm {
            return Err(GridflowError::Breakdown {
                iteration: iter,
                detail: "(A y, r0) ~ 0".into(),
            });
        }
        let alpha = dot(&r, &r0) / denom;

        let s: Vec<f64> = r.iter().zip(ay.iter()).map(|(ri, vi)| ri - alpha * vi).collect();
        let z = apply_m(&s);
        let az = apply_a(&z);
        let omega = dot(&az, &s) / dot(&az, &az);

        let rho_old = dot(&r, &r0);
        for i in 0..n {
            x[i] += alpha * y[i] + omega * z[i];
        }
        // Recompute the true residual instead of updating it.
        let ax = apply_a(&x);
        for i in 0..n {
            r[i] = b[i] - ax[i];
        }
        if norm2(&r) / b_norm < tol {
            return Ok((x, iter + 1));
        }

        let rho_new = dot(&r, &r0);
        if rho_new.abs() < f64::EPSILON * norm2(&r) * b_norm {
            return Err(GridflowError::Breakdown {
                iteration: iter,
                detail: "biorthogonality lost, (r, r0) ~ 0".into(),
            });
        }
        let beta = (rho_new / rho_old) * (alpha / omega);
        for i in 0..n {
            p[i] = r[i] + beta * (p[i] - omega * ay[i]);
        }
    }

    Err(GridflowError::Breakdown {
        iteration: max_iters,
        detail: "iteration budget exhausted".into(),
    })
}
