//! Polar-form power mismatch kernel.
//!
//! Evaluates F(Vm, Va): active-power mismatch at PV and PQ buses followed by
//! reactive-power mismatch at PQ buses. The kernel is generic over [`PfScalar`]
//! so a dual-number scalar substitutes for f64 without any structural change,
//! and data-parallel across output rows.

use rayon::prelude::*;
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

use crate::network::Network;
use crate::sparse::CsrMatrix;

/// Scalar the mismatch kernel is written against. Implemented by `f64` and by
/// the forward-mode dual number.
pub trait PfScalar:
    Copy
    + Send
    + Sync
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
{
    fn from_f64(x: f64) -> Self;
    /// Primal value.
    fn value(self) -> f64;
    /// Sine and cosine in one call; invoked once per stored (fr, to) pair.
    fn sin_cos(self) -> (Self, Self);
}

impl PfScalar for f64 {
    #[inline]
    fn from_f64(x: f64) -> Self {
        x
    }

    #[inline]
    fn value(self) -> f64 {
        self
    }

    #[inline]
    fn sin_cos(self) -> (Self, Self) {
        f64::sin_cos(self)
    }
}

/// Complex power injected at bus `fr`, in polar form, summed over the stored
/// nonzeros of row `fr` of the admittance split.
#[inline]
fn bus_power<S: PfScalar>(
    fr: usize,
    vm: &[S],
    va: &[S],
    g: &CsrMatrix<f64>,
    b: &CsrMatrix<f64>,
) -> (S, S) {
    let mut p = S::from_f64(0.0);
    let mut q = S::from_f64(0.0);
    for idx in g.row_pointers[fr]..g.row_pointers[fr + 1] {
        let to = g.col_indices[idx];
        let gv = S::from_f64(g.values[idx]);
        let bv = S::from_f64(b.values[idx]);
        let (sin_d, cos_d) = (va[fr] - va[to]).sin_cos();
        let coef = vm[fr] * vm[to];
        p += coef * (gv * cos_d + bv * sin_d);
        q += coef * (gv * sin_d - bv * cos_d);
    }
    (p, q)
}

/// Write the mismatch vector `f` of length |pv| + 2|pq| in place:
/// P-mismatch at PV buses, P-mismatch at PQ buses, Q-mismatch at PQ buses.
///
/// `g` and `b` are the real/imaginary admittance split sharing one pattern;
/// `pinj`/`qinj` are indexed by bus.
pub fn power_mismatch<S: PfScalar>(
    vm: &[S],
    va: &[S],
    pinj: &[S],
    qinj: &[S],
    g: &CsrMatrix<f64>,
    b: &CsrMatrix<f64>,
    pv: &[usize],
    pq: &[usize],
    f: &mut [S],
) {
    let npv = pv.len();
    let npq = pq.len();
    assert_eq!(f.len(), npv + 2 * npq, "mismatch vector length");

    let (fp, fq) = f.split_at_mut(npv + npq);
    let (fp_pv, fp_pq) = fp.split_at_mut(npv);

    fp_pv.par_iter_mut().enumerate().for_each(|(i, out)| {
        let fr = pv[i];
        let (p, _) = bus_power(fr, vm, va, g, b);
        *out = p - pinj[fr];
    });

    fp_pq
        .par_iter_mut()
        .zip(fq.par_iter_mut())
        .enumerate()
        .for_each(|(i, (out_p, out_q))| {
            let fr = pq[i];
            let (p, q) = bus_power(fr, vm, va, g, b);
            *out_p = p - pinj[fr];
            *out_q = q - qinj[fr];
        });
}

/// Evaluate the mismatch for a network at the given voltage state.
pub fn network_mismatch(net: &Network, vm: &[f64], va: &[f64], f: &mut [f64]) {
    power_mismatch(
        vm, va, &net.pinj, &net.qinj, &net.g, &net.b, &net.pv, &net.pq, f,
    );
}
