//! Linear and nonlinear solvers.

pub mod bicgstab;
pub mod direct;
pub mod gmres;
pub mod newton;
pub mod partition;
pub mod preconditioner;

use std::str::FromStr;

use crate::error::GridflowError;

/// Which linear solver produces the Newton step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverKind {
    /// Host direct sparse LU.
    #[default]
    Default,
    /// Right-preconditioned BiCGSTAB.
    BiCgStab,
    /// Reference BiCGSTAB implementation, for cross-checks.
    BiCgStabRef,
    /// Restarted GMRES with modified Gram-Schmidt.
    Gmres,
}

impl FromStr for SolverKind {
    type Err = GridflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "bicgstab" => Ok(Self::BiCgStab),
            "bicgstab_ref" => Ok(Self::BiCgStabRef),
            "gmres" => Ok(Self::Gmres),
            other => Err(GridflowError::Solve(format!(
                "unknown solver kind {other:?}; expected default, bicgstab, bicgstab_ref, or gmres"
            ))),
        }
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm2(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

pub(crate) fn norm_inf(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}
