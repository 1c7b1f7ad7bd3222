//! Forward-mode automatic differentiation with Jacobian coloring.

pub mod coloring;
pub mod dual;
pub mod jacobian;

pub use coloring::{color_columns, verify_coloring, Coloring};
pub use dual::Dual;
pub use jacobian::{AdJacobian, Flavor};

use crate::error::Result;
use crate::network::Network;
use crate::sparse::SparseLayout;

/// One-shot design Jacobian ∂F/∂u at (vm, va), for sensitivity analysis.
pub fn design_jacobian<L: SparseLayout>(net: &Network, vm: &[f64], va: &[f64]) -> Result<L> {
    let mut jac = AdJacobian::<L>::new(net, Flavor::Design)?;
    jac.refresh(net, vm, va);
    Ok(jac.matrix)
}
