//! AC power-flow numerical core.
//!
//! Given a network model (bus admittance matrix, injections, bus
//! classification), computes the steady-state complex voltage at every bus:
//! a Newton-Raphson loop over the polar mismatch equations, with the sparse
//! Jacobian evaluated by color-seeded forward-mode AD and the Newton step
//! produced by a direct sparse LU or a block-Jacobi-preconditioned Krylov
//! solver (BiCGSTAB / GMRES).
//!
//! Network-data parsing, outer optimization loops, and the CLI driver live
//! outside this crate; it consumes an assembled [`Network`] and returns a
//! [`PowerFlowSolution`].

pub mod autodiff;
pub mod error;
pub mod network;
pub mod residual;
pub mod solver;
pub mod sparse;
pub mod stats;

pub use autodiff::{design_jacobian, AdJacobian, Dual, Flavor};
pub use error::{GridflowError, Result};
pub use network::{Branch, Bus, BusKind, Network};
pub use solver::newton::{
    solve, solve_with_layout, DivergenceReason, PowerFlowOptions, PowerFlowSolution,
};
pub use solver::SolverKind;
pub use sparse::{CscMatrix, CsrMatrix, SparseLayout};
pub use stats::Stats;
