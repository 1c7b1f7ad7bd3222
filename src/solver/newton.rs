//! Newton-Raphson power-flow driver.
//!
//! The outer loop: evaluate the mismatch, refresh the AD Jacobian, solve
//! J·dx = F, negate, update the reduced voltage state, renormalize, repeat.
//! Divergence is a reported outcome, never a panic: the driver hands back
//! the best-so-far voltage with a reason.

use num_complex::Complex64;
use std::time::Instant;

use crate::autodiff::{AdJacobian, Flavor};
use crate::error::{GridflowError, Result};
use crate::network::Network;
use crate::residual::network_mismatch;
use crate::sparse::{CscMatrix, SparseLayout};
use crate::stats::Stats;

use super::bicgstab::{bicgstab, bicgstab_ref, DEFAULT_MAX_ITERATIONS};
use super::direct::solve_sparse_lu;
use super::gmres::{gmres, DEFAULT_RESTART};
use super::norm_inf;
use super::partition::RecursiveBisection;
use super::preconditioner::BlockJacobi;
use super::SolverKind;

/// Outer-loop parameters.
#[derive(Debug, Clone)]
pub struct PowerFlowOptions {
    /// Convergence tolerance on ‖F‖∞.
    pub tol: f64,
    /// Newton iteration limit.
    pub max_iters: usize,
    /// Block count for the block-Jacobi preconditioner (iterative kinds only).
    pub npartitions: usize,
    pub solver: SolverKind,
    /// Restart length for GMRES.
    pub gmres_restart: usize,
}

impl Default for PowerFlowOptions {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_iters: 20,
            npartitions: 8,
            solver: SolverKind::Default,
            gmres_restart: DEFAULT_RESTART,
        }
    }
}

/// Why a solve ended without convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceReason {
    IterationLimit,
    NonFiniteState,
    LinearSolverBreakdown,
}

/// Outcome of a power-flow solve.
#[derive(Debug, Clone)]
pub struct PowerFlowSolution {
    /// Complex voltage per bus. Slack entries are bitwise the initial values.
    pub v: Vec<Complex64>,
    pub converged: bool,
    /// ‖F‖∞ at the returned state.
    pub residual_norm: f64,
    /// Newton iterations performed.
    pub iterations: usize,
    /// Inner iterations of the first linear solve (0 for the direct kind).
    pub first_linsolve_iters: usize,
    /// Inner iterations across all linear solves.
    pub total_linsolve_iters: usize,
    pub reason: Option<DivergenceReason>,
}

/// Solve the power flow on the host layout (CSC).
pub fn solve(net: &Network, opts: &PowerFlowOptions) -> Result<PowerFlowSolution> {
    solve_with_layout::<CscMatrix<f64>>(net, opts, None)
}

/// Solve the power flow with an explicit Jacobian storage layout. CSC is the
/// host path; CSR runs the row-parallel kernels.
pub fn solve_with_layout<L: SparseLayout>(
    net: &Network,
    opts: &PowerFlowOptions,
    mut stats: Option<&mut Stats>,
) -> Result<PowerFlowSolution> {
    if !(opts.tol > 0.0) {
        return Err(GridflowError::Solve(format!(
            "tolerance must be positive, got {}",
            opts.tol
        )));
    }

    let npv = net.npv();
    let npq = net.npq();
    let nf = net.residual_len();

    let mut vm: Vec<f64> = net.v0.iter().map(|v| v.norm()).collect();
    let mut va: Vec<f64> = net.v0.iter().map(|v| v.arg()).collect();

    if nf == 0 {
        // Every bus is slack; nothing to solve.
        return Ok(PowerFlowSolution {
            v: net.v0.clone(),
            converged: true,
            residual_norm: 0.0,
            iterations: 0,
            first_linsolve_iters: 0,
            total_linsolve_iters: 0,
            reason: None,
        });
    }

    let mut jac = AdJacobian::<L>::new(net, Flavor::State)?;
    let mut precond: Option<BlockJacobi> = None;
    let inner_tol = (0.1 * opts.tol).max(1e-8);

    let mut f = vec![0.0; nf];
    let mut first_linsolve_iters = 0usize;
    let mut total_linsolve_iters = 0usize;

    // Last state known to be finite, handed back on a non-finite abort.
    let mut vm_good = vm.clone();
    let mut va_good = va.clone();
    let mut norm_good = f64::INFINITY;

    for iter in 0..opts.max_iters {
        let _span = tracing::debug_span!("newton_iter", iter).entered();

        let t = Instant::now();
        network_mismatch(net, &vm, &va, &mut f);
        if let Some(ref mut s) = stats {
            s.residual_eval += t.elapsed();
        }

        // NaN/Inf anywhere in the state or mismatch aborts before the norm is
        // trusted (the max-norm would silently skip NaN entries).
        if !f.iter().all(|x| x.is_finite()) {
            tracing::warn!(iter, "non-finite state, aborting");
            return Ok(diverged(
                net,
                &vm_good,
                &va_good,
                norm_good,
                iter,
                first_linsolve_iters,
                total_linsolve_iters,
                DivergenceReason::NonFiniteState,
            ));
        }
        let norm_f = norm_inf(&f);
        tracing::debug!(iter, norm_f, "mismatch evaluated");
        vm_good.copy_from_slice(&vm);
        va_good.copy_from_slice(&va);
        norm_good = norm_f;
        if norm_f < opts.tol {
            tracing::info!(iterations = iter, norm_f, "Newton converged");
            if let Some(ref mut s) = stats {
                s.newton_iterations = iter as u32;
            }
            return Ok(PowerFlowSolution {
                v: reconstitute(net, &vm, &va),
                converged: true,
                residual_norm: norm_f,
                iterations: iter,
                first_linsolve_iters,
                total_linsolve_iters,
                reason: None,
            });
        }

        let t = Instant::now();
        jac.refresh(net, &vm, &va);
        if let Some(ref mut s) = stats {
            s.jacobian_eval += t.elapsed();
        }

        // Solve J dx = F. The partition behind the block-Jacobi is built on
        // the first pass and only refactorized afterwards.
        let t = Instant::now();
        let solve_result: Result<(Vec<f64>, usize)> = match opts.solver {
            SolverKind::Default => solve_sparse_lu(&jac.matrix, &f).map(|x| (x, 0)),
            kind => {
                let tp = Instant::now();
                let pc = match precond.as_mut() {
                    Some(pc) => {
                        pc.update(&jac.matrix)?;
                        pc
                    }
                    None => precond.insert(BlockJacobi::new(
                        &jac.matrix,
                        opts.npartitions,
                        &RecursiveBisection,
                    )?),
                };
                if let Some(ref mut s) = stats {
                    s.preconditioner += tp.elapsed();
                }
                let m_inv = |r: &[f64], z: &mut [f64]| pc.apply_to(r, z);
                match kind {
                    SolverKind::BiCgStab => {
                        bicgstab(&jac.matrix, &f, m_inv, inner_tol, DEFAULT_MAX_ITERATIONS)
                    }
                    SolverKind::BiCgStabRef => {
                        bicgstab_ref(&jac.matrix, &f, m_inv, inner_tol, DEFAULT_MAX_ITERATIONS)
                    }
                    SolverKind::Gmres => gmres(
                        &jac.matrix,
                        &f,
                        m_inv,
                        inner_tol,
                        opts.gmres_restart,
                        DEFAULT_MAX_ITERATIONS,
                    ),
                    SolverKind::Default => unreachable!("handled above"),
                }
            }
        };
        if let Some(ref mut s) = stats {
            s.linear_solve += t.elapsed();
        }

        let dx = match solve_result {
            Ok((dx, lin_iters)) => {
                if iter == 0 {
                    first_linsolve_iters = lin_iters;
                }
                total_linsolve_iters += lin_iters;
                if let Some(ref mut s) = stats {
                    s.linsolve_iters_per_newton.push(lin_iters as u32);
                }
                dx
            }
            Err(GridflowError::Breakdown { iteration, detail }) => {
                tracing::warn!(iter, iteration, detail = %detail, "linear solver breakdown");
                return Ok(diverged(
                    net,
                    &vm,
                    &va,
                    norm_f,
                    iter,
                    first_linsolve_iters,
                    total_linsolve_iters,
                    DivergenceReason::LinearSolverBreakdown,
                ));
            }
            Err(GridflowError::Solve(detail)) => {
                tracing::warn!(iter, detail = %detail, "linear solve failed");
                return Ok(diverged(
                    net,
                    &vm,
                    &va,
                    norm_f,
                    iter,
                    first_linsolve_iters,
                    total_linsolve_iters,
                    DivergenceReason::LinearSolverBreakdown,
                ));
            }
            Err(e) => return Err(e),
        };

        // The solver returns x with J x = F; the step is the negation.
        for (i, &b) in net.pv.iter().enumerate() {
            va[b] -= dx[i];
        }
        for (i, &b) in net.pq.iter().enumerate() {
            va[b] -= dx[npv + i];
            vm[b] -= dx[npv + npq + i];
        }

        // Renormalize through the complex form. Idempotent in exact
        // arithmetic; folds a negative Vm back into the angle. Slack stays
        // untouched, PV keeps its magnitude setpoint.
        for &b in &net.pv {
            va[b] = Complex64::from_polar(vm[b], va[b]).arg();
        }
        for &b in &net.pq {
            let v = Complex64::from_polar(vm[b], va[b]);
            vm[b] = v.norm();
            va[b] = v.arg();
        }
    }

    network_mismatch(net, &vm, &va, &mut f);
    if !f.iter().all(|x| x.is_finite()) {
        return Ok(diverged(
            net,
            &vm_good,
            &va_good,
            norm_good,
            opts.max_iters,
            first_linsolve_iters,
            total_linsolve_iters,
            DivergenceReason::NonFiniteState,
        ));
    }
    let norm_f = norm_inf(&f);
    if norm_f < opts.tol {
        tracing::info!(iterations = opts.max_iters, norm_f, "Newton converged");
        if let Some(ref mut s) = stats {
            s.newton_iterations = opts.max_iters as u32;
        }
        return Ok(PowerFlowSolution {
            v: reconstitute(net, &vm, &va),
            converged: true,
            residual_norm: norm_f,
            iterations: opts.max_iters,
            first_linsolve_iters,
            total_linsolve_iters,
            reason: None,
        });
    }

    tracing::warn!(max_iters = opts.max_iters, norm_f, "Newton did not converge");
    Ok(diverged(
        net,
        &vm,
        &va,
        norm_f,
        opts.max_iters,
        first_linsolve_iters,
        total_linsolve_iters,
        DivergenceReason::IterationLimit,
    ))
}

/// Rebuild the complex voltage vector. Slack buses take their initial values
/// bitwise; PV and PQ buses come from the polar state.
fn reconstitute(net: &Network, vm: &[f64], va: &[f64]) -> Vec<Complex64> {
    let mut v: Vec<Complex64> = (0..net.nbus)
        .map(|b| Complex64::from_polar(vm[b], va[b]))
        .collect();
    for &b in &net.slack {
        v[b] = net.v0[b];
    }
    v
}

#[allow(clippy::too_many_arguments)]
fn diverged(
    net: &Network,
    vm: &[f64],
    va: &[f64],
    norm_f: f64,
    iterations: usize,
    first_linsolve_iters: usize,
    total_linsolve_iters: usize,
    reason: DivergenceReason,
) -> PowerFlowSolution {
    PowerFlowSolution {
        v: reconstitute(net, vm, va),
        converged: false,
        residual_norm: norm_f,
        iterations,
        first_linsolve_iters,
        total_linsolve_iters,
        reason: Some(reason),
    }
}
