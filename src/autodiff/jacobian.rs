//! Sparse Jacobian evaluation by seeded forward-mode AD.
//!
//! The sparsity pattern comes from the analytic structure of ∂S/∂V: a power
//! mismatch at bus `fr` depends only on voltage variables at `fr` and its
//! Ybus neighbors, and on the injection at `fr` itself. The pattern is fixed
//! for the lifetime of a network; each evaluation seeds dual tangents by
//! color class, runs the mismatch kernel, and scatters the compressed
//! derivatives back into the sparse matrix.

use rayon::prelude::*;

use crate::error::{GridflowError, Result};
use crate::network::Network;
use crate::residual::power_mismatch;
use crate::sparse::SparseLayout;

use super::coloring::{color_columns, Coloring};
use super::dual::Dual;

/// Tangent slots carried per dual sweep. Color classes beyond this many are
/// handled by re-running the kernel on the next chunk of seed directions.
const CHUNK: usize = 8;

/// Which reduced variables the Jacobian differentiates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// ∂F/∂x over the state: θ at PV and PQ buses, then Vm at PQ buses.
    /// Square; this is what the Newton step solves against.
    State,
    /// ∂F/∂u over the controls: θ at slack buses, Vm at PV buses, and the
    /// active injection at PQ buses. Used for sensitivity analysis.
    Design,
}

/// Colored sparse Jacobian of the power mismatch.
///
/// Pattern, coloring, and variable map are computed once in [`AdJacobian::new`];
/// [`AdJacobian::refresh`] mutates only numeric values.
pub struct AdJacobian<L: SparseLayout> {
    flavor: Flavor,
    /// Numeric Jacobian; values overwritten by each refresh.
    pub matrix: L,
    pub coloring: Coloring,
    /// Packed position of each reduced variable in the [Vm; Va; Pinj] vector.
    map: Vec<usize>,
    nf: usize,
    nbus: usize,
    /// Compressed derivatives, ncolors x nf.
    jc: Vec<f64>,
}

impl<L: SparseLayout> AdJacobian<L> {
    pub fn new(net: &Network, flavor: Flavor) -> Result<Self> {
        let nbus = net.nbus;
        let nf = net.residual_len();
        let map = variable_map(net, flavor);
        let col_rows = column_supports(net, &map);

        let nnz: usize = col_rows.iter().map(|r| r.len()).sum();
        if nnz == 0 {
            return Err(GridflowError::InvalidNetwork(
                "Jacobian pattern is empty".into(),
            ));
        }
        if flavor == Flavor::State {
            // Necessary condition for structural invertibility: no empty
            // row or column in the square system.
            let mut row_seen = vec![false; nf];
            for rows in &col_rows {
                for &r in rows {
                    row_seen[r] = true;
                }
            }
            if let Some(r) = row_seen.iter().position(|&s| !s) {
                return Err(GridflowError::InvalidNetwork(format!(
                    "Jacobian row {r} is structurally empty"
                )));
            }
            if let Some(c) = col_rows.iter().position(|rows| rows.is_empty()) {
                return Err(GridflowError::InvalidNetwork(format!(
                    "Jacobian column {c} is structurally empty"
                )));
            }
        }

        let coloring = color_columns(nf, &col_rows);

        let mut triplets = Vec::with_capacity(nnz);
        for (col, rows) in col_rows.iter().enumerate() {
            for &r in rows {
                triplets.push((r, col, 0.0));
            }
        }
        let matrix = L::from_triplets(nf, map.len(), &triplets);
        let jc = vec![0.0; coloring.ncolors * nf];

        Ok(Self {
            flavor,
            matrix,
            coloring,
            map,
            nf,
            nbus,
            jc,
        })
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Re-evaluate the Jacobian values at (vm, va). The pattern is fixed, so
    /// this is seeding, kernel sweeps, partial extraction, and a pure scatter.
    pub fn refresh(&mut self, net: &Network, vm: &[f64], va: &[f64]) {
        let n = self.nbus;
        let nf = self.nf;
        let ncolors = self.coloring.ncolors;

        let qinj_d: Vec<Dual<CHUNK>> = net.qinj.iter().map(|&q| Dual::constant(q)).collect();
        let mut fd = vec![Dual::<CHUNK>::constant(0.0); nf];

        let mut chunk_start = 0;
        while chunk_start < ncolors {
            let active = CHUNK.min(ncolors - chunk_start);

            // Lift the primal state, then seed: each reduced variable whose
            // color falls in this chunk gets a unit tangent in its slot.
            let mut xd: Vec<Dual<CHUNK>> = Vec::with_capacity(3 * n);
            xd.extend(vm.iter().map(|&v| Dual::constant(v)));
            xd.extend(va.iter().map(|&v| Dual::constant(v)));
            xd.extend(net.pinj.iter().map(|&v| Dual::constant(v)));
            for (m, &pos) in self.map.iter().enumerate() {
                let c = self.coloring.colors[m];
                if c >= chunk_start && c < chunk_start + active {
                    xd[pos].eps[c - chunk_start] = 1.0;
                }
            }

            let (vm_d, rest) = xd.split_at(n);
            let (va_d, pinj_d) = rest.split_at(n);
            power_mismatch(
                vm_d, va_d, pinj_d, &qinj_d, &net.g, &net.b, &net.pv, &net.pq, &mut fd,
            );

            // Extract partials: one compressed row per active color.
            for k in 0..active {
                let dst = &mut self.jc[(chunk_start + k) * nf..(chunk_start + k + 1) * nf];
                dst.par_iter_mut()
                    .enumerate()
                    .for_each(|(i, v)| *v = fd[i].eps[k]);
            }

            chunk_start += active;
        }

        self.matrix.uncompress(&self.coloring.colors, &self.jc);
    }
}

/// Packed positions ([Vm; Va; Pinj], each of length nbus) of the reduced
/// variables, in column order.
fn variable_map(net: &Network, flavor: Flavor) -> Vec<usize> {
    let n = net.nbus;
    match flavor {
        Flavor::State => {
            let mut map = Vec::with_capacity(net.residual_len());
            map.extend(net.pv.iter().map(|&b| n + b)); // θ_pv
            map.extend(net.pq.iter().map(|&b| n + b)); // θ_pq
            map.extend(net.pq.iter().copied()); // Vm_pq
            map
        }
        Flavor::Design => {
            let mut map = Vec::with_capacity(net.slack.len() + net.npv() + net.npq());
            map.extend(net.slack.iter().map(|&b| n + b)); // θ_slack
            map.extend(net.pv.iter().copied()); // Vm_pv
            map.extend(net.pq.iter().map(|&b| 2 * n + b)); // Pinj_pq
            map
        }
    }
}

/// Row support of each Jacobian column, from the analytic mismatch structure:
/// a voltage variable at bus t reaches the P/Q rows of t and its neighbors;
/// an injection variable reaches only the P row of its own bus.
fn column_supports(net: &Network, map: &[usize]) -> Vec<Vec<usize>> {
    let n = net.nbus;
    let npv = net.npv();
    let npq = net.npq();

    let mut p_row = vec![usize::MAX; n];
    let mut q_row = vec![usize::MAX; n];
    for (i, &b) in net.pv.iter().enumerate() {
        p_row[b] = i;
    }
    for (i, &b) in net.pq.iter().enumerate() {
        p_row[b] = npv + i;
        q_row[b] = npv + npq + i;
    }

    map.iter()
        .map(|&pos| {
            let mut rows = Vec::new();
            if pos < 2 * n {
                // Voltage variable (Vm or Va) at bus t: every residual row
                // whose bus is adjacent to t sees it. Ybus pattern is
                // symmetric, so row t of the split gives the neighbor set.
                let t = pos % n;
                for idx in net.g.row_pointers[t]..net.g.row_pointers[t + 1] {
                    let fr = net.g.col_indices[idx];
                    if p_row[fr] != usize::MAX {
                        rows.push(p_row[fr]);
                    }
                    if q_row[fr] != usize::MAX {
                        rows.push(q_row[fr]);
                    }
                }
            } else {
                // Injection variable: F_P at its own bus only.
                let t = pos - 2 * n;
                if p_row[t] != usize::MAX {
                    rows.push(p_row[t]);
                }
            }
            rows.sort_unstable();
            rows.dedup();
            rows
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::coloring::verify_coloring;
    use crate::network::{Branch, Bus, Network};
    use crate::residual::network_mismatch;
    use crate::sparse::CscMatrix;
    use approx::assert_abs_diff_eq;

    fn three_bus() -> Network {
        let buses = vec![
            Bus::slack(1.02),
            Bus::generator(30.0, 1.01),
            Bus::load(40.0, 15.0),
        ];
        let branches = vec![
            Branch::line(0, 1, 0.02, 0.2, 0.04),
            Branch::line(1, 2, 0.03, 0.25, 0.02),
            Branch::line(0, 2, 0.01, 0.15, 0.0),
        ];
        Network::from_components(100.0, &buses, &branches).unwrap()
    }

    /// Dense central-difference state Jacobian, for cross-checking.
    fn fd_state_jacobian(net: &Network, vm: &[f64], va: &[f64]) -> Vec<Vec<f64>> {
        let nf = net.residual_len();
        let map = variable_map(net, Flavor::State);
        let h = 1e-7;
        let mut jac = vec![vec![0.0; map.len()]; nf];
        for (col, &pos) in map.iter().enumerate() {
            let mut vm_p = vm.to_vec();
            let mut va_p = va.to_vec();
            let mut vm_m = vm.to_vec();
            let mut va_m = va.to_vec();
            if pos < net.nbus {
                vm_p[pos] += h;
                vm_m[pos] -= h;
            } else {
                va_p[pos - net.nbus] += h;
                va_m[pos - net.nbus] -= h;
            }
            let mut fp = vec![0.0; nf];
            let mut fm = vec![0.0; nf];
            network_mismatch(net, &vm_p, &va_p, &mut fp);
            network_mismatch(net, &vm_m, &va_m, &mut fm);
            for i in 0..nf {
                jac[i][col] = (fp[i] - fm[i]) / (2.0 * h);
            }
        }
        jac
    }

    #[test]
    fn state_jacobian_matches_finite_differences() {
        let net = three_bus();
        let vm = vec![1.02, 1.01, 0.97];
        let va = vec![0.0, -0.05, -0.12];

        let mut ad = AdJacobian::<CscMatrix<f64>>::new(&net, Flavor::State).unwrap();
        ad.refresh(&net, &vm, &va);
        let dense = ad.matrix.to_dense();
        let fd = fd_state_jacobian(&net, &vm, &va);

        for i in 0..dense.len() {
            for j in 0..dense[i].len() {
                assert_abs_diff_eq!(dense[i][j], fd[i][j], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn coloring_is_valid_for_state_pattern() {
        let net = three_bus();
        let map = variable_map(&net, Flavor::State);
        let col_rows = column_supports(&net, &map);
        let coloring = color_columns(net.residual_len(), &col_rows);
        assert!(verify_coloring(net.residual_len(), &col_rows, &coloring));
    }

    #[test]
    fn pattern_is_invariant_under_value_changes() {
        let net = three_bus();
        let mut ad = AdJacobian::<CscMatrix<f64>>::new(&net, Flavor::State).unwrap();

        ad.refresh(&net, &[1.02, 1.01, 0.97], &[0.0, -0.05, -0.12]);
        let rows_a = ad.matrix.row_indices.clone();
        let ptrs_a = ad.matrix.col_pointers.clone();

        ad.refresh(&net, &[1.0, 1.0, 1.0], &[0.0, 0.0, 0.0]);
        assert_eq!(ad.matrix.row_indices, rows_a);
        assert_eq!(ad.matrix.col_pointers, ptrs_a);
    }

    #[test]
    fn design_injection_columns_are_negated_identity() {
        let net = three_bus();
        let vm = vec![1.02, 1.01, 0.97];
        let va = vec![0.0, -0.05, -0.12];
        let mut ad = AdJacobian::<CscMatrix<f64>>::new(&net, Flavor::Design).unwrap();
        ad.refresh(&net, &vm, &va);
        let dense = ad.matrix.to_dense();

        // Columns: θ_slack (1), Vm_pv (1), Pinj_pq (1). The injection column
        // hits only the P row of its bus, with derivative -1.
        let pinj_col = 2;
        let p_row_of_pq = net.npv(); // P rows: pv first, then pq
        for (i, row) in dense.iter().enumerate() {
            let expected = if i == p_row_of_pq { -1.0 } else { 0.0 };
            assert_abs_diff_eq!(row[pinj_col], expected, epsilon = 1e-14);
        }
    }

    #[test]
    fn chunked_sweeps_match_single_sweep_result() {
        // A star network forces more colors than one chunk when the hub
        // degree exceeds CHUNK; here it just exercises the chunk loop.
        let mut buses = vec![Bus::slack(1.0)];
        let mut branches = Vec::new();
        for i in 1..=12 {
            buses.push(Bus::load(5.0, 2.0));
            branches.push(Branch::line(0, i, 0.01, 0.1, 0.0));
        }
        // Two rings among the leaves to push row density past one chunk of
        // tangent slots.
        for i in 1..12 {
            branches.push(Branch::line(i, i + 1, 0.02, 0.15, 0.0));
        }
        for i in 1..11 {
            branches.push(Branch::line(i, i + 2, 0.025, 0.18, 0.0));
        }
        let net = Network::from_components(100.0, &buses, &branches).unwrap();
        let vm: Vec<f64> = (0..net.nbus).map(|i| 1.0 - 0.002 * i as f64).collect();
        let va: Vec<f64> = (0..net.nbus).map(|i| -0.01 * i as f64).collect();

        let mut ad = AdJacobian::<CscMatrix<f64>>::new(&net, Flavor::State).unwrap();
        ad.refresh(&net, &vm, &va);
        let dense = ad.matrix.to_dense();
        let fd = fd_state_jacobian(&net, &vm, &va);
        for i in 0..dense.len() {
            for j in 0..dense[i].len() {
                assert_abs_diff_eq!(dense[i][j], fd[i][j], epsilon = 1e-5);
            }
        }
    }
}
