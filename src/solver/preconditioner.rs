//! Block-Jacobi preconditioner.
//!
//! The Jacobian's row set is partitioned once per nonlinear solve; each
//! diagonal block is extracted dense, LU-factored with partial pivoting, and
//! stored as an explicit inverse. Application is an independent dense
//! matrix-vector product per block, so blocks run in parallel.

use rayon::prelude::*;

use crate::error::{GridflowError, Result};
use crate::sparse::SparseLayout;

use super::partition::{Adjacency, Partitioner};

#[derive(Debug)]
pub struct BlockJacobi {
    nrows: usize,
    /// Global row indices of each block.
    blocks: Vec<Vec<usize>>,
    /// Dense inverse of each block, row-major.
    inverses: Vec<Vec<f64>>,
    block_of_row: Vec<usize>,
    local_of_row: Vec<usize>,
}

impl BlockJacobi {
    /// Partition the symmetrized pattern of `j` into `nparts` blocks and
    /// factor them. The partition is kept for the preconditioner's lifetime;
    /// only values change on [`BlockJacobi::update`].
    pub fn new<L: SparseLayout>(
        j: &L,
        nparts: usize,
        partitioner: &dyn Partitioner,
    ) -> Result<Self> {
        let nrows = j.nrows();
        let adjacency = Adjacency::from_matrix(j);
        let parts = partitioner.partition(&adjacency, nparts);

        let nblocks = parts.iter().copied().max().map_or(0, |m| m + 1);
        let mut blocks: Vec<Vec<usize>> = vec![Vec::new(); nblocks];
        for (row, &p) in parts.iter().enumerate() {
            blocks[p].push(row);
        }
        blocks.retain(|b| !b.is_empty());

        let mut block_of_row = vec![0usize; nrows];
        let mut local_of_row = vec![0usize; nrows];
        for (bi, rows) in blocks.iter().enumerate() {
            for (li, &r) in rows.iter().enumerate() {
                block_of_row[r] = bi;
                local_of_row[r] = li;
            }
        }

        let mut pc = Self {
            nrows,
            blocks,
            inverses: Vec::new(),
            block_of_row,
            local_of_row,
        };
        pc.update(j)?;
        Ok(pc)
    }

    /// Number of non-empty blocks.
    pub fn nblocks(&self) -> usize {
        self.blocks.len()
    }

    /// Re-extract and re-invert every block against the latest values of `j`.
    /// The pattern (and the partition) must be unchanged.
    pub fn update<L: SparseLayout>(&mut self, j: &L) -> Result<()> {
        assert_eq!(j.nrows(), self.nrows, "preconditioner/matrix size mismatch");

        // Gather the dense diagonal blocks in one pass over the nonzeros.
        let mut dense: Vec<Vec<f64>> = self
            .blocks
            .iter()
            .map(|rows| vec![0.0; rows.len() * rows.len()])
            .collect();
        j.for_each_entry(|r, c, v| {
            if c < self.nrows {
                let b = self.block_of_row[r];
                if self.block_of_row[c] == b {
                    let n = self.blocks[b].len();
                    dense[b][self.local_of_row[r] * n + self.local_of_row[c]] = v;
                }
            }
        });

        self.inverses = dense
            .into_par_iter()
            .enumerate()
            .map(|(bi, mut block)| {
                let n = self.blocks[bi].len();
                invert_dense(n, &mut block).ok_or(GridflowError::SingularBlock {
                    block: bi,
                    size: n,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// In-place application: v[rows_b] <- inv_b * v[rows_b] for every block.
    pub fn apply(&self, v: &mut [f64]) {
        let input: &[f64] = v;
        let outputs: Vec<Vec<f64>> = self
            .blocks
            .par_iter()
            .zip(self.inverses.par_iter())
            .map(|(rows, inv)| {
                let n = rows.len();
                let mut out = vec![0.0; n];
                for (i, o) in out.iter_mut().enumerate() {
                    let mut sum = 0.0;
                    for (k, &r) in rows.iter().enumerate() {
                        sum += inv[i * n + k] * input[r];
                    }
                    *o = sum;
                }
                out
            })
            .collect();
        for (rows, out) in self.blocks.iter().zip(outputs.iter()) {
            for (&r, &val) in rows.iter().zip(out.iter()) {
                v[r] = val;
            }
        }
    }

    /// Out-of-place convenience: z = P⁻¹ r.
    pub fn apply_to(&self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
        self.apply(z);
    }
}

/// Invert a dense row-major n x n matrix by Gauss-Jordan elimination with
/// partial pivoting. Returns None when a pivot is numerically zero.
fn invert_dense(n: usize, a: &mut [f64]) -> Option<Vec<f64>> {
    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        inv[i * n + i] = 1.0;
    }

    for col in 0..n {
        // Partial pivoting
        let mut best_row = col;
        let mut best_val = a[col * n + col].abs();
        for row in (col + 1)..n {
            let v = a[row * n + col].abs();
            if v > best_val {
                best_val = v;
                best_row = row;
            }
        }
        if best_val < 1e-30 || !best_val.is_finite() {
            return None;
        }
        if best_row != col {
            for j in 0..n {
                a.swap(col * n + j, best_row * n + j);
                inv.swap(col * n + j, best_row * n + j);
            }
        }

        let pivot = a[col * n + col];
        for j in 0..n {
            a[col * n + j] /= pivot;
            inv[col * n + j] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row * n + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                let ac = a[col * n + j];
                let ic = inv[col * n + j];
                a[row * n + j] -= factor * ac;
                inv[row * n + j] -= factor * ic;
            }
        }
    }
    Some(inv)
}
