//! Compressed sparse matrices in column-major (CSC) and row-major (CSR) layouts.
//!
//! Generic over value type to support both f64 (Jacobian, admittance splits)
//! and Complex64 (Ybus). The [`SparseLayout`] trait is the portability seam:
//! solvers and the AD uncompression are written against it once and
//! specialized per layout, with column discipline on the host path and
//! row-parallel discipline on the SIMT-style path.

use num_complex::Complex64;
use rayon::prelude::*;
use std::ops::AddAssign;

/// Sparse matrix in Compressed Sparse Column format.
#[derive(Debug, Clone)]
pub struct CscMatrix<T> {
    pub nrows: usize,
    pub ncols: usize,
    /// Stored entries, column-contiguous.
    pub values: Vec<T>,
    /// Row of each stored entry.
    pub row_indices: Vec<usize>,
    /// Offsets into `values`/`row_indices`; column j occupies
    /// `col_pointers[j]..col_pointers[j + 1]`.
    pub col_pointers: Vec<usize>,
}

/// Sparse matrix in Compressed Sparse Row format.
#[derive(Debug, Clone)]
pub struct CsrMatrix<T> {
    pub nrows: usize,
    pub ncols: usize,
    /// Stored entries, row-contiguous.
    pub values: Vec<T>,
    /// Column of each stored entry.
    pub col_indices: Vec<usize>,
    /// Offsets into `values`/`col_indices`; row i occupies
    /// `row_pointers[i]..row_pointers[i + 1]`.
    pub row_pointers: Vec<usize>,
}

/// Assembly shared by both layouts. Entries are scattered into one bucket per
/// major slice (column for CSC, row for CSR), each bucket is ordered by its
/// minor index, and repeated positions fold into a single stored value while
/// the buckets flatten into the compressed arrays.
///
/// Returns (values, minor_indices, major_pointers).
fn compress<T, I>(nmajor: usize, entries: I) -> (Vec<T>, Vec<usize>, Vec<usize>)
where
    T: Copy + AddAssign,
    I: Iterator<Item = (usize, usize, T)>,
{
    let mut buckets: Vec<Vec<(usize, T)>> = vec![Vec::new(); nmajor];
    for (major, minor, val) in entries {
        buckets[major].push((minor, val));
    }

    let total: usize = buckets.iter().map(|b| b.len()).sum();
    let mut values = Vec::with_capacity(total);
    let mut minor_indices = Vec::with_capacity(total);
    let mut pointers = Vec::with_capacity(nmajor + 1);
    pointers.push(0);

    for bucket in &mut buckets {
        bucket.sort_unstable_by_key(|entry| entry.0);
        let slice_start = minor_indices.len();
        for &(minor, val) in bucket.iter() {
            let dup = minor_indices.len() > slice_start
                && minor_indices[minor_indices.len() - 1] == minor;
            if dup {
                let tail = values.len() - 1;
                values[tail] += val;
            } else {
                minor_indices.push(minor);
                values.push(val);
            }
        }
        pointers.push(minor_indices.len());
    }

    (values, minor_indices, pointers)
}

impl<T: Copy + Default + AddAssign> CscMatrix<T> {
    /// An all-zero matrix of the given shape.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            values: Vec::new(),
            row_indices: Vec::new(),
            col_pointers: vec![0; ncols + 1],
        }
    }

    /// Count of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Build from (row, col, value) triplets; entries landing on the same
    /// position accumulate.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, T)]) -> Self {
        let (values, row_indices, col_pointers) =
            compress(ncols, triplets.iter().map(|&(r, c, v)| (c, r, v)));
        Self {
            nrows,
            ncols,
            values,
            row_indices,
            col_pointers,
        }
    }

    /// Expand to a dense row-major grid; intended for tests and tiny systems.
    pub fn to_dense(&self) -> Vec<Vec<T>> {
        let mut dense = vec![vec![T::default(); self.ncols]; self.nrows];
        for col in 0..self.ncols {
            for idx in self.col_pointers[col]..self.col_pointers[col + 1] {
                dense[self.row_indices[idx]][col] = self.values[idx];
            }
        }
        dense
    }
}

impl<T: Copy + Default + AddAssign> CsrMatrix<T> {
    /// An all-zero matrix of the given shape.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_pointers: vec![0; nrows + 1],
        }
    }

    /// Count of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Build from (row, col, value) triplets; entries landing on the same
    /// position accumulate.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, T)]) -> Self {
        let (values, col_indices, row_pointers) = compress(nrows, triplets.iter().copied());
        Self {
            nrows,
            ncols,
            values,
            col_indices,
            row_pointers,
        }
    }

    /// Expand to a dense row-major grid; intended for tests and tiny systems.
    pub fn to_dense(&self) -> Vec<Vec<T>> {
        let mut dense = vec![vec![T::default(); self.ncols]; self.nrows];
        for row in 0..self.nrows {
            for idx in self.row_pointers[row]..self.row_pointers[row + 1] {
                dense[row][self.col_indices[idx]] = self.values[idx];
            }
        }
        dense
    }
}

impl CscMatrix<Complex64> {
    /// Split into real and imaginary parts, row-sliced (CSR) so that the
    /// slice for index i holds row i of the matrix. Both outputs share one
    /// sparsity pattern: an entry present in only one part appears in both
    /// with a zero in the other.
    pub fn split_real_imag(&self) -> (CsrMatrix<f64>, CsrMatrix<f64>) {
        let mut re = Vec::with_capacity(self.nnz());
        let mut im = Vec::with_capacity(self.nnz());
        for col in 0..self.ncols {
            for idx in self.col_pointers[col]..self.col_pointers[col + 1] {
                let row = self.row_indices[idx];
                let v = self.values[idx];
                re.push((row, col, v.re));
                im.push((row, col, v.im));
            }
        }
        (
            CsrMatrix::from_triplets(self.nrows, self.ncols, &re),
            CsrMatrix::from_triplets(self.nrows, self.ncols, &im),
        )
    }
}

/// Storage-layout seam shared by the linear solvers, the preconditioner, and
/// the AD uncompression scatter. One implementation per layout; identical
/// semantics, different iteration discipline.
pub trait SparseLayout: Clone + Send + Sync {
    fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self;

    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;
    fn nnz(&self) -> usize;

    /// Sparse matrix-vector multiply: y = A * x.
    fn spmv(&self, x: &[f64], y: &mut [f64]);

    /// Scatter from the color-compressed derivative matrix into the stored
    /// values: entry (i, j) receives `jc[coloring[j] * nrows + i]`. The
    /// pattern is fixed, so this touches every stored position exactly once.
    fn uncompress(&mut self, coloring: &[usize], jc: &[f64]);

    /// Visit every stored entry as (row, col, value).
    fn for_each_entry(&self, f: impl FnMut(usize, usize, f64));
}

impl SparseLayout for CscMatrix<f64> {
    fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        CscMatrix::from_triplets(nrows, ncols, triplets)
    }

    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn nnz(&self) -> usize {
        self.values.len()
    }

    fn spmv(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols, "spmv input length must equal ncols");
        assert_eq!(y.len(), self.nrows, "spmv output length must equal nrows");
        y.fill(0.0);
        for col in 0..self.ncols {
            let xj = x[col];
            for idx in self.col_pointers[col]..self.col_pointers[col + 1] {
                y[self.row_indices[idx]] += self.values[idx] * xj;
            }
        }
    }

    fn uncompress(&mut self, coloring: &[usize], jc: &[f64]) {
        let nrows = self.nrows;
        for col in 0..self.ncols {
            let base = coloring[col] * nrows;
            for idx in self.col_pointers[col]..self.col_pointers[col + 1] {
                self.values[idx] = jc[base + self.row_indices[idx]];
            }
        }
    }

    fn for_each_entry(&self, mut f: impl FnMut(usize, usize, f64)) {
        for col in 0..self.ncols {
            for idx in self.col_pointers[col]..self.col_pointers[col + 1] {
                f(self.row_indices[idx], col, self.values[idx]);
            }
        }
    }
}

impl SparseLayout for CsrMatrix<f64> {
    fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        CsrMatrix::from_triplets(nrows, ncols, triplets)
    }

    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn nnz(&self) -> usize {
        self.values.len()
    }

    fn spmv(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols, "spmv input length must equal ncols");
        assert_eq!(y.len(), self.nrows, "spmv output length must equal nrows");
        y.par_iter_mut().enumerate().for_each(|(row, out)| {
            let mut sum = 0.0;
            for idx in self.row_pointers[row]..self.row_pointers[row + 1] {
                sum += self.values[idx] * x[self.col_indices[idx]];
            }
            *out = sum;
        });
    }

    fn uncompress(&mut self, coloring: &[usize], jc: &[f64]) {
        let nrows = self.nrows;
        let col_indices = &self.col_indices;
        let row_pointers = &self.row_pointers;
        // Each row owns a disjoint slice of values, so rows scatter in parallel.
        let mut row_slices: Vec<(usize, &mut [f64])> = Vec::with_capacity(nrows);
        let mut rest = self.values.as_mut_slice();
        for row in 0..nrows {
            let len = row_pointers[row + 1] - row_pointers[row];
            let (head, tail) = rest.split_at_mut(len);
            row_slices.push((row, head));
            rest = tail;
        }
        row_slices.into_par_iter().for_each(|(row, vals)| {
            let start = row_pointers[row];
            for (k, v) in vals.iter_mut().enumerate() {
                *v = jc[coloring[col_indices[start + k]] * nrows + row];
            }
        });
    }

    fn for_each_entry(&self, mut f: impl FnMut(usize, usize, f64)) {
        for row in 0..self.nrows {
            for idx in self.row_pointers[row]..self.row_pointers[row + 1] {
                f(row, self.col_indices[idx], self.values[idx]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matrices() {
        let c: CscMatrix<f64> = CscMatrix::new(3, 3);
        assert_eq!(c.nnz(), 0);
        assert_eq!(c.col_pointers, vec![0, 0, 0, 0]);
        let r: CsrMatrix<f64> = CsrMatrix::new(3, 3);
        assert_eq!(r.nnz(), 0);
        assert_eq!(r.row_pointers, vec![0, 0, 0, 0]);
    }

    #[test]
    fn from_triplets_duplicates_summed() {
        let triplets = vec![(0, 0, 1.0), (0, 0, 2.0), (1, 1, 3.0)];
        let c = CscMatrix::from_triplets(2, 2, &triplets);
        assert_eq!(c.nnz(), 2);
        assert_eq!(c.to_dense(), vec![vec![3.0, 0.0], vec![0.0, 3.0]]);
        let r = CsrMatrix::from_triplets(2, 2, &triplets);
        assert_eq!(r.nnz(), 2);
        assert_eq!(r.to_dense(), vec![vec![3.0, 0.0], vec![0.0, 3.0]]);
    }

    #[test]
    fn layouts_agree_on_dense_form() {
        let triplets = vec![(0, 0, 2.0), (0, 1, 1.0), (1, 2, -3.0), (2, 0, 4.0)];
        let c = CscMatrix::from_triplets(3, 3, &triplets);
        let r = CsrMatrix::from_triplets(3, 3, &triplets);
        assert_eq!(c.to_dense(), r.to_dense());
    }

    #[test]
    fn spmv_both_layouts() {
        // [[2, 1, 0], [0, 3, 0], [1, 0, 1]] * [1, 2, 3] = [4, 6, 4]
        let triplets = vec![(0, 0, 2.0), (0, 1, 1.0), (1, 1, 3.0), (2, 0, 1.0), (2, 2, 1.0)];
        let x = vec![1.0, 2.0, 3.0];
        let mut y = vec![0.0; 3];

        let c = CscMatrix::from_triplets(3, 3, &triplets);
        SparseLayout::spmv(&c, &x, &mut y);
        assert_eq!(y, vec![4.0, 6.0, 4.0]);

        let r = CsrMatrix::from_triplets(3, 3, &triplets);
        SparseLayout::spmv(&r, &x, &mut y);
        assert_eq!(y, vec![4.0, 6.0, 4.0]);
    }

    #[test]
    fn uncompress_scatters_by_color() {
        // 2x2 diagonal pattern, columns colored 0 and 0 (disjoint rows).
        let triplets = vec![(0, 0, 0.0), (1, 1, 0.0)];
        let coloring = vec![0, 0];
        // jc is 1 color x 2 rows: dF0/dseed0 = 5, dF1/dseed0 = 7
        let jc = vec![5.0, 7.0];

        let mut c = CscMatrix::from_triplets(2, 2, &triplets);
        c.uncompress(&coloring, &jc);
        assert_eq!(c.to_dense(), vec![vec![5.0, 0.0], vec![0.0, 7.0]]);

        let mut r = CsrMatrix::from_triplets(2, 2, &triplets);
        r.uncompress(&coloring, &jc);
        assert_eq!(r.to_dense(), vec![vec![5.0, 0.0], vec![0.0, 7.0]]);
    }

    #[test]
    fn split_real_imag_recombines() {
        let y = Complex64::new(1.5, -4.0);
        let triplets = vec![
            (0, 0, y),
            (0, 1, -y),
            (1, 0, -y),
            (1, 1, Complex64::new(0.0, 2.0)),
        ];
        let m = CscMatrix::from_triplets(2, 2, &triplets);
        let (g, b) = m.split_real_imag();
        assert_eq!(g.nnz(), b.nnz());

        let dense = m.to_dense();
        let gd = g.to_dense();
        let bd = b.to_dense();
        for i in 0..2 {
            for j in 0..2 {
                assert_eq!(dense[i][j], Complex64::new(gd[i][j], bd[i][j]));
            }
        }
    }
}
