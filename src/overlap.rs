//! Residual-overlap matrix for Pulay extrapolation.

use nalgebra::{DMatrix, DVector};

use crate::field::{overlap, FieldSet};

/// Symmetric matrix of pairwise residual inner products. Only the leading
/// `len() x len()` block is valid; each update recomputes just the newest
/// row and column, so the older entries are never touched again.
#[derive(Debug)]
pub struct OverlapMatrix {
    data: DMatrix<f64>,
    n: usize,
}

impl OverlapMatrix {
    pub fn new(capacity: usize) -> Self {
        OverlapMatrix {
            data: DMatrix::zeros(capacity, capacity),
            n: 0,
        }
    }

    /// Number of residuals covered by the valid block.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.nrows()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        debug_assert!(i < self.n && j < self.n);
        self.data[(i, j)]
    }

    /// Drop all entries; the valid block becomes empty. Called in lockstep
    /// with a history reset.
    pub fn reset(&mut self) {
        self.n = 0;
    }

    /// Extend the valid block with the inner products of the newest residual
    /// (the last element of `residuals`) against every residual in history,
    /// itself included.
    pub fn update(&mut self, residuals: &[&FieldSet], dv: f64) {
        let n = residuals.len();
        debug_assert!(n >= 1 && n <= self.capacity());
        let newest = residuals[n - 1];
        for (j, r) in residuals.iter().enumerate() {
            let s = overlap(r, newest, dv);
            self.data[(j, n - 1)] = s;
            self.data[(n - 1, j)] = s;
        }
        self.n = n;
    }

    /// The valid n x n block, as an owned matrix.
    pub fn submatrix(&self) -> DMatrix<f64> {
        self.data.view((0, 0), (self.n, self.n)).into_owned()
    }

    /// Symmetric eigen-decomposition of the valid block, eigenvalues in
    /// ascending order. nalgebra's `SymmetricEigen` returns unsorted pairs,
    /// so the ordering is enforced here; column 0 of the eigenvectors always
    /// belongs to the smallest eigenvalue.
    pub fn diagonalize(&self) -> (DVector<f64>, DMatrix<f64>) {
        let eig = self.submatrix().symmetric_eigen();

        let mut indices: Vec<usize> = (0..eig.eigenvalues.len()).collect();
        indices.sort_by(|&a, &b| {
            eig.eigenvalues[a]
                .partial_cmp(&eig.eigenvalues[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let eigenvalues = DVector::from_fn(indices.len(), |i, _| eig.eigenvalues[indices[i]]);
        let eigenvectors = eig.eigenvectors.select_columns(&indices);
        (eigenvalues, eigenvectors)
    }
}
