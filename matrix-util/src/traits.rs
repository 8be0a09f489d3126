use nalgebra::{DMatrix, DVector};

/// Read and write a subset of coordinates given by an index list
pub trait SubsetOps {
    type Sub;

    /// `self[idx]` for vectors, `self[idx, idx]` for square matrices
    fn subset(&self, idx: &[usize]) -> Self::Sub;

    /// `self[idx] = sub` for vectors, `self[idx, idx] = sub` for square matrices
    fn assign_subset(&mut self, idx: &[usize], sub: &Self::Sub);
}

impl SubsetOps for DVector<f64> {
    type Sub = DVector<f64>;

    fn subset(&self, idx: &[usize]) -> Self::Sub {
        DVector::from_iterator(idx.len(), idx.iter().map(|&i| self[i]))
    }

    fn assign_subset(&mut self, idx: &[usize], sub: &Self::Sub) {
        debug_assert_eq!(idx.len(), sub.len());
        for (k, &i) in idx.iter().enumerate() {
            self[i] = sub[k];
        }
    }
}

impl SubsetOps for DMatrix<f64> {
    type Sub = DMatrix<f64>;

    fn subset(&self, idx: &[usize]) -> Self::Sub {
        self.select_rows(idx.iter()).select_columns(idx.iter())
    }

    fn assign_subset(&mut self, idx: &[usize], sub: &Self::Sub) {
        debug_assert_eq!(idx.len(), sub.nrows());
        debug_assert_eq!(idx.len(), sub.ncols());
        for (c, &j) in idx.iter().enumerate() {
            for (r, &i) in idx.iter().enumerate() {
                self[(i, j)] = sub[(r, c)];
            }
        }
    }
}
