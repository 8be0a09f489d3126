pub use nalgebra::{DMatrix, DVector};
pub use rand::Rng;
pub use rand_distr::StandardNormal;

/// Singular values below `PINV_RTOL * n * max(sv)` are treated as zero
const PINV_RTOL: f64 = f64::EPSILON;

/// Sample d,n matrix from N(0,1) with a caller-supplied generator
/// (simulations need reproducible draws)
pub fn rnorm_with<R: Rng + ?Sized>(dd: usize, nn: usize, rng: &mut R) -> DMatrix<f64> {
    let rvec = (0..(dd * nn)).map(|_| rng.sample(StandardNormal)).collect();
    DMatrix::<f64>::from_vec(dd, nn, rvec)
}

/// Inverse of a symmetric (covariance or precision) matrix.
///
/// Tries Cholesky first, then LU, and finally the Moore-Penrose
/// pseudo-inverse, so a singular or ill-conditioned input never panics.
/// Empty matrices map to empty matrices.
pub fn robust_inverse(xx: &DMatrix<f64>) -> DMatrix<f64> {
    if xx.is_empty() {
        return DMatrix::zeros(xx.ncols(), xx.nrows());
    }

    if let Some(chol) = xx.clone().cholesky() {
        let inv = chol.inverse();
        if inv.iter().all(|x| x.is_finite()) {
            return inv;
        }
    }

    if let Some(inv) = xx.clone().try_inverse() {
        if inv.iter().all(|x| x.is_finite()) {
            return inv;
        }
    }

    pseudo_inverse(xx)
}

/// Moore-Penrose pseudo-inverse via SVD
pub fn pseudo_inverse(xx: &DMatrix<f64>) -> DMatrix<f64> {
    if xx.is_empty() {
        return DMatrix::zeros(xx.ncols(), xx.nrows());
    }
    let svd = xx.clone().svd(true, true);
    let smax = svd.singular_values.max();
    let tol = PINV_RTOL * (xx.nrows().max(xx.ncols()) as f64) * smax;
    svd.pseudo_inverse(tol)
        .unwrap_or_else(|_| DMatrix::zeros(xx.ncols(), xx.nrows()))
}

/// log|X| of a symmetric positive (semi-)definite matrix.
///
/// Falls back to the sum of log positive eigenvalues when Cholesky
/// fails, i.e., the log pseudo-determinant.
pub fn log_det(xx: &DMatrix<f64>) -> f64 {
    if xx.is_empty() {
        return 0.0;
    }

    if let Some(chol) = xx.clone().cholesky() {
        return 2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>();
    }

    let eig = xx.clone().symmetric_eigen();
    let emax = eig.eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
    let tol = PINV_RTOL * (xx.nrows() as f64) * emax;
    eig.eigenvalues
        .iter()
        .filter(|&&e| e > tol)
        .map(|e| e.ln())
        .sum()
}

/// trace(A * B) without forming the product
pub fn trace_product(aa: &DMatrix<f64>, bb: &DMatrix<f64>) -> f64 {
    debug_assert_eq!(aa.ncols(), bb.nrows());
    debug_assert_eq!(aa.nrows(), bb.ncols());
    aa.component_mul(&bb.transpose()).sum()
}

/// (X + X')/2
pub fn symmetrize(xx: &DMatrix<f64>) -> DMatrix<f64> {
    (xx + xx.transpose()) * 0.5
}

/// Block-diagonal matrix from a list of square blocks
pub fn block_diagonal(blocks: &[&DMatrix<f64>]) -> DMatrix<f64> {
    let n: usize = blocks.iter().map(|b| b.nrows()).sum();
    let mut ret = DMatrix::<f64>::zeros(n, n);
    let mut offset = 0;
    for b in blocks {
        let k = b.nrows();
        ret.view_mut((offset, offset), (k, k)).copy_from(*b);
        offset += k;
    }
    ret
}

/// Stack vectors on top of each other
pub fn concatenate_vectors(vecs: &[&DVector<f64>]) -> DVector<f64> {
    DVector::from_iterator(
        vecs.iter().map(|v| v.len()).sum(),
        vecs.iter().flat_map(|v| v.iter().cloned()),
    )
}
