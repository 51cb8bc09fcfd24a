use faer::{Mat, MatRef};

/// Truncated pseudo-inverse
#[derive(Debug, Clone)]
pub struct Pinv {
    pub(crate) mat: Mat<f64>,
    /// Number of singular values kept in the inversion
    pub rank: usize,
    /// Singular values of the inverted matrix in decreasing order
    pub singular_values: Vec<f64>,
    /// Ratio of the largest to the smallest singular value kept
    pub cond: f64,
}

impl Pinv {
    pub fn mat_ref(&self) -> MatRef<'_, f64> {
        self.mat.as_ref()
    }
    /// Returns the pseudo-inverse column wise
    pub fn to_column_major(&self) -> Vec<f64> {
        let (n_rows, n_cols) = (self.mat.nrows(), self.mat.ncols());
        (0..n_cols)
            .flat_map(|j| (0..n_rows).map(move |i| (i, j)))
            .map(|(i, j)| self.mat.read(i, j))
            .collect()
    }
}

/// Computes the pseudo-inverse of a matrix from its SVD decomposition
///
/// Singular values smaller or equal to `rcond` times the largest singular value
/// are discarded. Returns `None` if no singular value is left.
pub fn pseudoinverse(mat: MatRef<'_, f64>, rcond: f64) -> Option<Pinv> {
    let (m, n) = (mat.nrows(), mat.ncols());
    if m == 0 || n == 0 {
        return None;
    }
    let svd = mat.svd();
    let s = svd.s_diagonal();
    let singular_values: Vec<f64> = (0..s.nrows()).map(|i| s.read(i)).collect();
    let s_max = singular_values.first().copied().unwrap_or_default();
    if s_max.is_nan() || s_max <= 0f64 {
        return None;
    }
    let tol = rcond.max(0f64) * s_max;
    let rank = singular_values
        .iter()
        .take_while(|&&s| s > tol && s.is_finite())
        .count();
    if rank == 0 {
        return None;
    }
    let (u, v) = (svd.u(), svd.v());
    let mat = Mat::<f64>::from_fn(n, m, |i, j| {
        (0..rank)
            .map(|k| v.read(i, k) * u.read(j, k) / singular_values[k])
            .sum()
    });
    Some(Pinv {
        mat,
        rank,
        cond: s_max / singular_values[rank - 1],
        singular_values,
    })
}
