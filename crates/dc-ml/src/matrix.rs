//! Shape checks and column statistics over `ndarray` matrices.

use dc_types::{ModelError, ModelResult};
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Rows are examples, columns are features.
pub type Matrix = Array2<f64>;

/// Targets and predictions, one entry per row.
pub type Vector = Array1<f64>;

/// Number of columns, validating that the matrix has rows and columns.
pub fn check_non_empty(x: &Matrix, estimator: &str) -> ModelResult<usize> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ModelError::EmptyInput {
            estimator: estimator.to_string(),
        });
    }
    Ok(x.ncols())
}

pub fn check_cols(x: &Matrix, expected: usize) -> ModelResult<()> {
    if x.ncols() != expected {
        return Err(ModelError::ShapeMismatch {
            expected,
            actual: x.ncols(),
        });
    }
    Ok(())
}

pub fn check_targets(x: &Matrix, y: &Vector) -> ModelResult<()> {
    if x.nrows() != y.len() {
        return Err(ModelError::ShapeMismatch {
            expected: x.nrows(),
            actual: y.len(),
        });
    }
    Ok(())
}

fn sorted(v: ArrayView1<f64>) -> Vec<f64> {
    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Linear-interpolated quantile, `q` in [0, 1].
pub fn quantile(v: ArrayView1<f64>, q: f64) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    let sorted = sorted(v);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let t = pos - lo as f64;
    sorted[lo] + t * (sorted[hi] - sorted[lo])
}

pub fn median(v: ArrayView1<f64>) -> f64 {
    quantile(v, 0.5)
}

/// Most frequent value; ties resolve to the smallest value.
pub fn mode(v: ArrayView1<f64>) -> f64 {
    let sorted = sorted(v);
    let mut best = (0.0, 0usize);
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        if j - i > best.1 {
            best = (sorted[i], j - i);
        }
        i = j;
    }
    best.0
}

/// Sorted distinct labels.
pub fn sorted_classes(y: ArrayView1<f64>) -> Vec<f64> {
    let mut classes = sorted(y);
    classes.dedup();
    classes
}

/// Position of `label` among `classes`, 0 when absent.
pub fn class_index(classes: &[f64], label: f64) -> usize {
    classes.iter().position(|c| *c == label).unwrap_or(0)
}

/// Row-wise softmax in place.
pub fn softmax_rows(logits: &mut Matrix) {
    for mut row in logits.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|l| (l - max).exp());
        let sum = row.sum();
        row /= sum;
    }
}

/// Label of the largest entry of each row; the first maximum wins.
pub fn argmax_labels(scores: &Matrix, classes: &[f64]) -> Vector {
    scores
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for (i, p) in row.iter().enumerate() {
                if *p > row[best] {
                    best = i;
                }
            }
            classes[best]
        })
        .collect()
}

/// One-hot rows of class positions.
pub fn one_hot(y: &Vector, classes: &[f64]) -> Matrix {
    let mut out = Matrix::zeros((y.len(), classes.len()));
    for (i, label) in y.iter().enumerate() {
        out[[i, class_index(classes, *label)]] = 1.0;
    }
    out
}

/// Column means and population variances.
pub fn column_moments(x: &Matrix) -> (Vector, Vector) {
    let mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let var = if x.nrows() == 0 {
        Array1::zeros(x.ncols())
    } else {
        x.var_axis(Axis(0), 0.0)
    };
    (mean, var)
}

/// `xᵀx / n` for an already centered matrix.
pub fn gram(x: &Matrix) -> Matrix {
    x.t().dot(x) / x.nrows().max(1) as f64
}

/// Leading eigenpairs of a symmetric matrix via power iteration with
/// deflation.
pub fn top_eigen(sym: &Matrix, k: usize, iterations: usize) -> Vec<(f64, Vector)> {
    let n = sym.nrows();
    let mut a = sym.clone();
    let mut pairs = Vec::with_capacity(k);
    for component in 0..k.min(n) {
        // deterministic, non-degenerate start vector
        let mut v = Array1::from_shape_fn(n, |i| 1.0 + ((i + component) % 7) as f64 * 0.1);
        v /= v.dot(&v).sqrt();
        let mut lambda = 0.0;
        for _ in 0..iterations {
            let w = a.dot(&v);
            let norm = w.dot(&w).sqrt();
            if norm < 1e-12 {
                break;
            }
            lambda = norm;
            v = w / norm;
        }
        let vv = v.view().insert_axis(Axis(1));
        a = a - &(vv.dot(&vv.t()) * lambda);
        pairs.push((lambda, v));
    }
    pairs
}

const JACOBI_SWEEPS: usize = 64;

/// Full eigendecomposition of a small symmetric matrix by cyclic Jacobi
/// rotations. Eigenvectors are the columns of the returned matrix.
pub fn symmetric_eigen(sym: &Matrix) -> (Vector, Matrix) {
    let n = sym.nrows();
    let mut a = sym.clone();
    let mut v = Matrix::eye(n);
    for _ in 0..JACOBI_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in p + 1..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off < 1e-24 {
            break;
        }
        for p in 0..n {
            for q in p + 1..n {
                let apq = a[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let (akp, akq) = (a[[k, p]], a[[k, q]]);
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[[p, k]], a[[q, k]]);
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let (vkp, vkq) = (v[[k, p]], v[[k, q]]);
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }
    (a.diag().to_owned(), v)
}

/// Solves `a · x = b` by Gaussian elimination with partial pivoting.
/// `None` when `a` is singular.
pub fn solve(mut a: Matrix, mut b: Vector) -> Option<Vector> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn quantiles_interpolate() {
        let v = array![4.0, 1.0, 3.0, 2.0];
        assert_eq!(median(v.view()), 2.5);
        assert_eq!(quantile(v.view(), 0.0), 1.0);
        assert_eq!(quantile(v.view(), 1.0), 4.0);
    }

    #[test]
    fn mode_prefers_smallest_on_tie() {
        assert_eq!(mode(array![3.0, 1.0, 3.0, 1.0, 2.0].view()), 1.0);
        assert_eq!(mode(array![5.0, 5.0, 1.0].view()), 5.0);
    }

    #[test]
    fn empty_matrix_is_rejected() {
        assert!(check_non_empty(&Matrix::zeros((0, 3)), "test").is_err());
        assert!(check_non_empty(&Matrix::zeros((3, 0)), "test").is_err());
        assert_eq!(check_non_empty(&Matrix::zeros((2, 3)), "test").unwrap(), 3);
        assert!(check_cols(&Matrix::zeros((2, 3)), 2).is_err());
    }

    #[test]
    fn moments_are_per_column() {
        let x = array![[1.0, 10.0], [3.0, 10.0]];
        let (mean, var) = column_moments(&x);
        assert_eq!(mean, array![2.0, 10.0]);
        assert_eq!(var, array![1.0, 0.0]);
    }

    #[test]
    fn power_iteration_finds_dominant_axis() {
        let sym = array![[4.0, 0.0], [0.0, 1.0]];
        let pairs = top_eigen(&sym, 2, 200);
        assert!((pairs[0].0 - 4.0).abs() < 1e-6);
        assert!(pairs[0].1[0].abs() > 0.99);
        assert!((pairs[1].0 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn jacobi_diagonalizes_symmetric_matrix() {
        let sym = array![[2.0, 1.0, 0.0], [1.0, 2.0, 0.0], [0.0, 0.0, 5.0]];
        let (values, vectors) = symmetric_eigen(&sym);
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        assert!((sorted[0] - 1.0).abs() < 1e-10);
        assert!((sorted[1] - 3.0).abs() < 1e-10);
        assert!((sorted[2] - 5.0).abs() < 1e-10);
        // V diag(λ) Vᵀ rebuilds the input
        let rebuilt = (&vectors * &values).dot(&vectors.t());
        for (a, b) in rebuilt.iter().zip(sym.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn gaussian_elimination_solves_and_detects_singularity() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let x = solve(a, array![3.0, 5.0]).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
        assert!(solve(array![[1.0, 2.0], [2.0, 4.0]], array![1.0, 2.0]).is_none());
    }
}
