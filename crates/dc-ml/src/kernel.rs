//! Kernel feature preprocessors: Nystroem approximation and kernel PCA.

use dc_types::{ModelError, ModelResult};
use ndarray::Axis;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::decomposition::{not_fitted, POWER_ITERATIONS};
use crate::matrix::{self, Matrix, Vector};
use crate::Transformer;

const MIN_EIGENVALUE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    Linear,
    Poly,
    Rbf,
    Sigmoid,
    Cosine,
}

impl KernelKind {
    pub fn parse(s: &str) -> ModelResult<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "poly" => Ok(Self::Poly),
            "rbf" => Ok(Self::Rbf),
            "sigmoid" => Ok(Self::Sigmoid),
            "cosine" => Ok(Self::Cosine),
            other => Err(ModelError::InvalidParameter {
                estimator: "Kernel".to_string(),
                parameter: "kernel".to_string(),
                message: format!("unknown kernel {other}"),
            }),
        }
    }
}

/// A pairwise kernel with its shape parameters.
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    pub kind: KernelKind,
    pub gamma: f64,
    pub degree: i32,
    pub coef0: f64,
}

impl Kernel {
    pub fn rbf(gamma: f64) -> Self {
        Self {
            kind: KernelKind::Rbf,
            gamma,
            degree: 3,
            coef0: 1.0,
        }
    }

    pub fn linear() -> Self {
        Self {
            kind: KernelKind::Linear,
            gamma: 1.0,
            degree: 1,
            coef0: 0.0,
        }
    }

    /// `a.nrows() x b.nrows()` kernel values.
    pub fn matrix(&self, a: &Matrix, b: &Matrix) -> Matrix {
        let cross = a.dot(&b.t());
        let (gamma, coef0) = (self.gamma, self.coef0);
        match self.kind {
            KernelKind::Linear => cross,
            KernelKind::Poly => {
                let degree = self.degree;
                cross.mapv(|v| (gamma * v + coef0).powi(degree))
            }
            KernelKind::Sigmoid => cross.mapv(|v| (gamma * v + coef0).tanh()),
            KernelKind::Rbf => {
                let (na, nb) = (row_norms_sq(a), row_norms_sq(b));
                let mut k = cross;
                for ((i, j), v) in k.indexed_iter_mut() {
                    let dist = (na[i] + nb[j] - 2.0 * *v).max(0.0);
                    *v = (-gamma * dist).exp();
                }
                k
            }
            KernelKind::Cosine => {
                let na = row_norms_sq(a).mapv(f64::sqrt);
                let nb = row_norms_sq(b).mapv(f64::sqrt);
                let mut k = cross;
                for ((i, j), v) in k.indexed_iter_mut() {
                    let norm = na[i] * nb[j];
                    *v = if norm > 0.0 { *v / norm } else { 0.0 };
                }
                k
            }
        }
    }

    fn validate(&self, estimator: &str) -> ModelResult<()> {
        if self.gamma <= 0.0 {
            return Err(ModelError::InvalidParameter {
                estimator: estimator.to_string(),
                parameter: "gamma".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn row_norms_sq(x: &Matrix) -> Vector {
    x.map_axis(Axis(1), |r| r.dot(&r))
}

/// Low-rank kernel map built from a random subset of training rows.
#[derive(Debug, Clone)]
pub struct Nystroem {
    pub kernel: Kernel,
    pub n_components: usize,
    pub seed: u64,
    fitted: Option<NystroemState>,
}

#[derive(Debug, Clone)]
struct NystroemState {
    basis: Matrix,
    /// `n_basis x n_components`, the inverse square root of the basis
    /// kernel restricted to its non-null eigenvectors.
    normalization: Matrix,
}

impl Nystroem {
    pub fn new(kernel: Kernel, n_components: usize, seed: u64) -> Self {
        Self {
            kernel,
            n_components,
            seed,
            fitted: None,
        }
    }
}

impl Transformer for Nystroem {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        matrix::check_non_empty(x, "Nystroem")?;
        self.kernel.validate("Nystroem")?;
        if self.n_components == 0 {
            return Err(ModelError::InvalidParameter {
                estimator: "Nystroem".to_string(),
                parameter: "n_components".to_string(),
                message: "must be positive".to_string(),
            });
        }
        let mut rows: Vec<usize> = (0..x.nrows()).collect();
        rows.shuffle(&mut ChaCha8Rng::seed_from_u64(self.seed));
        rows.truncate(self.n_components);
        let basis = x.select(Axis(0), &rows);

        let (values, vectors) = matrix::symmetric_eigen(&self.kernel.matrix(&basis, &basis));
        let keep: Vec<usize> = (0..values.len()).filter(|&j| values[j] > MIN_EIGENVALUE).collect();
        if keep.is_empty() {
            return Err(ModelError::FitFailed {
                estimator: "Nystroem".to_string(),
                message: "basis kernel is singular".to_string(),
            });
        }
        let scales = values.select(Axis(0), &keep).mapv(f64::sqrt);
        let normalization = vectors.select(Axis(1), &keep) / &scales;
        self.fitted = Some(NystroemState { basis, normalization });
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        let state = self.fitted.as_ref().ok_or_else(|| not_fitted("Nystroem"))?;
        matrix::check_cols(x, state.basis.ncols())?;
        Ok(self.kernel.matrix(x, &state.basis).dot(&state.normalization))
    }

    fn name(&self) -> &str {
        "Nystroem"
    }
}

/// Principal components of the centered kernel matrix.
#[derive(Debug, Clone)]
pub struct KernelPca {
    pub kernel: Kernel,
    /// `None` keeps every component with a non-zero eigenvalue.
    pub n_components: Option<usize>,
    fitted: Option<KernelPcaState>,
}

#[derive(Debug, Clone)]
struct KernelPcaState {
    x_fit: Matrix,
    column_means: Vector,
    total_mean: f64,
    /// `n_train x n_components` eigenvectors scaled by `1/sqrt(λ)`.
    alphas: Matrix,
}

impl KernelPca {
    pub fn new(kernel: Kernel, n_components: Option<usize>) -> Self {
        Self {
            kernel,
            n_components,
            fitted: None,
        }
    }
}

impl Transformer for KernelPca {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        matrix::check_non_empty(x, "KernelPCA")?;
        self.kernel.validate("KernelPCA")?;
        let n = x.nrows();
        let k = self.kernel.matrix(x, x);
        let column_means = k.mean_axis(Axis(0)).unwrap_or_else(|| Vector::zeros(n));
        let total_mean = column_means.mean().unwrap_or(0.0);
        let row_means = column_means.view().insert_axis(Axis(1));
        let centered = &k - &column_means - &row_means + total_mean;

        let wanted = self.n_components.unwrap_or(n).clamp(1, n);
        let pairs: Vec<(f64, Vector)> = matrix::top_eigen(&centered, wanted, POWER_ITERATIONS)
            .into_iter()
            .filter(|(lambda, _)| *lambda > MIN_EIGENVALUE)
            .collect();
        if pairs.is_empty() {
            return Err(ModelError::FitFailed {
                estimator: "KernelPCA".to_string(),
                message: "centered kernel has no positive eigenvalue".to_string(),
            });
        }
        let mut alphas = Matrix::zeros((n, pairs.len()));
        for (j, (lambda, v)) in pairs.iter().enumerate() {
            alphas.column_mut(j).assign(&(v / lambda.sqrt()));
        }
        self.fitted = Some(KernelPcaState {
            x_fit: x.clone(),
            column_means,
            total_mean,
            alphas,
        });
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        let state = self.fitted.as_ref().ok_or_else(|| not_fitted("KernelPCA"))?;
        matrix::check_cols(x, state.x_fit.ncols())?;
        let k = self.kernel.matrix(x, &state.x_fit);
        let row_means = k
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Vector::zeros(x.nrows()))
            .insert_axis(Axis(1));
        let centered = &k - &state.column_means - &row_means + state.total_mean;
        Ok(centered.dot(&state.alphas))
    }

    fn name(&self) -> &str {
        "KernelPCA"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn points() -> Matrix {
        array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 2.0]]
    }

    #[test]
    fn rbf_kernel_values() {
        let x = array![[0.0, 0.0], [1.0, 1.0]];
        let k = Kernel::rbf(0.5).matrix(&x, &x);
        assert!((k[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((k[[0, 1]] - (-1.0f64).exp()).abs() < 1e-12);
        assert_eq!(KernelKind::parse("cosine").unwrap(), KernelKind::Cosine);
        assert!(KernelKind::parse("laplacian").is_err());
    }

    #[test]
    fn nystroem_with_full_basis_reproduces_kernel() {
        let x = points();
        let kernel = Kernel::rbf(0.5);
        let mut nystroem = Nystroem::new(kernel, 100, 3);
        let z = nystroem.fit_transform(&x).unwrap();
        let approx = z.dot(&z.t());
        let exact = kernel.matrix(&x, &x);
        for (a, b) in approx.iter().zip(exact.iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn nystroem_subsamples_basis() {
        let mut nystroem = Nystroem::new(Kernel::rbf(1.0), 2, 9);
        let z = nystroem.fit_transform(&points()).unwrap();
        assert_eq!(z.dim(), (5, 2));
        let mut bad = Nystroem::new(Kernel::rbf(-1.0), 2, 9);
        assert!(bad.fit(&points()).is_err());
    }

    #[test]
    fn linear_kernel_pca_matches_pca_scores() {
        let x = Matrix::from_shape_fn((10, 2), |(i, j)| (j + 1) as f64 * i as f64);
        let mut kpca = KernelPca::new(Kernel::linear(), Some(1));
        let out = kpca.fit_transform(&x).unwrap();
        assert_eq!(out.ncols(), 1);
        let d0 = out[[1, 0]] - out[[0, 0]];
        let d1 = out[[2, 0]] - out[[1, 0]];
        assert!((d0 - d1).abs() < 1e-6);
        assert!((d0.abs() - 5f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn kernel_pca_requires_fit() {
        let kpca = KernelPca::new(Kernel::rbf(1.0), Some(2));
        assert!(matches!(
            kpca.transform(&points()),
            Err(ModelError::NotFitted { .. })
        ));
    }
}
