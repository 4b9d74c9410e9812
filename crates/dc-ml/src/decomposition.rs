//! Feature preprocessors: projections and feature expansions.

use dc_types::{ModelError, ModelResult};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::matrix::{self, Matrix, Vector};
use crate::Transformer;

pub(crate) const POWER_ITERATIONS: usize = 100;
const MAX_EXPANDED_FEATURES: usize = 5_000;

pub(crate) fn not_fitted(estimator: &str) -> ModelError {
    ModelError::NotFitted {
        estimator: estimator.to_string(),
    }
}

#[derive(Debug, Clone)]
struct Projection {
    offset: Vector,
    /// `n_components x n_features`.
    axes: Matrix,
    scales: Vector,
}

impl Projection {
    fn new(offset: Vector, pairs: Vec<(f64, Vector)>, scale: impl Fn(f64) -> f64) -> Self {
        let n_cols = offset.len();
        let mut axes = Array2::zeros((pairs.len(), n_cols));
        let mut scales = Array1::ones(pairs.len());
        for (i, (lambda, axis)) in pairs.into_iter().enumerate() {
            axes.row_mut(i).assign(&axis);
            scales[i] = scale(lambda);
        }
        Self { offset, axes, scales }
    }

    fn apply(&self, x: &Matrix) -> ModelResult<Matrix> {
        matrix::check_cols(x, self.offset.len())?;
        Ok((x - &self.offset).dot(&self.axes.t()) / &self.scales)
    }
}

/// Principal component analysis via power iteration on the covariance.
#[derive(Debug, Clone)]
pub struct Pca {
    /// `None` keeps every component.
    pub n_components: Option<usize>,
    pub whiten: bool,
    fitted: Option<Projection>,
}

impl Pca {
    pub fn new(n_components: Option<usize>, whiten: bool) -> Self {
        Self {
            n_components,
            whiten,
            fitted: None,
        }
    }
}

impl Transformer for Pca {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "PCA")?;
        let (offset, _) = matrix::column_moments(x);
        let centered = x - &offset;
        let k = self.n_components.unwrap_or(n_cols).clamp(1, n_cols);
        let pairs = matrix::top_eigen(&matrix::gram(&centered), k, POWER_ITERATIONS);
        let whiten = self.whiten;
        self.fitted = Some(Projection::new(offset, pairs, |lambda| {
            if whiten && lambda > 1e-12 {
                lambda.sqrt()
            } else {
                1.0
            }
        }));
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        self.fitted.as_ref().ok_or_else(|| not_fitted("PCA"))?.apply(x)
    }

    fn name(&self) -> &str {
        "PCA"
    }
}

/// Rank-k projection onto the top right singular vectors, without centering.
#[derive(Debug, Clone)]
pub struct TruncatedSvd {
    pub n_components: usize,
    fitted: Option<Projection>,
}

impl TruncatedSvd {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            fitted: None,
        }
    }
}

impl Transformer for TruncatedSvd {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "TruncatedSVD")?;
        let k = self.n_components.clamp(1, n_cols);
        let pairs = matrix::top_eigen(&matrix::gram(x), k, POWER_ITERATIONS);
        self.fitted = Some(Projection::new(Array1::zeros(n_cols), pairs, |_| 1.0));
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        self.fitted.as_ref().ok_or_else(|| not_fitted("TruncatedSVD"))?.apply(x)
    }

    fn name(&self) -> &str {
        "TruncatedSVD"
    }
}

/// Random Fourier features approximating an RBF kernel.
#[derive(Debug, Clone)]
pub struct RbfSampler {
    pub gamma: f64,
    pub n_components: usize,
    pub seed: u64,
    /// `n_features x n_components` weights and per-component offsets.
    fitted: Option<(Matrix, Vector)>,
}

impl RbfSampler {
    pub fn new(gamma: f64, n_components: usize, seed: u64) -> Self {
        Self {
            gamma,
            n_components,
            seed,
            fitted: None,
        }
    }
}

/// Standard normal draw via Box-Muller.
pub(crate) fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl Transformer for RbfSampler {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "RBFSampler")?;
        if self.gamma <= 0.0 || self.n_components == 0 {
            return Err(ModelError::InvalidParameter {
                estimator: "RBFSampler".to_string(),
                parameter: "gamma/n_components".to_string(),
                message: "must be positive".to_string(),
            });
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let std = (2.0 * self.gamma).sqrt();
        let weights =
            Array2::from_shape_simple_fn((n_cols, self.n_components), || std * standard_normal(&mut rng));
        let offsets = Array1::from_shape_simple_fn(self.n_components, || {
            rng.gen_range(0.0..2.0 * std::f64::consts::PI)
        });
        self.fitted = Some((weights, offsets));
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        let (weights, offsets) = self.fitted.as_ref().ok_or_else(|| not_fitted("RBFSampler"))?;
        matrix::check_cols(x, weights.nrows())?;
        let scale = (2.0 / self.n_components as f64).sqrt();
        Ok((x.dot(weights) + offsets).mapv(|v| scale * v.cos()))
    }

    fn name(&self) -> &str {
        "RBFSampler"
    }
}

/// Polynomial and interaction terms up to `degree`.
#[derive(Debug, Clone)]
pub struct PolynomialFeatures {
    pub degree: usize,
    pub interaction_only: bool,
    pub include_bias: bool,
    fitted: Option<(usize, Vec<Vec<usize>>)>,
}

impl PolynomialFeatures {
    pub fn new(degree: usize, interaction_only: bool, include_bias: bool) -> Self {
        Self {
            degree,
            interaction_only,
            include_bias,
            fitted: None,
        }
    }

    fn combinations(&self, n_cols: usize) -> Vec<Vec<usize>> {
        let mut terms: Vec<Vec<usize>> = Vec::new();
        if self.include_bias {
            terms.push(Vec::new());
        }
        let mut frontier: Vec<Vec<usize>> = vec![Vec::new()];
        for _ in 0..self.degree {
            let mut next = Vec::new();
            for term in &frontier {
                let start = match term.last() {
                    Some(&last) if self.interaction_only => last + 1,
                    Some(&last) => last,
                    None => 0,
                };
                for j in start..n_cols {
                    let mut t = term.clone();
                    t.push(j);
                    next.push(t);
                }
            }
            terms.extend(next.iter().cloned());
            frontier = next;
            if terms.len() > MAX_EXPANDED_FEATURES {
                break;
            }
        }
        terms
    }
}

impl Transformer for PolynomialFeatures {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "PolynomialFeatures")?;
        let terms = self.combinations(n_cols);
        if terms.len() > MAX_EXPANDED_FEATURES {
            return Err(ModelError::FitFailed {
                estimator: "PolynomialFeatures".to_string(),
                message: format!("more than {MAX_EXPANDED_FEATURES} output features"),
            });
        }
        self.fitted = Some((n_cols, terms));
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        let (n_cols, terms) = self.fitted.as_ref().ok_or_else(|| not_fitted("PolynomialFeatures"))?;
        matrix::check_cols(x, *n_cols)?;
        let mut out = Matrix::ones((x.nrows(), terms.len()));
        for (k, term) in terms.iter().enumerate() {
            let mut column = out.column_mut(k);
            for &j in term {
                column *= &x.column(j);
            }
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "PolynomialFeatures"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn line() -> Matrix {
        Matrix::from_shape_fn((10, 2), |(i, j)| (j + 1) as f64 * i as f64)
    }

    #[test]
    fn pca_collapses_collinear_data() {
        let mut pca = Pca::new(Some(1), false);
        let out = pca.fit_transform(&line()).unwrap();
        assert_eq!(out.ncols(), 1);
        // projections are evenly spaced along the line
        let d0 = out[[1, 0]] - out[[0, 0]];
        let d1 = out[[2, 0]] - out[[1, 0]];
        assert!((d0 - d1).abs() < 1e-6);
        assert!((d0.abs() - 5f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn truncated_svd_component_count_is_clamped() {
        let mut svd = TruncatedSvd::new(10);
        let out = svd.fit_transform(&line()).unwrap();
        assert_eq!(out.ncols(), 2);
    }

    #[test]
    fn rbf_sampler_is_seeded() {
        let mut a = RbfSampler::new(1.0, 8, 7);
        let mut b = RbfSampler::new(1.0, 8, 7);
        assert_eq!(a.fit_transform(&line()).unwrap(), b.fit_transform(&line()).unwrap());
        let out = a.transform(&line()).unwrap();
        let bound = (2.0f64 / 8.0).sqrt() + 1e-12;
        assert!(out.iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn polynomial_term_counts() {
        let x = array![[2.0, 3.0]];
        let mut full = PolynomialFeatures::new(2, false, true);
        // 1, a, b, a^2, ab, b^2
        assert_eq!(full.fit_transform(&x).unwrap(), array![[1.0, 2.0, 3.0, 4.0, 6.0, 9.0]]);
        let mut inter = PolynomialFeatures::new(2, true, false);
        assert_eq!(inter.fit_transform(&x).unwrap(), array![[2.0, 3.0, 6.0]]);
    }

    #[test]
    fn polynomial_expansion_is_capped() {
        let mut poly = PolynomialFeatures::new(3, false, true);
        assert!(matches!(
            poly.fit(&Matrix::zeros((2, 40))),
            Err(ModelError::FitFailed { .. })
        ));
    }
}
