//! Data preprocessors: imputation, encoding, filtering and scaling.

use dc_types::{ModelError, ModelResult};
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

use crate::matrix::{self, Matrix, Vector};
use crate::Transformer;

fn not_fitted(estimator: &str) -> ModelError {
    ModelError::NotFitted {
        estimator: estimator.to_string(),
    }
}

pub(crate) fn invalid(estimator: &str, parameter: &str, message: impl Into<String>) -> ModelError {
    ModelError::InvalidParameter {
        estimator: estimator.to_string(),
        parameter: parameter.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Imputer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    Mean,
    Median,
    MostFrequent,
}

impl ImputeStrategy {
    pub fn parse(s: &str) -> ModelResult<Self> {
        match s {
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "most_frequent" => Ok(Self::MostFrequent),
            other => Err(invalid("Imputer", "strategy", format!("unknown strategy {other}"))),
        }
    }
}

/// Replaces NaN entries with a per-column statistic.
#[derive(Debug, Clone)]
pub struct Imputer {
    pub strategy: ImputeStrategy,
    fill: Option<Vector>,
}

impl Imputer {
    pub fn new(strategy: ImputeStrategy) -> Self {
        Self { strategy, fill: None }
    }
}

impl Default for Imputer {
    fn default() -> Self {
        Self::new(ImputeStrategy::Mean)
    }
}

impl Transformer for Imputer {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        matrix::check_non_empty(x, "Imputer")?;
        let fill = x.map_axis(Axis(0), |column| {
            let present: Vector = column.iter().copied().filter(|v| !v.is_nan()).collect();
            if present.is_empty() {
                return 0.0;
            }
            match self.strategy {
                ImputeStrategy::Mean => present.mean().unwrap_or(0.0),
                ImputeStrategy::Median => matrix::median(present.view()),
                ImputeStrategy::MostFrequent => matrix::mode(present.view()),
            }
        });
        self.fill = Some(fill);
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        let fill = self.fill.as_ref().ok_or_else(|| not_fitted("Imputer"))?;
        matrix::check_cols(x, fill.len())?;
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            row.zip_mut_with(fill, |v, f| {
                if v.is_nan() {
                    *v = *f;
                }
            });
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "Imputer"
    }
}

// ---------------------------------------------------------------------------
// One-hot encoder
// ---------------------------------------------------------------------------

/// One-hot encodes the categorical columns; other columns pass through first.
///
/// Unseen categories encode as all zeros.
#[derive(Debug, Clone, Default)]
pub struct OneHotEncoder {
    /// Indices of categorical columns. `None` treats every column as
    /// categorical.
    pub categorical_features: Option<Vec<usize>>,
    fitted: Option<OneHotState>,
}

#[derive(Debug, Clone)]
struct OneHotState {
    n_cols: usize,
    categorical: Vec<usize>,
    passthrough: Vec<usize>,
    categories: Vec<Vec<f64>>,
}

impl OneHotEncoder {
    pub fn new(categorical_features: Option<Vec<usize>>) -> Self {
        Self {
            categorical_features,
            fitted: None,
        }
    }
}

impl Transformer for OneHotEncoder {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "OneHotEncoder")?;
        let categorical: Vec<usize> = match &self.categorical_features {
            Some(idx) => idx.clone(),
            None => (0..n_cols).collect(),
        };
        if let Some(bad) = categorical.iter().find(|&&j| j >= n_cols) {
            return Err(invalid(
                "OneHotEncoder",
                "categorical_features",
                format!("index {bad} out of range for {n_cols} columns"),
            ));
        }
        let passthrough = (0..n_cols).filter(|j| !categorical.contains(j)).collect();
        let categories = categorical
            .iter()
            .map(|&j| matrix::sorted_classes(x.column(j)))
            .collect();
        self.fitted = Some(OneHotState {
            n_cols,
            categorical,
            passthrough,
            categories,
        });
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        let state = self.fitted.as_ref().ok_or_else(|| not_fitted("OneHotEncoder"))?;
        matrix::check_cols(x, state.n_cols)?;
        let width = state.passthrough.len() + state.categories.iter().map(Vec::len).sum::<usize>();
        let mut out = Matrix::zeros((x.nrows(), width));
        for (row, mut encoded) in x.rows().into_iter().zip(out.rows_mut()) {
            for (k, &j) in state.passthrough.iter().enumerate() {
                encoded[k] = row[j];
            }
            let mut offset = state.passthrough.len();
            for (&j, cats) in state.categorical.iter().zip(&state.categories) {
                if let Some(c) = cats.iter().position(|c| *c == row[j]) {
                    encoded[offset + c] = 1.0;
                }
                offset += cats.len();
            }
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "OneHotEncoder"
    }
}

// ---------------------------------------------------------------------------
// Variance threshold
// ---------------------------------------------------------------------------

/// Drops columns whose variance does not exceed `threshold`.
#[derive(Debug, Clone)]
pub struct VarianceThreshold {
    pub threshold: f64,
    keep: Option<(usize, Vec<usize>)>,
}

impl VarianceThreshold {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, keep: None }
    }
}

impl Transformer for VarianceThreshold {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "VarianceThreshold")?;
        let (_, var) = matrix::column_moments(x);
        let keep: Vec<usize> = (0..n_cols).filter(|&j| var[j] > self.threshold).collect();
        if keep.is_empty() {
            return Err(ModelError::FitFailed {
                estimator: "VarianceThreshold".to_string(),
                message: format!("no feature has variance above {}", self.threshold),
            });
        }
        self.keep = Some((n_cols, keep));
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        let (n_cols, keep) = self.keep.as_ref().ok_or_else(|| not_fitted("VarianceThreshold"))?;
        matrix::check_cols(x, *n_cols)?;
        Ok(x.select(Axis(1), keep))
    }

    fn name(&self) -> &str {
        "VarianceThreshold"
    }
}

// ---------------------------------------------------------------------------
// Scalers
// ---------------------------------------------------------------------------

/// Column-wise `(x - offset) / scale`.
#[derive(Debug, Clone)]
struct Affine {
    offset: Vector,
    scale: Vector,
}

impl Affine {
    fn apply(&self, x: &Matrix) -> ModelResult<Matrix> {
        matrix::check_cols(x, self.offset.len())?;
        Ok((x - &self.offset) / &self.scale)
    }
}

/// Constant columns get unit scale.
fn safe_scale(s: f64) -> f64 {
    if s.abs() < 1e-12 {
        1.0
    } else {
        s
    }
}

/// Scales each column to [0, 1].
#[derive(Debug, Clone, Default)]
pub struct MinMaxScaler {
    params: Option<Affine>,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for MinMaxScaler {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        matrix::check_non_empty(x, "MinMaxScaler")?;
        let offset = x.map_axis(Axis(0), |c| c.fold(f64::INFINITY, |a, &b| a.min(b)));
        let hi = x.map_axis(Axis(0), |c| c.fold(f64::NEG_INFINITY, |a, &b| a.max(b)));
        let scale = (&hi - &offset).mapv(safe_scale);
        self.params = Some(Affine { offset, scale });
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        self.params.as_ref().ok_or_else(|| not_fitted("MinMaxScaler"))?.apply(x)
    }

    fn name(&self) -> &str {
        "MinMaxScaler"
    }
}

#[derive(Debug, Clone)]
pub struct StandardScaler {
    pub with_mean: bool,
    pub with_std: bool,
    params: Option<Affine>,
}

impl StandardScaler {
    pub fn new(with_mean: bool, with_std: bool) -> Self {
        Self {
            with_mean,
            with_std,
            params: None,
        }
    }
}

impl Default for StandardScaler {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl Transformer for StandardScaler {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "StandardScaler")?;
        let (mean, var) = matrix::column_moments(x);
        let offset = if self.with_mean { mean } else { Array1::zeros(n_cols) };
        let scale = if self.with_std {
            var.mapv(|v| safe_scale(v.sqrt()))
        } else {
            Array1::ones(n_cols)
        };
        self.params = Some(Affine { offset, scale });
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        self.params.as_ref().ok_or_else(|| not_fitted("StandardScaler"))?.apply(x)
    }

    fn name(&self) -> &str {
        "StandardScaler"
    }
}

/// Centers on the median and scales by an inter-quantile range.
#[derive(Debug, Clone)]
pub struct RobustScaler {
    pub with_centering: bool,
    pub with_scaling: bool,
    /// Quantiles as fractions, e.g. (0.25, 0.75).
    pub quantile_range: (f64, f64),
    params: Option<Affine>,
}

impl RobustScaler {
    pub fn new(with_centering: bool, with_scaling: bool, quantile_range: (f64, f64)) -> Self {
        Self {
            with_centering,
            with_scaling,
            quantile_range,
            params: None,
        }
    }
}

impl Default for RobustScaler {
    fn default() -> Self {
        Self::new(true, true, (0.25, 0.75))
    }
}

impl Transformer for RobustScaler {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        let (q_min, q_max) = self.quantile_range;
        if !(0.0 <= q_min && q_min < q_max && q_max <= 1.0) {
            return Err(invalid(
                "RobustScaler",
                "quantile_range",
                format!("invalid range ({q_min}, {q_max})"),
            ));
        }
        matrix::check_non_empty(x, "RobustScaler")?;
        let offset = x.map_axis(Axis(0), |c| if self.with_centering { matrix::median(c) } else { 0.0 });
        let scale = x.map_axis(Axis(0), |c| {
            if self.with_scaling {
                safe_scale(matrix::quantile(c, q_max) - matrix::quantile(c, q_min))
            } else {
                1.0
            }
        });
        self.params = Some(Affine { offset, scale });
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        self.params.as_ref().ok_or_else(|| not_fitted("RobustScaler"))?.apply(x)
    }

    fn name(&self) -> &str {
        "RobustScaler"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Norm {
    L1,
    L2,
    Max,
}

impl Norm {
    pub fn parse(s: &str) -> ModelResult<Self> {
        match s {
            "l1" => Ok(Self::L1),
            "l2" => Ok(Self::L2),
            "max" => Ok(Self::Max),
            other => Err(invalid("Normalizer", "norm", format!("unknown norm {other}"))),
        }
    }
}

/// Scales each row to unit norm. Stateless.
#[derive(Debug, Clone)]
pub struct Normalizer {
    pub norm: Norm,
    n_cols: Option<usize>,
}

impl Normalizer {
    pub fn new(norm: Norm) -> Self {
        Self { norm, n_cols: None }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Norm::L2)
    }
}

impl Transformer for Normalizer {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()> {
        self.n_cols = Some(matrix::check_non_empty(x, "Normalizer")?);
        Ok(())
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        let n_cols = self.n_cols.ok_or_else(|| not_fitted("Normalizer"))?;
        matrix::check_cols(x, n_cols)?;
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            let norm = match self.norm {
                Norm::L1 => row.fold(0.0, |a, v| a + v.abs()),
                Norm::L2 => row.dot(&row).sqrt(),
                Norm::Max => row.fold(0.0, |a: f64, v| a.max(v.abs())),
            };
            row /= safe_scale(norm);
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "Normalizer"
    }
}
