//! Linear models.

use dc_types::{ModelError, ModelResult};
use ndarray::{Array1, Array2, Axis};

use crate::matrix::{self, Matrix, Vector};
use crate::Estimator;

const STEP_SIZE: f64 = 0.1;

/// Multinomial logistic regression fitted by full-batch gradient descent
/// with an L2 penalty of strength `1 / c`.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub c: f64,
    pub max_iter: usize,
    pub fit_intercept: bool,
    fitted: Option<LogisticState>,
}

#[derive(Debug, Clone)]
struct LogisticState {
    classes: Vec<f64>,
    /// `n_classes x n_features`.
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl LogisticState {
    fn proba(&self, x: &Matrix) -> Matrix {
        let mut logits = x.dot(&self.weights.t()) + &self.bias;
        matrix::softmax_rows(&mut logits);
        logits
    }
}

impl LogisticRegression {
    pub fn new(c: f64, max_iter: usize, fit_intercept: bool) -> Self {
        Self {
            c,
            max_iter,
            fit_intercept,
            fitted: None,
        }
    }

    fn state(&self) -> ModelResult<&LogisticState> {
        self.fitted.as_ref().ok_or_else(|| ModelError::NotFitted {
            estimator: "LogisticRegression".to_string(),
        })
    }
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(1.0, 100, true)
    }
}

impl Estimator for LogisticRegression {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "LogisticRegression")?;
        matrix::check_targets(x, y)?;
        if self.c <= 0.0 {
            return Err(ModelError::InvalidParameter {
                estimator: "LogisticRegression".to_string(),
                parameter: "C".to_string(),
                message: format!("must be positive, found {}", self.c),
            });
        }
        let classes = matrix::sorted_classes(y.view());
        if classes.len() < 2 {
            return Err(ModelError::FitFailed {
                estimator: "LogisticRegression".to_string(),
                message: "needs samples of at least two classes".to_string(),
            });
        }
        let n = x.nrows() as f64;
        let targets = matrix::one_hot(y, &classes);

        let mut state = LogisticState {
            weights: Array2::zeros((classes.len(), n_cols)),
            bias: Array1::zeros(classes.len()),
            classes,
        };
        for _ in 0..self.max_iter {
            let err = state.proba(x) - &targets;
            let grad_w = err.t().dot(x) / n + &(&state.weights / (self.c * n));
            state.weights.scaled_add(-STEP_SIZE, &grad_w);
            if self.fit_intercept {
                let grad_b = err.sum_axis(Axis(0)) / n;
                state.bias.scaled_add(-STEP_SIZE, &grad_b);
            }
        }
        if state.weights.iter().chain(state.bias.iter()).any(|w| !w.is_finite()) {
            return Err(ModelError::FitFailed {
                estimator: "LogisticRegression".to_string(),
                message: "gradient descent diverged".to_string(),
            });
        }
        self.fitted = Some(state);
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        let state = self.state()?;
        matrix::check_cols(x, state.weights.ncols())?;
        Ok(matrix::argmax_labels(&state.proba(x), &state.classes))
    }

    fn predict_proba(&self, x: &Matrix) -> Option<ModelResult<Matrix>> {
        Some(self.state().and_then(|state| {
            matrix::check_cols(x, state.weights.ncols())?;
            Ok(state.proba(x))
        }))
    }

    fn name(&self) -> &str {
        "LogisticRegression"
    }
}

/// Column means of `x` and the mean of `y`, or zeros without an intercept.
fn centering(x: &Matrix, y: &Vector, fit_intercept: bool) -> (Vector, f64) {
    if fit_intercept {
        let (x_mean, _) = matrix::column_moments(x);
        (x_mean, y.mean().unwrap_or(0.0))
    } else {
        (Array1::zeros(x.ncols()), 0.0)
    }
}

/// Fitted coefficients and intercept of a linear regressor.
#[derive(Debug, Clone)]
struct LinearState {
    coef: Vector,
    intercept: f64,
}

impl LinearState {
    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        matrix::check_cols(x, self.coef.len())?;
        Ok(x.dot(&self.coef) + self.intercept)
    }
}

/// L2-regularized least squares solved from the normal equations.
#[derive(Debug, Clone)]
pub struct RidgeRegression {
    pub alpha: f64,
    pub fit_intercept: bool,
    fitted: Option<LinearState>,
}

impl RidgeRegression {
    pub fn new(alpha: f64, fit_intercept: bool) -> Self {
        Self {
            alpha,
            fit_intercept,
            fitted: None,
        }
    }
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new(1.0, true)
    }
}

impl Estimator for RidgeRegression {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        matrix::check_non_empty(x, "Ridge")?;
        matrix::check_targets(x, y)?;
        let (x_mean, y_mean) = centering(x, y, self.fit_intercept);
        let xc = x - &x_mean;
        let yc = y - y_mean;

        let mut xtx = xc.t().dot(&xc);
        xtx.diag_mut().mapv_inplace(|d| d + self.alpha);
        let xty = xc.t().dot(&yc);
        let coef = matrix::solve(xtx, xty).ok_or_else(|| ModelError::FitFailed {
            estimator: "Ridge".to_string(),
            message: "singular normal equations".to_string(),
        })?;
        let intercept = y_mean - coef.dot(&x_mean);
        self.fitted = Some(LinearState { coef, intercept });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        let state = self.fitted.as_ref().ok_or_else(|| ModelError::NotFitted {
            estimator: "Ridge".to_string(),
        })?;
        state.predict(x)
    }

    fn name(&self) -> &str {
        "Ridge"
    }
}

/// L1-regularized least squares, `(1 / 2n)·‖y − Xw‖² + α·‖w‖₁`, fitted by
/// cyclic coordinate descent.
#[derive(Debug, Clone)]
pub struct Lasso {
    pub alpha: f64,
    pub fit_intercept: bool,
    pub max_iter: usize,
    pub tol: f64,
    fitted: Option<LinearState>,
}

impl Lasso {
    pub fn new(alpha: f64, fit_intercept: bool, max_iter: usize, tol: f64) -> Self {
        Self {
            alpha,
            fit_intercept,
            max_iter,
            tol,
            fitted: None,
        }
    }

    /// Coefficients of the fitted model.
    pub fn coef(&self) -> Option<&Vector> {
        self.fitted.as_ref().map(|s| &s.coef)
    }
}

impl Default for Lasso {
    fn default() -> Self {
        Self::new(1.0, true, 1000, 1e-4)
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    value.signum() * (value.abs() - threshold).max(0.0)
}

impl Estimator for Lasso {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "Lasso")?;
        matrix::check_targets(x, y)?;
        if self.alpha < 0.0 {
            return Err(ModelError::InvalidParameter {
                estimator: "Lasso".to_string(),
                parameter: "alpha".to_string(),
                message: format!("must be non-negative, found {}", self.alpha),
            });
        }
        let n = x.nrows() as f64;
        let (x_mean, y_mean) = centering(x, y, self.fit_intercept);
        let xc = x - &x_mean;
        let col_sq = xc.map_axis(Axis(0), |c| c.dot(&c) / n);

        let mut coef: Vector = Array1::zeros(n_cols);
        let mut residual = y - y_mean;
        for _ in 0..self.max_iter {
            let mut max_delta: f64 = 0.0;
            for j in 0..n_cols {
                if col_sq[j] <= 0.0 {
                    continue;
                }
                let column = xc.column(j);
                let rho = column.dot(&residual) / n + col_sq[j] * coef[j];
                let updated = soft_threshold(rho, self.alpha) / col_sq[j];
                let delta = updated - coef[j];
                if delta != 0.0 {
                    residual.scaled_add(-delta, &column);
                    coef[j] = updated;
                }
                max_delta = max_delta.max(delta.abs());
            }
            if max_delta < self.tol {
                break;
            }
        }
        if coef.iter().any(|c| !c.is_finite()) {
            return Err(ModelError::FitFailed {
                estimator: "Lasso".to_string(),
                message: "coordinate descent diverged".to_string(),
            });
        }
        let intercept = y_mean - coef.dot(&x_mean);
        self.fitted = Some(LinearState { coef, intercept });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        let state = self.fitted.as_ref().ok_or_else(|| ModelError::NotFitted {
            estimator: "Lasso".to_string(),
        })?;
        state.predict(x)
    }

    fn name(&self) -> &str {
        "Lasso"
    }
}
