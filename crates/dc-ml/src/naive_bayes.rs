use dc_types::{ModelError, ModelResult};
use ndarray::{Array1, Array2, Axis};

use crate::matrix::{self, Matrix, Vector};
use crate::Estimator;

const VAR_SMOOTHING: f64 = 1e-9;

/// Gaussian naive Bayes.
#[derive(Debug, Clone, Default)]
pub struct GaussianNb {
    fitted: Option<NbState>,
}

#[derive(Debug, Clone)]
struct NbState {
    classes: Vec<f64>,
    log_priors: Array1<f64>,
    /// `n_classes x n_features`.
    means: Array2<f64>,
    variances: Array2<f64>,
}

impl NbState {
    /// `n_rows x n_classes` joint log-likelihoods.
    fn joint_log_likelihood(&self, x: &Matrix) -> Matrix {
        let mut jll = Matrix::zeros((x.nrows(), self.classes.len()));
        for (c, mut column) in jll.columns_mut().into_iter().enumerate() {
            let means = self.means.row(c);
            let vars = self.variances.row(c);
            let norm: f64 = vars.iter().map(|v| -0.5 * (2.0 * std::f64::consts::PI * v).ln()).sum();
            for (i, row) in x.rows().into_iter().enumerate() {
                let quad: f64 = row
                    .iter()
                    .zip(means.iter().zip(vars.iter()))
                    .map(|(x, (m, v))| (x - m).powi(2) / (2.0 * v))
                    .sum();
                column[i] = self.log_priors[c] + norm - quad;
            }
        }
        jll
    }
}

impl GaussianNb {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, x: &Matrix) -> ModelResult<&NbState> {
        let state = self.fitted.as_ref().ok_or_else(|| ModelError::NotFitted {
            estimator: "GaussianNB".to_string(),
        })?;
        matrix::check_cols(x, state.means.ncols())?;
        Ok(state)
    }
}

impl Estimator for GaussianNb {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "GaussianNB")?;
        matrix::check_targets(x, y)?;
        let classes = matrix::sorted_classes(y.view());
        let (_, total_var) = matrix::column_moments(x);
        let epsilon = (VAR_SMOOTHING * total_var.fold(0.0, |a: f64, &b| a.max(b))).max(1e-12);

        let k = classes.len();
        let mut log_priors = Array1::zeros(k);
        let mut means = Array2::zeros((k, n_cols));
        let mut variances = Array2::zeros((k, n_cols));
        for (c, class) in classes.iter().enumerate() {
            let rows: Vec<usize> = (0..y.len()).filter(|&i| y[i] == *class).collect();
            let members = x.select(Axis(0), &rows);
            let (mean, var) = matrix::column_moments(&members);
            log_priors[c] = (rows.len() as f64 / x.nrows() as f64).ln();
            means.row_mut(c).assign(&mean);
            variances.row_mut(c).assign(&(var + epsilon));
        }
        self.fitted = Some(NbState {
            classes,
            log_priors,
            means,
            variances,
        });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        let state = self.state(x)?;
        Ok(matrix::argmax_labels(&state.joint_log_likelihood(x), &state.classes))
    }

    fn predict_proba(&self, x: &Matrix) -> Option<ModelResult<Matrix>> {
        Some(self.state(x).map(|state| {
            let mut jll = state.joint_log_likelihood(x);
            matrix::softmax_rows(&mut jll);
            jll
        }))
    }

    fn name(&self) -> &str {
        "GaussianNB"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn separates_gaussian_clusters() {
        let x = array![
            [0.0, 0.1],
            [0.2, -0.1],
            [-0.1, 0.0],
            [5.0, 5.1],
            [5.2, 4.9],
            [4.9, 5.0],
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut nb = GaussianNb::new();
        nb.fit(&x, &y).unwrap();
        assert_eq!(nb.predict(&array![[0.1, 0.0], [5.0, 5.0]]).unwrap(), array![0.0, 1.0]);
        let proba = nb.predict_proba(&array![[5.0, 5.0]]).unwrap().unwrap();
        assert!(proba[[0, 1]] > 0.99);
    }

    #[test]
    fn unfitted_model_reports_not_fitted() {
        let nb = GaussianNb::new();
        assert!(matches!(
            nb.predict(&array![[1.0]]),
            Err(ModelError::NotFitted { .. })
        ));
    }
}
