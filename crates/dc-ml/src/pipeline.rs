use dc_types::ModelResult;
use tracing::debug;

use crate::matrix::{Matrix, Vector};
use crate::{Estimator, Transformer};

/// Transformer steps applied in order, followed by a final estimator.
#[derive(Debug)]
pub struct Pipeline {
    steps: Vec<Box<dyn Transformer>>,
    estimator: Box<dyn Estimator>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Transformer>>, estimator: Box<dyn Estimator>) -> Self {
        Self { steps, estimator }
    }

    /// Step names, estimator last.
    pub fn step_names(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|s| s.name().to_string())
            .chain(std::iter::once(self.estimator.name().to_string()))
            .collect()
    }

    pub fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        debug!(steps = ?self.step_names(), rows = x.nrows(), "fitting pipeline");
        let mut current = x.clone();
        for step in &mut self.steps {
            current = step.fit_transform(&current)?;
        }
        self.estimator.fit(&current, y)
    }

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix> {
        let mut current = x.clone();
        for step in &self.steps {
            current = step.transform(&current)?;
        }
        Ok(current)
    }

    pub fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        self.estimator.predict(&self.transform(x)?)
    }

    pub fn predict_proba(&self, x: &Matrix) -> Option<ModelResult<Matrix>> {
        match self.transform(x) {
            Ok(t) => self.estimator.predict_proba(&t),
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GaussianNb, Imputer, ImputeStrategy, RidgeRegression, StandardScaler};
    use ndarray::array;

    #[test]
    fn pipeline_imputes_before_fitting() {
        let x = array![[1.0, f64::NAN], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];
        let mut pipe = Pipeline::new(
            vec![
                Box::new(Imputer::new(ImputeStrategy::Mean)),
                Box::new(StandardScaler::new(true, true)),
            ],
            Box::new(RidgeRegression::new(1e-6, true)),
        );
        pipe.fit(&x, &y).unwrap();
        let pred = pipe.predict(&array![[2.0, 4.0]]).unwrap();
        assert!(pred[0].is_finite());
        assert!(pipe.predict_proba(&x).is_none());
        assert_eq!(pipe.step_names(), vec!["Imputer", "StandardScaler", "Ridge"]);
    }

    #[test]
    fn errors_propagate_from_steps() {
        let mut pipe = Pipeline::new(vec![], Box::new(GaussianNb::new()));
        assert!(pipe.fit(&Matrix::zeros((0, 0)), &Vector::zeros(0)).is_err());
        assert!(pipe.predict(&array![[1.0]]).is_err());
    }
}
