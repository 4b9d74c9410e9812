use dc_types::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};

use ndarray::ArrayView1;

use crate::matrix::{self, Matrix, Vector};
use crate::Estimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborWeights {
    Uniform,
    Distance,
}

impl NeighborWeights {
    pub fn parse(s: &str) -> ModelResult<Self> {
        match s {
            "uniform" => Ok(Self::Uniform),
            "distance" => Ok(Self::Distance),
            other => Err(ModelError::InvalidParameter {
                estimator: "KNeighbors".to_string(),
                parameter: "weights".to_string(),
                message: format!("unknown weighting {other}"),
            }),
        }
    }
}

/// Stored training set shared by both neighbor estimators.
#[derive(Debug, Clone)]
struct Memory {
    x: Matrix,
    y: Vector,
}

impl Memory {
    /// `(weight, target)` of the `k` nearest rows. An exact match under
    /// distance weighting takes all the weight.
    fn neighbors(&self, row: ArrayView1<f64>, k: usize, weights: NeighborWeights) -> Vec<(f64, f64)> {
        let mut dist: Vec<(f64, f64)> = self
            .x
            .rows()
            .into_iter()
            .zip(self.y.iter())
            .map(|(r, t)| {
                let diff = &r - &row;
                (diff.dot(&diff).sqrt(), *t)
            })
            .collect();
        dist.sort_by(|a, b| a.0.total_cmp(&b.0));
        dist.truncate(k);
        match weights {
            NeighborWeights::Uniform => dist.into_iter().map(|(_, t)| (1.0, t)).collect(),
            NeighborWeights::Distance => {
                if dist.iter().any(|(d, _)| *d == 0.0) {
                    dist.into_iter()
                        .map(|(d, t)| (if d == 0.0 { 1.0 } else { 0.0 }, t))
                        .collect()
                } else {
                    dist.into_iter().map(|(d, t)| (1.0 / d, t)).collect()
                }
            }
        }
    }
}

fn fit_memory(estimator: &str, n_neighbors: usize, x: &Matrix, y: &Vector) -> ModelResult<Memory> {
    matrix::check_non_empty(x, estimator)?;
    matrix::check_targets(x, y)?;
    if n_neighbors == 0 {
        return Err(ModelError::InvalidParameter {
            estimator: estimator.to_string(),
            parameter: "n_neighbors".to_string(),
            message: "must be positive".to_string(),
        });
    }
    if n_neighbors > x.nrows() {
        return Err(ModelError::FitFailed {
            estimator: estimator.to_string(),
            message: format!("n_neighbors {n_neighbors} exceeds {} samples", x.nrows()),
        });
    }
    Ok(Memory {
        x: x.clone(),
        y: y.clone(),
    })
}

#[derive(Debug, Clone)]
pub struct KNeighborsClassifier {
    pub n_neighbors: usize,
    pub weights: NeighborWeights,
    fitted: Option<(Vec<f64>, Memory)>,
}

impl KNeighborsClassifier {
    pub fn new(n_neighbors: usize, weights: NeighborWeights) -> Self {
        Self {
            n_neighbors,
            weights,
            fitted: None,
        }
    }

    fn votes(&self, x: &Matrix) -> ModelResult<(&[f64], Matrix)> {
        let (classes, memory) = self.fitted.as_ref().ok_or_else(|| ModelError::NotFitted {
            estimator: "KNeighborsClassifier".to_string(),
        })?;
        matrix::check_cols(x, memory.x.ncols())?;
        let mut votes = Matrix::zeros((x.nrows(), classes.len()));
        for (row, mut v) in x.rows().into_iter().zip(votes.rows_mut()) {
            for (w, t) in memory.neighbors(row, self.n_neighbors, self.weights) {
                if let Some(c) = classes.iter().position(|c| *c == t) {
                    v[c] += w;
                }
            }
            let total = v.sum();
            if total > 0.0 {
                v /= total;
            }
        }
        Ok((classes.as_slice(), votes))
    }
}

impl Default for KNeighborsClassifier {
    fn default() -> Self {
        Self::new(5, NeighborWeights::Uniform)
    }
}

impl Estimator for KNeighborsClassifier {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        let memory = fit_memory("KNeighborsClassifier", self.n_neighbors, x, y)?;
        self.fitted = Some((matrix::sorted_classes(y.view()), memory));
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        let (classes, votes) = self.votes(x)?;
        // first maximum wins, i.e. the smallest label on ties
        Ok(matrix::argmax_labels(&votes, classes))
    }

    fn predict_proba(&self, x: &Matrix) -> Option<ModelResult<Matrix>> {
        Some(self.votes(x).map(|(_, votes)| votes))
    }

    fn name(&self) -> &str {
        "KNeighborsClassifier"
    }
}

#[derive(Debug, Clone)]
pub struct KNeighborsRegressor {
    pub n_neighbors: usize,
    pub weights: NeighborWeights,
    fitted: Option<Memory>,
}

impl KNeighborsRegressor {
    pub fn new(n_neighbors: usize, weights: NeighborWeights) -> Self {
        Self {
            n_neighbors,
            weights,
            fitted: None,
        }
    }
}

impl Default for KNeighborsRegressor {
    fn default() -> Self {
        Self::new(5, NeighborWeights::Uniform)
    }
}

impl Estimator for KNeighborsRegressor {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        self.fitted = Some(fit_memory("KNeighborsRegressor", self.n_neighbors, x, y)?);
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        let memory = self.fitted.as_ref().ok_or_else(|| ModelError::NotFitted {
            estimator: "KNeighborsRegressor".to_string(),
        })?;
        matrix::check_cols(x, memory.x.ncols())?;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let nn = memory.neighbors(row, self.n_neighbors, self.weights);
                let total: f64 = nn.iter().map(|(w, _)| w).sum();
                nn.iter().map(|(w, t)| w * t).sum::<f64>() / total
            })
            .collect())
    }

    fn name(&self) -> &str {
        "KNeighborsRegressor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn points() -> (Matrix, Vector) {
        let x = array![[0.0], [1.0], [2.0], [10.0], [11.0], [12.0]];
        (x, array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0])
    }

    #[test]
    fn classifier_votes_by_majority() {
        let (x, y) = points();
        let mut knn = KNeighborsClassifier::new(3, NeighborWeights::Uniform);
        knn.fit(&x, &y).unwrap();
        assert_eq!(knn.predict(&array![[1.5], [10.5]]).unwrap(), array![0.0, 1.0]);
        let proba = knn.predict_proba(&array![[1.5]]).unwrap().unwrap();
        assert_eq!(proba.row(0), array![1.0, 0.0]);
    }

    #[test]
    fn distance_weighting_prefers_exact_match() {
        let (x, y) = points();
        let mut knn = KNeighborsRegressor::new(6, NeighborWeights::Distance);
        knn.fit(&x, &y).unwrap();
        assert_eq!(knn.predict(&array![[10.0]]).unwrap(), array![1.0]);
    }

    #[test]
    fn regressor_averages_neighbors() {
        let (x, y) = points();
        let mut knn = KNeighborsRegressor::new(2, NeighborWeights::Uniform);
        knn.fit(&x, &y).unwrap();
        assert_eq!(knn.predict(&array![[0.4]]).unwrap(), array![0.0]);
    }

    #[test]
    fn too_many_neighbors_fails_fit() {
        let (x, y) = points();
        let mut knn = KNeighborsClassifier::new(7, NeighborWeights::Uniform);
        assert!(matches!(knn.fit(&x, &y), Err(ModelError::FitFailed { .. })));
    }
}
