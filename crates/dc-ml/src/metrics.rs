//! Scoring functions and the reward mapping used by the controller.

use std::fmt;
use std::str::FromStr;

use dc_types::{ModelError, ModelResult, TargetType};
use serde::{Deserialize, Serialize};

use ndarray::{concatenate, Axis};

use crate::matrix::{self, Matrix, Vector};
use crate::Pipeline;

pub fn accuracy(y_true: &Vector, y_pred: &Vector) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let hits = y_true.iter().zip(y_pred).filter(|(a, b)| a == b).count();
    hits as f64 / y_true.len() as f64
}

/// Per-class `(f1, support)` over the labels present in either vector.
fn f1_per_class(y_true: &Vector, y_pred: &Vector) -> Vec<(f64, usize)> {
    let both = concatenate(Axis(0), &[y_true.view(), y_pred.view()]).unwrap_or_else(|_| y_true.clone());
    let labels = matrix::sorted_classes(both.view());
    labels
        .iter()
        .map(|label| {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (t, p) in y_true.iter().zip(y_pred) {
                match (t == label, p == label) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let denom = 2 * tp + fp + fn_;
            let f1 = if denom == 0 { 0.0 } else { 2.0 * tp as f64 / denom as f64 };
            (f1, tp + fn_)
        })
        .collect()
}

pub fn f1_macro(y_true: &Vector, y_pred: &Vector) -> f64 {
    let per_class = f1_per_class(y_true, y_pred);
    if per_class.is_empty() {
        return 0.0;
    }
    per_class.iter().map(|(f, _)| f).sum::<f64>() / per_class.len() as f64
}

/// F1 averaged with class support as weights.
pub fn f1_weighted(y_true: &Vector, y_pred: &Vector) -> f64 {
    let per_class = f1_per_class(y_true, y_pred);
    let total: usize = per_class.iter().map(|(_, s)| s).sum();
    if total == 0 {
        return 0.0;
    }
    per_class.iter().map(|(f, s)| f * *s as f64).sum::<f64>() / total as f64
}

/// Area under the ROC curve as the Mann-Whitney rank statistic. The positive
/// class is the largest label; tied scores share their average rank.
pub fn roc_auc(y_true: &Vector, scores: &Vector) -> ModelResult<f64> {
    let classes = matrix::sorted_classes(y_true.view());
    if classes.len() != 2 {
        return Err(ModelError::InvalidParameter {
            estimator: "roc_auc".to_string(),
            parameter: "y_true".to_string(),
            message: format!("needs exactly two classes, found {}", classes.len()),
        });
    }
    let positive = classes[1];
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = avg;
        }
        i = j + 1;
    }

    let n_pos = y_true.iter().filter(|&&y| y == positive).count() as f64;
    let n_neg = y_true.len() as f64 - n_pos;
    let rank_sum: f64 = y_true
        .iter()
        .zip(ranks.iter())
        .filter(|(y, _)| **y == positive)
        .map(|(_, r)| r)
        .sum();
    Ok((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

pub fn mean_squared_error(y_true: &Vector, y_pred: &Vector) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    (y_true - y_pred).mapv(|d| d * d).mean().unwrap_or(0.0)
}

pub fn r2(y_true: &Vector, y_pred: &Vector) -> f64 {
    let m = y_true.mean().unwrap_or(0.0);
    let ss_tot: f64 = y_true.iter().map(|t| (t - m).powi(2)).sum();
    let ss_res: f64 = (y_true - y_pred).mapv(|d| d * d).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    Accuracy,
    F1Weighted,
    F1Macro,
    RocAuc,
    MeanSquaredError,
    R2,
}

impl fmt::Display for ScorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accuracy => "accuracy",
            Self::F1Weighted => "f1_weighted",
            Self::F1Macro => "f1_macro",
            Self::RocAuc => "roc_auc",
            Self::MeanSquaredError => "mean_squared_error",
            Self::R2 => "r2",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ScorerKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accuracy" => Ok(Self::Accuracy),
            "f1_weighted" => Ok(Self::F1Weighted),
            "f1_macro" => Ok(Self::F1Macro),
            "roc_auc" => Ok(Self::RocAuc),
            "mean_squared_error" | "mse" => Ok(Self::MeanSquaredError),
            "r2" => Ok(Self::R2),
            other => Err(ModelError::InvalidParameter {
                estimator: "scorer".to_string(),
                parameter: "kind".to_string(),
                message: format!("unknown scorer {other}"),
            }),
        }
    }
}

/// Scores a fitted pipeline and maps the score onto the reward scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scorer {
    pub kind: ScorerKind,
}

impl Scorer {
    pub fn new(kind: ScorerKind) -> Self {
        Self { kind }
    }

    /// ROC AUC for binary targets, weighted F1 for multiclass targets and
    /// mean squared error for regression.
    pub fn for_target(target_type: TargetType) -> Self {
        let kind = match target_type {
            TargetType::Binary => ScorerKind::RocAuc,
            TargetType::Multiclass => ScorerKind::F1Weighted,
            TargetType::Regression => ScorerKind::MeanSquaredError,
        };
        Self::new(kind)
    }

    pub fn score(&self, y_true: &Vector, pipeline: &Pipeline, x: &Matrix) -> ModelResult<f64> {
        match self.kind {
            ScorerKind::RocAuc => {
                let scores = match pipeline.predict_proba(x) {
                    Some(proba) => {
                        let proba = proba?;
                        if proba.ncols() >= 2 {
                            proba.column(proba.ncols() - 1).to_owned()
                        } else {
                            pipeline.predict(x)?
                        }
                    }
                    None => pipeline.predict(x)?,
                };
                roc_auc(y_true, &scores)
            }
            kind => {
                let y_pred = pipeline.predict(x)?;
                Ok(match kind {
                    ScorerKind::Accuracy => accuracy(y_true, &y_pred),
                    ScorerKind::F1Weighted => f1_weighted(y_true, &y_pred),
                    ScorerKind::F1Macro => f1_macro(y_true, &y_pred),
                    ScorerKind::MeanSquaredError => mean_squared_error(y_true, &y_pred),
                    ScorerKind::R2 | ScorerKind::RocAuc => r2(y_true, &y_pred),
                })
            }
        }
    }

    /// Higher is better. Mean squared error maps to `1 / (1 + mse)`.
    pub fn reward(&self, score: f64) -> f64 {
        match self.kind {
            ScorerKind::MeanSquaredError => 1.0 / (1.0 + score),
            _ => score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GaussianNb, RidgeRegression};
    use ndarray::array;

    #[test]
    fn classification_scores() {
        let y_true = array![0.0, 0.0, 1.0, 1.0, 2.0];
        let y_pred = array![0.0, 1.0, 1.0, 1.0, 2.0];
        assert_eq!(accuracy(&y_true, &y_pred), 0.8);
        // f1 per class: 2/3, 0.8, 1.0
        let macro_ = f1_macro(&y_true, &y_pred);
        assert!((macro_ - (2.0 / 3.0 + 0.8 + 1.0) / 3.0).abs() < 1e-12);
        let weighted = f1_weighted(&y_true, &y_pred);
        assert!((weighted - (2.0 * 2.0 / 3.0 + 2.0 * 0.8 + 1.0) / 5.0).abs() < 1e-12);
    }

    #[test]
    fn roc_auc_handles_ties() {
        let auc = roc_auc(&array![0.0, 0.0, 1.0, 1.0], &array![0.1, 0.4, 0.35, 0.8]).unwrap();
        assert_eq!(auc, 0.75);
        assert_eq!(roc_auc(&array![0.0, 1.0], &array![0.5, 0.5]).unwrap(), 0.5);
        assert!(roc_auc(&array![1.0, 1.0], &array![0.2, 0.3]).is_err());
    }

    #[test]
    fn regression_scores_and_reward() {
        let y_true = array![1.0, 2.0, 3.0];
        assert_eq!(mean_squared_error(&y_true, &array![1.0, 2.0, 5.0]), 4.0 / 3.0);
        assert_eq!(r2(&y_true, &y_true), 1.0);
        let scorer = Scorer::for_target(TargetType::Regression);
        assert_eq!(scorer.reward(0.0), 1.0);
        assert_eq!(scorer.reward(1.0), 0.5);
        assert_eq!(Scorer::new(ScorerKind::Accuracy).reward(0.7), 0.7);
    }

    #[test]
    fn scorer_uses_pipeline_probabilities() {
        let x = array![[0.0], [0.2], [5.0], [5.2]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut pipe = Pipeline::new(vec![], Box::new(GaussianNb::new()));
        pipe.fit(&x, &y).unwrap();
        let auc = Scorer::for_target(TargetType::Binary).score(&y, &pipe, &x).unwrap();
        assert_eq!(auc, 1.0);

        let targets = array![0.0, 0.2, 5.0, 5.2];
        let mut reg = Pipeline::new(vec![], Box::new(RidgeRegression::new(1e-9, true)));
        reg.fit(&x, &targets).unwrap();
        let mse = Scorer::for_target(TargetType::Regression)
            .score(&targets, &reg, &x)
            .unwrap();
        assert!(mse < 1e-6);
    }

    #[test]
    fn scorer_kind_parses() {
        assert_eq!("mse".parse::<ScorerKind>().unwrap(), ScorerKind::MeanSquaredError);
        assert_eq!(ScorerKind::F1Weighted.to_string(), "f1_weighted");
        assert!("bogus".parse::<ScorerKind>().is_err());
    }
}
