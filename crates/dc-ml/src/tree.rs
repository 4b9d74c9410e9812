//! CART decision trees and bagged random forests.

use dc_types::{ModelError, ModelResult};
use ndarray::ArrayView1;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::matrix::{self, Matrix, Vector};
use crate::Estimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Gini,
    Entropy,
}

impl Criterion {
    pub fn parse(s: &str) -> ModelResult<Self> {
        match s {
            "gini" => Ok(Self::Gini),
            "entropy" => Ok(Self::Entropy),
            other => Err(ModelError::InvalidParameter {
                estimator: "DecisionTree".to_string(),
                parameter: "criterion".to_string(),
                message: format!("unknown criterion {other}"),
            }),
        }
    }

    fn impurity(&self, counts: &[f64], total: f64) -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        match self {
            Self::Gini => 1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>(),
            Self::Entropy => -counts
                .iter()
                .filter(|c| **c > 0.0)
                .map(|c| {
                    let p = c / total;
                    p * p.log2()
                })
                .sum::<f64>(),
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Vec<f64>),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn leaf_for(&self, row: ArrayView1<f64>) -> &[f64] {
        match self {
            Node::Leaf(v) => v,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.leaf_for(row)
                } else {
                    right.leaf_for(row)
                }
            }
        }
    }
}

/// Impurity model used while growing a tree. `labels` are class indices for
/// classification and raw targets for regression.
trait SplitCriterion {
    fn leaf(&self, labels: &[f64]) -> Vec<f64>;
    /// Best `(threshold_position, weighted_child_impurity)` for labels sorted
    /// by feature value; `values` holds the sorted feature values.
    fn best_split(&self, values: &[f64], labels: &[f64]) -> Option<(usize, f64)>;
    fn node_impurity(&self, labels: &[f64]) -> f64;
}

#[derive(Clone, Copy)]
struct ClassCriterion {
    criterion: Criterion,
    n_classes: usize,
}

impl ClassCriterion {
    fn counts(&self, labels: &[f64]) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_classes];
        for &l in labels {
            counts[l as usize] += 1.0;
        }
        counts
    }
}

impl SplitCriterion for ClassCriterion {
    fn leaf(&self, labels: &[f64]) -> Vec<f64> {
        let total = labels.len().max(1) as f64;
        self.counts(labels).into_iter().map(|c| c / total).collect()
    }

    fn best_split(&self, values: &[f64], labels: &[f64]) -> Option<(usize, f64)> {
        let n = labels.len() as f64;
        let mut right = self.counts(labels);
        let mut left = vec![0.0; self.n_classes];
        let mut best: Option<(usize, f64)> = None;
        for i in 0..labels.len() - 1 {
            let c = labels[i] as usize;
            left[c] += 1.0;
            right[c] -= 1.0;
            if values[i] == values[i + 1] {
                continue;
            }
            let n_left = (i + 1) as f64;
            let n_right = n - n_left;
            let score = (n_left * self.criterion.impurity(&left, n_left)
                + n_right * self.criterion.impurity(&right, n_right))
                / n;
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((i, score));
            }
        }
        best
    }

    fn node_impurity(&self, labels: &[f64]) -> f64 {
        self.criterion.impurity(&self.counts(labels), labels.len() as f64)
    }
}

#[derive(Clone, Copy)]
struct MseCriterion;

impl SplitCriterion for MseCriterion {
    fn leaf(&self, labels: &[f64]) -> Vec<f64> {
        let mean = labels.iter().sum::<f64>() / labels.len().max(1) as f64;
        vec![mean]
    }

    fn best_split(&self, values: &[f64], labels: &[f64]) -> Option<(usize, f64)> {
        let n = labels.len() as f64;
        let total_sum: f64 = labels.iter().sum();
        let total_sq: f64 = labels.iter().map(|v| v * v).sum();
        let (mut sum, mut sq) = (0.0, 0.0);
        let mut best: Option<(usize, f64)> = None;
        for i in 0..labels.len() - 1 {
            sum += labels[i];
            sq += labels[i] * labels[i];
            if values[i] == values[i + 1] {
                continue;
            }
            let n_left = (i + 1) as f64;
            let n_right = n - n_left;
            let sse_left = sq - sum * sum / n_left;
            let r_sum = total_sum - sum;
            let sse_right = (total_sq - sq) - r_sum * r_sum / n_right;
            let score = (sse_left + sse_right) / n;
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((i, score));
            }
        }
        best
    }

    fn node_impurity(&self, labels: &[f64]) -> f64 {
        if labels.is_empty() {
            return 0.0;
        }
        let n = labels.len() as f64;
        let mean = labels.iter().sum::<f64>() / n;
        labels.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    }
}

struct TreeBuilder<'a, C: SplitCriterion> {
    x: &'a Matrix,
    labels: &'a [f64],
    criterion: C,
    max_depth: Option<usize>,
    min_samples_split: usize,
    /// Features drawn per split, with the generator drawing them. `None`
    /// considers every feature.
    feature_sampler: Option<(usize, ChaCha8Rng)>,
}

impl<C: SplitCriterion> TreeBuilder<'_, C> {
    fn candidate_features(&mut self) -> Vec<usize> {
        let n_cols = self.x.ncols();
        match &mut self.feature_sampler {
            Some((k, rng)) if *k < n_cols => index::sample(rng, n_cols, *k).into_vec(),
            _ => (0..n_cols).collect(),
        }
    }

    fn build(&mut self, indices: Vec<usize>, depth: usize) -> Node {
        let labels: Vec<f64> = indices.iter().map(|&i| self.labels[i]).collect();
        let at_max_depth = self.max_depth.is_some_and(|d| depth >= d);
        if at_max_depth
            || indices.len() < self.min_samples_split
            || self.criterion.node_impurity(&labels) <= 1e-12
        {
            return Node::Leaf(self.criterion.leaf(&labels));
        }

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in self.candidate_features() {
            let column = self.x.column(feature);
            let mut order = indices.clone();
            order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));
            let values: Vec<f64> = order.iter().map(|&i| column[i]).collect();
            let sorted_labels: Vec<f64> = order.iter().map(|&i| self.labels[i]).collect();
            if let Some((pos, score)) = self.criterion.best_split(&values, &sorted_labels) {
                if best.map_or(true, |(_, _, s)| score < s) {
                    let threshold = (values[pos] + values[pos + 1]) / 2.0;
                    best = Some((feature, threshold, score));
                }
            }
        }

        match best {
            Some((feature, threshold, _)) => {
                let (left, right): (Vec<usize>, Vec<usize>) = indices
                    .into_iter()
                    .partition(|&i| self.x[[i, feature]] <= threshold);
                Node::Split {
                    feature,
                    threshold,
                    left: Box::new(self.build(left, depth + 1)),
                    right: Box::new(self.build(right, depth + 1)),
                }
            }
            None => Node::Leaf(self.criterion.leaf(&labels)),
        }
    }
}

fn check_min_samples_split(estimator: &str, min_samples_split: usize) -> ModelResult<()> {
    if min_samples_split < 2 {
        return Err(ModelError::InvalidParameter {
            estimator: estimator.to_string(),
            parameter: "min_samples_split".to_string(),
            message: format!("must be at least 2, found {min_samples_split}"),
        });
    }
    Ok(())
}

fn not_fitted(estimator: &str) -> ModelError {
    ModelError::NotFitted {
        estimator: estimator.to_string(),
    }
}

/// Class labels mapped to their positions among the sorted classes.
fn encode_classes(y: &Vector) -> (Vec<f64>, Vec<f64>) {
    let classes = matrix::sorted_classes(y.view());
    let labels = y
        .iter()
        .map(|v| matrix::class_index(&classes, *v) as f64)
        .collect();
    (classes, labels)
}

/// Rows of averaged leaf vectors over every tree.
fn average_leaves(trees: &[Node], x: &Matrix, width: usize) -> Matrix {
    let mut out = Matrix::zeros((x.nrows(), width));
    for (row, mut target) in x.rows().into_iter().zip(out.rows_mut()) {
        for tree in trees {
            let leaf = tree.leaf_for(row);
            target.zip_mut_with(&ArrayView1::from(leaf), |t, v| *t += v);
        }
        target /= trees.len().max(1) as f64;
    }
    out
}

#[derive(Debug, Clone)]
struct FittedTrees {
    classes: Vec<f64>,
    n_cols: usize,
    trees: Vec<Node>,
}

impl FittedTrees {
    fn check(&self, x: &Matrix) -> ModelResult<()> {
        matrix::check_cols(x, self.n_cols)
    }

    fn proba(&self, x: &Matrix) -> ModelResult<Matrix> {
        self.check(x)?;
        Ok(average_leaves(&self.trees, x, self.classes.len()))
    }

    fn labels(&self, x: &Matrix) -> ModelResult<Vector> {
        Ok(matrix::argmax_labels(&self.proba(x)?, &self.classes))
    }

    fn values(&self, x: &Matrix) -> ModelResult<Vector> {
        self.check(x)?;
        Ok(average_leaves(&self.trees, x, 1).column(0).to_owned())
    }
}

#[derive(Debug, Clone)]
pub struct DecisionTreeClassifier {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    fitted: Option<FittedTrees>,
}

impl DecisionTreeClassifier {
    pub fn new(criterion: Criterion, max_depth: Option<usize>, min_samples_split: usize) -> Self {
        Self {
            criterion,
            max_depth,
            min_samples_split,
            fitted: None,
        }
    }

    fn state(&self) -> ModelResult<&FittedTrees> {
        self.fitted.as_ref().ok_or_else(|| not_fitted("DecisionTreeClassifier"))
    }
}

impl Default for DecisionTreeClassifier {
    fn default() -> Self {
        Self::new(Criterion::Gini, None, 2)
    }
}

impl Estimator for DecisionTreeClassifier {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "DecisionTreeClassifier")?;
        matrix::check_targets(x, y)?;
        check_min_samples_split("DecisionTreeClassifier", self.min_samples_split)?;
        let (classes, labels) = encode_classes(y);
        let mut builder = TreeBuilder {
            x,
            labels: &labels,
            criterion: ClassCriterion {
                criterion: self.criterion,
                n_classes: classes.len(),
            },
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            feature_sampler: None,
        };
        let root = builder.build((0..x.nrows()).collect(), 0);
        self.fitted = Some(FittedTrees {
            classes,
            n_cols,
            trees: vec![root],
        });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        self.state()?.labels(x)
    }

    fn predict_proba(&self, x: &Matrix) -> Option<ModelResult<Matrix>> {
        Some(self.state().and_then(|s| s.proba(x)))
    }

    fn name(&self) -> &str {
        "DecisionTreeClassifier"
    }
}

#[derive(Debug, Clone)]
pub struct DecisionTreeRegressor {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    fitted: Option<FittedTrees>,
}

impl DecisionTreeRegressor {
    pub fn new(max_depth: Option<usize>, min_samples_split: usize) -> Self {
        Self {
            max_depth,
            min_samples_split,
            fitted: None,
        }
    }
}

impl Default for DecisionTreeRegressor {
    fn default() -> Self {
        Self::new(None, 2)
    }
}

impl Estimator for DecisionTreeRegressor {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "DecisionTreeRegressor")?;
        matrix::check_targets(x, y)?;
        check_min_samples_split("DecisionTreeRegressor", self.min_samples_split)?;
        let targets = y.to_vec();
        let mut builder = TreeBuilder {
            x,
            labels: &targets,
            criterion: MseCriterion,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            feature_sampler: None,
        };
        let root = builder.build((0..x.nrows()).collect(), 0);
        self.fitted = Some(FittedTrees {
            classes: Vec::new(),
            n_cols,
            trees: vec![root],
        });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        self.fitted
            .as_ref()
            .ok_or_else(|| not_fitted("DecisionTreeRegressor"))?
            .values(x)
    }

    fn name(&self) -> &str {
        "DecisionTreeRegressor"
    }
}

/// Bagging settings shared by both forests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestSettings {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Fraction of features considered at each split, in (0, 1].
    pub max_features: f64,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestSettings {
    fn default() -> Self {
        Self {
            n_estimators: 10,
            max_depth: None,
            min_samples_split: 2,
            max_features: 1.0,
            bootstrap: true,
            seed: 0,
        }
    }
}

impl ForestSettings {
    fn validate(&self, estimator: &str) -> ModelResult<()> {
        check_min_samples_split(estimator, self.min_samples_split)?;
        let invalid = |parameter: &str, message: String| ModelError::InvalidParameter {
            estimator: estimator.to_string(),
            parameter: parameter.to_string(),
            message,
        };
        if self.n_estimators == 0 {
            return Err(invalid("n_estimators", "must be positive".to_string()));
        }
        if !(self.max_features > 0.0 && self.max_features <= 1.0) {
            return Err(invalid(
                "max_features",
                format!("must be in (0, 1], found {}", self.max_features),
            ));
        }
        Ok(())
    }

    fn grow<C: SplitCriterion + Copy>(&self, x: &Matrix, labels: &[f64], criterion: C) -> Vec<Node> {
        let n = x.nrows();
        let per_split = ((self.max_features * x.ncols() as f64).ceil() as usize).clamp(1, x.ncols());
        (0..self.n_estimators)
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(t as u64));
                let rows: Vec<usize> = if self.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                let mut builder = TreeBuilder {
                    x,
                    labels,
                    criterion,
                    max_depth: self.max_depth,
                    min_samples_split: self.min_samples_split,
                    feature_sampler: Some((per_split, rng)),
                };
                builder.build(rows, 0)
            })
            .collect()
    }
}

/// Bagged classification trees averaging leaf class frequencies.
#[derive(Debug, Clone)]
pub struct RandomForestClassifier {
    pub criterion: Criterion,
    pub settings: ForestSettings,
    fitted: Option<FittedTrees>,
}

impl RandomForestClassifier {
    pub fn new(criterion: Criterion, settings: ForestSettings) -> Self {
        Self {
            criterion,
            settings,
            fitted: None,
        }
    }

    fn state(&self) -> ModelResult<&FittedTrees> {
        self.fitted.as_ref().ok_or_else(|| not_fitted("RandomForestClassifier"))
    }
}

impl Estimator for RandomForestClassifier {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "RandomForestClassifier")?;
        matrix::check_targets(x, y)?;
        self.settings.validate("RandomForestClassifier")?;
        let (classes, labels) = encode_classes(y);
        let criterion = ClassCriterion {
            criterion: self.criterion,
            n_classes: classes.len(),
        };
        let trees = self.settings.grow(x, &labels, criterion);
        self.fitted = Some(FittedTrees {
            classes,
            n_cols,
            trees,
        });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        self.state()?.labels(x)
    }

    fn predict_proba(&self, x: &Matrix) -> Option<ModelResult<Matrix>> {
        Some(self.state().and_then(|s| s.proba(x)))
    }

    fn name(&self) -> &str {
        "RandomForestClassifier"
    }
}

/// Bagged regression trees averaging leaf means.
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    pub settings: ForestSettings,
    fitted: Option<FittedTrees>,
}

impl RandomForestRegressor {
    pub fn new(settings: ForestSettings) -> Self {
        Self {
            settings,
            fitted: None,
        }
    }
}

impl Estimator for RandomForestRegressor {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        let n_cols = matrix::check_non_empty(x, "RandomForestRegressor")?;
        matrix::check_targets(x, y)?;
        self.settings.validate("RandomForestRegressor")?;
        let targets = y.to_vec();
        let trees = self.settings.grow(x, &targets, MseCriterion);
        self.fitted = Some(FittedTrees {
            classes: Vec::new(),
            n_cols,
            trees,
        });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        self.fitted
            .as_ref()
            .ok_or_else(|| not_fitted("RandomForestRegressor"))?
            .values(x)
    }

    fn name(&self) -> &str {
        "RandomForestRegressor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn xor() -> (Matrix, Vector) {
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        (x, array![0.0, 1.0, 1.0, 0.0])
    }

    fn clusters() -> (Matrix, Vector) {
        let x = Matrix::from_shape_fn((20, 2), |(i, j)| {
            let base = if i < 10 { 0.0 } else { 6.0 };
            base + ((i * 3 + j * 5) % 7) as f64 * 0.2
        });
        let y = Vector::from_shape_fn(20, |i| if i < 10 { 2.0 } else { 7.0 });
        (x, y)
    }

    fn step() -> (Matrix, Vector) {
        let x = Matrix::from_shape_fn((20, 1), |(i, _)| i as f64);
        let y = Vector::from_shape_fn(20, |i| if i < 10 { 1.0 } else { 3.0 });
        (x, y)
    }

    #[test]
    fn full_depth_tree_memorizes_xor() {
        let (x, y) = xor();
        for criterion in [Criterion::Gini, Criterion::Entropy] {
            let mut tree = DecisionTreeClassifier::new(criterion, None, 2);
            tree.fit(&x, &y).unwrap();
            assert_eq!(tree.predict(&x).unwrap(), y);
        }
    }

    #[test]
    fn depth_limit_yields_leaf_probabilities() {
        let (x, y) = xor();
        let mut stump = DecisionTreeClassifier::new(Criterion::Gini, Some(0), 2);
        stump.fit(&x, &y).unwrap();
        let proba = stump.predict_proba(&x).unwrap().unwrap();
        assert_eq!(proba.row(0), array![0.5, 0.5]);
    }

    #[test]
    fn regressor_fits_step_function() {
        let x = Matrix::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y = Vector::from_shape_fn(10, |i| if i < 5 { 1.0 } else { 3.0 });
        let mut tree = DecisionTreeRegressor::new(Some(1), 2);
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&array![[2.0], [8.0]]).unwrap(), array![1.0, 3.0]);
    }

    #[test]
    fn min_samples_split_is_validated() {
        let (x, y) = xor();
        let mut tree = DecisionTreeClassifier::new(Criterion::Gini, None, 1);
        assert!(tree.fit(&x, &y).is_err());
    }

    #[test]
    fn forest_classifier_separates_clusters() {
        let (x, y) = clusters();
        let settings = ForestSettings {
            n_estimators: 15,
            max_features: 0.5,
            seed: 4,
            ..ForestSettings::default()
        };
        let mut forest = RandomForestClassifier::new(Criterion::Gini, settings);
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.predict(&array![[0.3, 0.3], [6.5, 6.5]]).unwrap(), array![2.0, 7.0]);
        let proba = forest.predict_proba(&x).unwrap().unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn forest_is_seeded() {
        let (x, y) = clusters();
        let settings = ForestSettings {
            seed: 11,
            max_features: 0.5,
            ..ForestSettings::default()
        };
        let mut a = RandomForestClassifier::new(Criterion::Entropy, settings);
        let mut b = RandomForestClassifier::new(Criterion::Entropy, settings);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        let queries = array![[3.0, 3.0], [1.0, 5.0]];
        assert_eq!(
            a.predict_proba(&queries).unwrap().unwrap(),
            b.predict_proba(&queries).unwrap().unwrap()
        );
    }

    #[test]
    fn forest_regressor_averages_trees() {
        let (x, y) = step();
        let settings = ForestSettings {
            n_estimators: 20,
            seed: 2,
            ..ForestSettings::default()
        };
        let mut forest = RandomForestRegressor::new(settings);
        forest.fit(&x, &y).unwrap();
        let pred = forest.predict(&array![[2.0], [17.0]]).unwrap();
        assert!((pred[0] - 1.0).abs() < 0.5);
        assert!((pred[1] - 3.0).abs() < 0.5);
    }

    #[test]
    fn forest_settings_are_validated() {
        let (x, y) = step();
        for settings in [
            ForestSettings {
                n_estimators: 0,
                ..ForestSettings::default()
            },
            ForestSettings {
                max_features: 0.0,
                ..ForestSettings::default()
            },
        ] {
            let mut forest = RandomForestRegressor::new(settings);
            assert!(matches!(
                forest.fit(&x, &y),
                Err(ModelError::InvalidParameter { .. })
            ));
        }
    }
}
