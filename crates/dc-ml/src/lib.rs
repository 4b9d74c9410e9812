//! # dc-ml
//!
//! The estimators and transformers an ML framework is assembled from.
//!
//! Every step implements either [`Transformer`] or [`Estimator`] over a dense
//! `ndarray` [`Matrix`]; a [`Pipeline`] chains transformers into a final
//! estimator and [`Scorer`] turns its predictions into a reward.

pub mod decomposition;
pub mod kernel;
pub mod linear;
pub mod matrix;
pub mod metrics;
pub mod naive_bayes;
pub mod neighbors;
pub mod pipeline;
pub mod preprocessing;
pub mod tree;

pub use decomposition::{Pca, PolynomialFeatures, RbfSampler, TruncatedSvd};
pub use kernel::{Kernel, KernelKind, KernelPca, Nystroem};
pub use linear::{Lasso, LogisticRegression, RidgeRegression};
pub use matrix::{Matrix, Vector};
pub use metrics::{Scorer, ScorerKind};
pub use naive_bayes::GaussianNb;
pub use neighbors::{KNeighborsClassifier, KNeighborsRegressor, NeighborWeights};
pub use pipeline::Pipeline;
pub use preprocessing::{
    ImputeStrategy, Imputer, MinMaxScaler, Norm, Normalizer, OneHotEncoder, RobustScaler,
    StandardScaler, VarianceThreshold,
};
pub use tree::{
    Criterion, DecisionTreeClassifier, DecisionTreeRegressor, ForestSettings,
    RandomForestClassifier, RandomForestRegressor,
};

use dc_types::ModelResult;

/// A fitted feature transformation.
pub trait Transformer: Send + std::fmt::Debug {
    fn fit(&mut self, x: &Matrix) -> ModelResult<()>;

    fn transform(&self, x: &Matrix) -> ModelResult<Matrix>;

    fn fit_transform(&mut self, x: &Matrix) -> ModelResult<Matrix> {
        self.fit(x)?;
        self.transform(x)
    }

    fn name(&self) -> &str;
}

/// A supervised model producing one prediction per row.
pub trait Estimator: Send + std::fmt::Debug {
    fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()>;

    fn predict(&self, x: &Matrix) -> ModelResult<Vector>;

    /// Class probabilities, columns ordered by sorted class label.
    /// `None` for regressors.
    fn predict_proba(&self, _x: &Matrix) -> Option<ModelResult<Matrix>> {
        None
    }

    fn name(&self) -> &str;
}
