//! The default algorithm components searched over.

use dc_types::{HyperValue, TargetType};

use crate::component::{AlgorithmComponent, AlgorithmKind, ComponentType, ExclusionCondition};
use crate::hyperparameter::Hyperparameter;

fn bools(name: &str, default: bool) -> Hyperparameter {
    Hyperparameter::categorical(name, vec![true.into(), false.into()], default)
}

fn strings(name: &str, choices: &[&str], default: &str) -> Hyperparameter {
    Hyperparameter::categorical(name, choices.iter().map(|&c| c.into()).collect(), default)
}

pub fn imputer() -> AlgorithmComponent {
    AlgorithmComponent::new("Imputer", AlgorithmKind::Imputer, ComponentType::DataPreprocessor)
        .with_hyperparameters(vec![strings("strategy", &["mean", "median", "most_frequent"], "mean")])
}

/// Encodes only the data environment's categorical columns, which the task
/// environment supplies as `OneHotEncoder__categorical_features`.
pub fn one_hot_encoder() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "OneHotEncoder",
        AlgorithmKind::OneHotEncoder,
        ComponentType::DataPreprocessor,
    )
    .with_env_dep("categorical_features", HyperValue::Indices(Vec::new()))
}

pub fn variance_threshold_filter() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "VarianceThresholdFilter",
        AlgorithmKind::VarianceThreshold,
        ComponentType::DataPreprocessor,
    )
    .with_hyperparameters(vec![Hyperparameter::uniform_float("threshold", 0.0, 10.0, 0.0)])
}

pub fn minmax_scaler() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "MinMaxScaler",
        AlgorithmKind::MinMaxScaler,
        ComponentType::DataPreprocessor,
    )
}

pub fn standard_scaler() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "StandardScaler",
        AlgorithmKind::StandardScaler,
        ComponentType::DataPreprocessor,
    )
    .with_hyperparameters(vec![bools("with_mean", true), bools("with_std", true)])
    // neither centering nor scaling is the identity
    .with_exclusion(ExclusionCondition::new("with_mean", false, "with_std", vec![false.into()]))
}

pub fn robust_scaler() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "RobustScaler",
        AlgorithmKind::RobustScaler,
        ComponentType::DataPreprocessor,
    )
    .with_hyperparameters(vec![
        bools("with_centering", true),
        bools("with_scaling", true),
        Hyperparameter::tuple_pair(
            "quantile_range",
            Hyperparameter::uniform_float("q_min", 0.001, 0.3, 0.001),
            Hyperparameter::uniform_float("q_max", 0.7, 0.999, 0.7),
            (0.25, 0.75),
        ),
    ])
}

pub fn normalizer() -> AlgorithmComponent {
    AlgorithmComponent::new("Normalizer", AlgorithmKind::Normalizer, ComponentType::DataPreprocessor)
        .with_hyperparameters(vec![strings("norm", &["l1", "l2", "max"], "l2")])
}

pub fn pca() -> AlgorithmComponent {
    AlgorithmComponent::new("PCA", AlgorithmKind::Pca, ComponentType::FeaturePreprocessor)
        .with_hyperparameters(vec![
            Hyperparameter::uniform_int("n_components", 2, 20, 10),
            bools("whiten", false),
        ])
}

pub fn truncated_svd() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "TruncatedSVD",
        AlgorithmKind::TruncatedSvd,
        ComponentType::FeaturePreprocessor,
    )
    .with_hyperparameters(vec![Hyperparameter::uniform_int("n_components", 2, 20, 10)])
}

pub fn rbf_sampler() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "RBFSampler",
        AlgorithmKind::RbfSampler,
        ComponentType::FeaturePreprocessor,
    )
    .with_hyperparameters(vec![
        Hyperparameter::log_uniform_float("gamma", 3.0517578125e-05, 8.0, 1.0),
        Hyperparameter::uniform_int("n_components", 10, 200, 100),
    ])
    .with_constant("random_state", 0i64)
}

fn kernel_hyperparameters() -> Vec<Hyperparameter> {
    vec![
        strings("kernel", &["poly", "rbf", "sigmoid", "cosine"], "rbf"),
        Hyperparameter::log_uniform_float("gamma", 3.0517578125e-05, 8.0, 0.1),
        Hyperparameter::uniform_int("degree", 2, 5, 3),
        Hyperparameter::uniform_float("coef0", -1.0, 1.0, 0.0),
    ]
}

pub fn nystroem_sampler() -> AlgorithmComponent {
    let mut hyperparameters = kernel_hyperparameters();
    hyperparameters.push(Hyperparameter::uniform_int("n_components", 10, 200, 100));
    AlgorithmComponent::new(
        "Nystroem",
        AlgorithmKind::Nystroem,
        ComponentType::FeaturePreprocessor,
    )
    .with_hyperparameters(hyperparameters)
    .with_constant("random_state", 0i64)
}

pub fn kernel_pca() -> AlgorithmComponent {
    let mut hyperparameters = kernel_hyperparameters();
    hyperparameters.push(Hyperparameter::uniform_int("n_components", 2, 50, 10));
    AlgorithmComponent::new("KernelPCA", AlgorithmKind::KernelPca, ComponentType::FeaturePreprocessor)
        .with_hyperparameters(hyperparameters)
}

pub fn polynomial_features() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "PolynomialFeatures",
        AlgorithmKind::PolynomialFeatures,
        ComponentType::FeaturePreprocessor,
    )
    .with_hyperparameters(vec![
        Hyperparameter::uniform_int("degree", 1, 3, 2).with_n(3),
        bools("interaction_only", false),
        bools("include_bias", true),
    ])
    // a degree-1 expansion has no interaction terms
    .with_exclusion(ExclusionCondition::new("degree", 1i64, "interaction_only", vec![true.into()]))
}

pub fn logistic_regression() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "LogisticRegression",
        AlgorithmKind::LogisticRegression,
        ComponentType::Classifier,
    )
    .with_hyperparameters(vec![
        Hyperparameter::log_uniform_float("C", 0.03125, 32.0, 1.0),
        bools("fit_intercept", true),
    ])
    .with_constant("max_iter", 100i64)
}

pub fn gaussian_naive_bayes() -> AlgorithmComponent {
    AlgorithmComponent::new("GaussianNB", AlgorithmKind::GaussianNb, ComponentType::Classifier)
}

pub fn decision_tree() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "DecisionTreeClassifier",
        AlgorithmKind::DecisionTreeClassifier,
        ComponentType::Classifier,
    )
    .with_hyperparameters(vec![
        strings("criterion", &["gini", "entropy"], "gini"),
        Hyperparameter::uniform_int("max_depth", 1, 20, 10),
        Hyperparameter::uniform_int("min_samples_split", 2, 20, 2),
    ])
}

fn forest_hyperparameters() -> Vec<Hyperparameter> {
    vec![
        Hyperparameter::uniform_int("n_estimators", 5, 50, 10),
        Hyperparameter::uniform_float("max_features", 0.1, 1.0, 0.5),
        Hyperparameter::uniform_int("min_samples_split", 2, 20, 2),
        bools("bootstrap", true),
    ]
}

pub fn random_forest() -> AlgorithmComponent {
    let mut hyperparameters = vec![strings("criterion", &["gini", "entropy"], "gini")];
    hyperparameters.extend(forest_hyperparameters());
    AlgorithmComponent::new(
        "RandomForestClassifier",
        AlgorithmKind::RandomForestClassifier,
        ComponentType::Classifier,
    )
    .with_hyperparameters(hyperparameters)
    .with_constant("random_state", 0i64)
}

pub fn k_neighbors() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "KNeighborsClassifier",
        AlgorithmKind::KNeighborsClassifier,
        ComponentType::Classifier,
    )
    .with_hyperparameters(vec![
        Hyperparameter::uniform_int("n_neighbors", 1, 20, 5),
        strings("weights", &["uniform", "distance"], "uniform"),
    ])
}

pub fn ridge_regression() -> AlgorithmComponent {
    AlgorithmComponent::new("Ridge", AlgorithmKind::Ridge, ComponentType::Regressor)
        .with_hyperparameters(vec![
            Hyperparameter::log_uniform_float("alpha", 1e-5, 10.0, 1.0),
            bools("fit_intercept", true),
        ])
}

pub fn lasso_regression() -> AlgorithmComponent {
    AlgorithmComponent::new("Lasso", AlgorithmKind::Lasso, ComponentType::Regressor)
        .with_hyperparameters(vec![
            Hyperparameter::log_uniform_float("alpha", 1e-5, 10.0, 1.0),
            bools("fit_intercept", true),
        ])
        .with_constant("max_iter", 1000i64)
}

pub fn random_forest_regression() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "RandomForestRegressor",
        AlgorithmKind::RandomForestRegressor,
        ComponentType::Regressor,
    )
    .with_hyperparameters(forest_hyperparameters())
    .with_constant("random_state", 0i64)
}

pub fn decision_tree_regressor() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "DecisionTreeRegressor",
        AlgorithmKind::DecisionTreeRegressor,
        ComponentType::Regressor,
    )
    .with_hyperparameters(vec![
        Hyperparameter::uniform_int("max_depth", 1, 20, 10),
        Hyperparameter::uniform_int("min_samples_split", 2, 20, 2),
    ])
}

pub fn k_neighbors_regressor() -> AlgorithmComponent {
    AlgorithmComponent::new(
        "KNeighborsRegressor",
        AlgorithmKind::KNeighborsRegressor,
        ComponentType::Regressor,
    )
    .with_hyperparameters(vec![
        Hyperparameter::uniform_int("n_neighbors", 1, 20, 5),
        strings("weights", &["uniform", "distance"], "uniform"),
    ])
}

pub fn data_preprocessors() -> Vec<AlgorithmComponent> {
    vec![
        imputer(),
        one_hot_encoder(),
        variance_threshold_filter(),
        minmax_scaler(),
        standard_scaler(),
        robust_scaler(),
        normalizer(),
    ]
}

pub fn feature_preprocessors() -> Vec<AlgorithmComponent> {
    vec![
        kernel_pca(),
        rbf_sampler(),
        nystroem_sampler(),
        pca(),
        polynomial_features(),
        truncated_svd(),
    ]
}

pub fn classifiers() -> Vec<AlgorithmComponent> {
    vec![
        logistic_regression(),
        gaussian_naive_bayes(),
        decision_tree(),
        random_forest(),
        k_neighbors(),
    ]
}

pub fn regressors() -> Vec<AlgorithmComponent> {
    vec![
        ridge_regression(),
        lasso_regression(),
        decision_tree_regressor(),
        random_forest_regression(),
        k_neighbors_regressor(),
    ]
}

/// Estimators suited to a target type.
pub fn estimators(target_type: TargetType) -> Vec<AlgorithmComponent> {
    if target_type.is_classification() {
        classifiers()
    } else {
        regressors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_component_is_valid_and_buildable() {
        let all = data_preprocessors()
            .into_iter()
            .chain(feature_preprocessors())
            .chain(classifiers())
            .chain(regressors());
        for c in all {
            c.validate().unwrap();
            for setting in c.hyperparameter_iterator().take(20) {
                c.build(&setting)
                    .unwrap_or_else(|e| panic!("{} failed to build: {e}", c.name));
            }
        }
    }

    #[test]
    fn estimators_follow_target_type() {
        assert!(estimators(TargetType::Binary)
            .iter()
            .all(|c| c.component_type == ComponentType::Classifier));
        assert!(estimators(TargetType::Regression)
            .iter()
            .all(|c| c.component_type == ComponentType::Regressor));
    }

    #[test]
    fn kernel_components_fit_small_data() {
        use dc_ml::{Estimator, Matrix, Transformer, Vector};

        use crate::component::Step;

        let x = Matrix::from_shape_fn((12, 3), |(i, j)| ((i * 7 + j * 3) % 5) as f64 + i as f64 * 0.1);
        let y = Vector::from_shape_fn(12, |i| (i % 2) as f64);
        for c in [nystroem_sampler(), kernel_pca()] {
            match c.build(&Default::default()).unwrap() {
                Step::Transformer(mut t) => {
                    let out = t.fit_transform(&x).unwrap();
                    assert_eq!(out.nrows(), 12);
                    assert!(out.iter().all(|v| v.is_finite()));
                }
                Step::Estimator(_) => panic!("{} should be a transformer", c.name),
            }
        }
        for c in [random_forest(), random_forest_regression(), lasso_regression()] {
            match c.build(&Default::default()).unwrap() {
                Step::Estimator(mut e) => {
                    e.fit(&x, &y).unwrap();
                    assert_eq!(e.predict(&x).unwrap().len(), 12);
                }
                Step::Transformer(_) => panic!("{} should be an estimator", c.name),
            }
        }
    }

    #[test]
    fn polynomial_degree_one_excludes_interactions() {
        let settings: Vec<_> = polynomial_features().hyperparameter_iterator().collect();
        // 3 degrees x 2 x 2, minus the two degree-1 interaction settings
        assert_eq!(settings.len(), 10);
    }
}
