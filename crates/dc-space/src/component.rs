//! Algorithm components: the building blocks of an ML framework.

use std::collections::BTreeMap;
use std::fmt;

use dc_ml::{
    Criterion, DecisionTreeClassifier, DecisionTreeRegressor, Estimator, ForestSettings,
    GaussianNb, ImputeStrategy, Imputer, KNeighborsClassifier, KNeighborsRegressor, Kernel,
    KernelKind, KernelPca, Lasso, LogisticRegression, MinMaxScaler, NeighborWeights, Norm,
    Normalizer, Nystroem, OneHotEncoder, Pca, PolynomialFeatures, RandomForestClassifier,
    RandomForestRegressor, RbfSampler, RidgeRegression, RobustScaler, StandardScaler, Transformer,
    TruncatedSvd, VarianceThreshold,
};
use dc_types::{HyperValue, SpaceError, SpaceResult};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::hyperparameter::Hyperparameter;
use crate::product::Odometer;

/// Ordered `(hyperparameter name, values)` pairs.
pub type StateSpace = Vec<(String, Vec<HyperValue>)>;

/// A chosen value per hyperparameter name.
pub type Setting = BTreeMap<String, HyperValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    DataPreprocessor,
    FeaturePreprocessor,
    Classifier,
    Regressor,
}

impl ComponentType {
    pub fn is_estimator(&self) -> bool {
        matches!(self, Self::Classifier | Self::Regressor)
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DataPreprocessor => "data_preprocessor",
            Self::FeaturePreprocessor => "feature_preprocessor",
            Self::Classifier => "classifier",
            Self::Regressor => "regressor",
        };
        write!(f, "{s}")
    }
}

/// The concrete estimator or transformer a component instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    Imputer,
    OneHotEncoder,
    VarianceThreshold,
    MinMaxScaler,
    StandardScaler,
    RobustScaler,
    Normalizer,
    Pca,
    TruncatedSvd,
    RbfSampler,
    Nystroem,
    KernelPca,
    PolynomialFeatures,
    LogisticRegression,
    GaussianNb,
    DecisionTreeClassifier,
    RandomForestClassifier,
    KNeighborsClassifier,
    Ridge,
    Lasso,
    DecisionTreeRegressor,
    RandomForestRegressor,
    KNeighborsRegressor,
}

/// An instantiated pipeline step.
#[derive(Debug)]
pub enum Step {
    Transformer(Box<dyn Transformer>),
    Estimator(Box<dyn Estimator>),
}

/// Typed access to a component's resolved parameters.
struct Params<'a> {
    component: &'a str,
    values: &'a Setting,
}

impl Params<'_> {
    fn invalid(&self, key: &str, expected: &str, value: &HyperValue) -> SpaceError {
        SpaceError::InvalidHyperparameter {
            name: format!("{}__{key}", self.component),
            message: format!("expected {expected}, found {value}"),
        }
    }

    fn get(&self, key: &str) -> Option<&HyperValue> {
        self.values.get(key).filter(|v| !v.is_none_token())
    }

    fn bool_or(&self, key: &str, default: bool) -> SpaceResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.invalid(key, "a bool", v)),
        }
    }

    fn f64_or(&self, key: &str, default: f64) -> SpaceResult<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| self.invalid(key, "a number", v)),
        }
    }

    fn usize_opt(&self, key: &str) -> SpaceResult<Option<usize>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => match v.as_i64() {
                Some(i) if i >= 0 => Ok(Some(i as usize)),
                _ => Err(self.invalid(key, "a non-negative integer", v)),
            },
        }
    }

    fn usize_or(&self, key: &str, default: usize) -> SpaceResult<usize> {
        Ok(self.usize_opt(key)?.unwrap_or(default))
    }

    fn str_or<'b>(&'b self, key: &str, default: &'b str) -> SpaceResult<&'b str> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_str().ok_or_else(|| self.invalid(key, "a string", v)),
        }
    }

    fn pair_or(&self, key: &str, default: (f64, f64)) -> SpaceResult<(f64, f64)> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_pair().ok_or_else(|| self.invalid(key, "a pair", v)),
        }
    }

    fn indices(&self, key: &str) -> SpaceResult<Option<Vec<usize>>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_indices()
                .map(|i| Some(i.to_vec()))
                .ok_or_else(|| self.invalid(key, "column indices", v)),
        }
    }
}

fn model_param(component: &str, key: &str, err: dc_types::ModelError) -> SpaceError {
    SpaceError::InvalidHyperparameter {
        name: format!("{component}__{key}"),
        message: err.to_string(),
    }
}

fn kernel(p: &Params<'_>) -> SpaceResult<Kernel> {
    let kind = KernelKind::parse(p.str_or("kernel", "rbf")?)
        .map_err(|e| model_param(p.component, "kernel", e))?;
    Ok(Kernel {
        kind,
        gamma: p.f64_or("gamma", 1.0)?,
        degree: p.usize_or("degree", 3)? as i32,
        coef0: p.f64_or("coef0", 1.0)?,
    })
}

fn forest_settings(p: &Params<'_>) -> SpaceResult<ForestSettings> {
    let defaults = ForestSettings::default();
    Ok(ForestSettings {
        n_estimators: p.usize_or("n_estimators", defaults.n_estimators)?,
        max_depth: p.usize_opt("max_depth")?,
        min_samples_split: p.usize_or("min_samples_split", defaults.min_samples_split)?,
        max_features: p.f64_or("max_features", defaults.max_features)?,
        bootstrap: p.bool_or("bootstrap", defaults.bootstrap)?,
        seed: p.usize_or("random_state", 0)? as u64,
    })
}

impl AlgorithmKind {
    /// Parameter names the kind accepts.
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            Self::Imputer => &["strategy"],
            Self::OneHotEncoder => &["categorical_features"],
            Self::VarianceThreshold => &["threshold"],
            Self::MinMaxScaler | Self::GaussianNb => &[],
            Self::StandardScaler => &["with_mean", "with_std"],
            Self::RobustScaler => &["with_centering", "with_scaling", "quantile_range"],
            Self::Normalizer => &["norm"],
            Self::Pca => &["n_components", "whiten"],
            Self::TruncatedSvd => &["n_components"],
            Self::RbfSampler => &["gamma", "n_components", "random_state"],
            Self::Nystroem => &["kernel", "gamma", "degree", "coef0", "n_components", "random_state"],
            Self::KernelPca => &["kernel", "gamma", "degree", "coef0", "n_components"],
            Self::PolynomialFeatures => &["degree", "interaction_only", "include_bias"],
            Self::LogisticRegression => &["C", "max_iter", "fit_intercept"],
            Self::DecisionTreeClassifier => &["criterion", "max_depth", "min_samples_split"],
            Self::RandomForestClassifier => &[
                "criterion",
                "n_estimators",
                "max_depth",
                "min_samples_split",
                "max_features",
                "bootstrap",
                "random_state",
            ],
            Self::RandomForestRegressor => &[
                "n_estimators",
                "max_depth",
                "min_samples_split",
                "max_features",
                "bootstrap",
                "random_state",
            ],
            Self::KNeighborsClassifier | Self::KNeighborsRegressor => &["n_neighbors", "weights"],
            Self::Ridge => &["alpha", "fit_intercept"],
            Self::Lasso => &["alpha", "fit_intercept", "max_iter", "tol"],
            Self::DecisionTreeRegressor => &["max_depth", "min_samples_split"],
        }
    }

    /// Instantiates the step. Keys are unprefixed hyperparameter names;
    /// none-token values leave the parameter at its default.
    pub fn build(&self, component: &str, values: &Setting) -> SpaceResult<Step> {
        let accepted = self.parameter_names();
        if let Some(unknown) = values.keys().find(|k| !accepted.contains(&k.as_str())) {
            return Err(SpaceError::UnknownHyperparameter {
                name: format!("{component}__{unknown}"),
            });
        }
        let p = Params { component, values };
        let step = match self {
            Self::Imputer => {
                let strategy = ImputeStrategy::parse(p.str_or("strategy", "mean")?)
                    .map_err(|e| model_param(component, "strategy", e))?;
                Step::Transformer(Box::new(Imputer::new(strategy)))
            }
            Self::OneHotEncoder => {
                Step::Transformer(Box::new(OneHotEncoder::new(p.indices("categorical_features")?)))
            }
            Self::VarianceThreshold => Step::Transformer(Box::new(VarianceThreshold::new(
                p.f64_or("threshold", 0.0)?,
            ))),
            Self::MinMaxScaler => Step::Transformer(Box::new(MinMaxScaler::new())),
            Self::StandardScaler => Step::Transformer(Box::new(StandardScaler::new(
                p.bool_or("with_mean", true)?,
                p.bool_or("with_std", true)?,
            ))),
            Self::RobustScaler => Step::Transformer(Box::new(RobustScaler::new(
                p.bool_or("with_centering", true)?,
                p.bool_or("with_scaling", true)?,
                p.pair_or("quantile_range", (0.25, 0.75))?,
            ))),
            Self::Normalizer => {
                let norm = Norm::parse(p.str_or("norm", "l2")?)
                    .map_err(|e| model_param(component, "norm", e))?;
                Step::Transformer(Box::new(Normalizer::new(norm)))
            }
            Self::Pca => Step::Transformer(Box::new(Pca::new(
                p.usize_opt("n_components")?,
                p.bool_or("whiten", false)?,
            ))),
            Self::TruncatedSvd => Step::Transformer(Box::new(TruncatedSvd::new(
                p.usize_or("n_components", 2)?,
            ))),
            Self::RbfSampler => Step::Transformer(Box::new(RbfSampler::new(
                p.f64_or("gamma", 1.0)?,
                p.usize_or("n_components", 100)?,
                p.usize_or("random_state", 0)? as u64,
            ))),
            Self::Nystroem => Step::Transformer(Box::new(Nystroem::new(
                kernel(&p)?,
                p.usize_or("n_components", 100)?,
                p.usize_or("random_state", 0)? as u64,
            ))),
            Self::KernelPca => Step::Transformer(Box::new(KernelPca::new(
                kernel(&p)?,
                p.usize_opt("n_components")?,
            ))),
            Self::PolynomialFeatures => Step::Transformer(Box::new(PolynomialFeatures::new(
                p.usize_or("degree", 2)?,
                p.bool_or("interaction_only", false)?,
                p.bool_or("include_bias", true)?,
            ))),
            Self::LogisticRegression => Step::Estimator(Box::new(LogisticRegression::new(
                p.f64_or("C", 1.0)?,
                p.usize_or("max_iter", 100)?,
                p.bool_or("fit_intercept", true)?,
            ))),
            Self::GaussianNb => Step::Estimator(Box::new(GaussianNb::new())),
            Self::DecisionTreeClassifier => {
                let criterion = Criterion::parse(p.str_or("criterion", "gini")?)
                    .map_err(|e| model_param(component, "criterion", e))?;
                Step::Estimator(Box::new(DecisionTreeClassifier::new(
                    criterion,
                    p.usize_opt("max_depth")?,
                    p.usize_or("min_samples_split", 2)?,
                )))
            }
            Self::RandomForestClassifier => {
                let criterion = Criterion::parse(p.str_or("criterion", "gini")?)
                    .map_err(|e| model_param(component, "criterion", e))?;
                Step::Estimator(Box::new(RandomForestClassifier::new(
                    criterion,
                    forest_settings(&p)?,
                )))
            }
            Self::RandomForestRegressor => {
                Step::Estimator(Box::new(RandomForestRegressor::new(forest_settings(&p)?)))
            }
            Self::KNeighborsClassifier | Self::KNeighborsRegressor => {
                let weights = NeighborWeights::parse(p.str_or("weights", "uniform")?)
                    .map_err(|e| model_param(component, "weights", e))?;
                let n_neighbors = p.usize_or("n_neighbors", 5)?;
                if *self == Self::KNeighborsClassifier {
                    Step::Estimator(Box::new(KNeighborsClassifier::new(n_neighbors, weights)))
                } else {
                    Step::Estimator(Box::new(KNeighborsRegressor::new(n_neighbors, weights)))
                }
            }
            Self::Ridge => Step::Estimator(Box::new(RidgeRegression::new(
                p.f64_or("alpha", 1.0)?,
                p.bool_or("fit_intercept", true)?,
            ))),
            Self::Lasso => Step::Estimator(Box::new(Lasso::new(
                p.f64_or("alpha", 1.0)?,
                p.bool_or("fit_intercept", true)?,
                p.usize_or("max_iter", 1000)?,
                p.f64_or("tol", 1e-4)?,
            ))),
            Self::DecisionTreeRegressor => Step::Estimator(Box::new(DecisionTreeRegressor::new(
                p.usize_opt("max_depth")?,
                p.usize_or("min_samples_split", 2)?,
            ))),
        };
        Ok(step)
    }
}

/// Choosing `value` for `hyperparameter` rules out `values` for the later
/// hyperparameter `excludes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionCondition {
    pub hyperparameter: String,
    pub value: HyperValue,
    pub excludes: String,
    pub values: Vec<HyperValue>,
}

impl ExclusionCondition {
    pub fn new(
        hyperparameter: impl Into<String>,
        value: impl Into<HyperValue>,
        excludes: impl Into<String>,
        values: Vec<HyperValue>,
    ) -> Self {
        Self {
            hyperparameter: hyperparameter.into(),
            value: value.into(),
            excludes: excludes.into(),
            values,
        }
    }
}

/// Values ruled out for `name` given the choices made so far.
pub fn excluded_values<'a>(
    conditions: &'a [ExclusionCondition],
    chosen: &[(String, HyperValue)],
    name: &str,
) -> Vec<&'a HyperValue> {
    conditions
        .iter()
        .filter(|c| c.excludes == name)
        .filter(|c| {
            chosen
                .iter()
                .any(|(h, v)| *h == c.hyperparameter && *v == c.value)
        })
        .flat_map(|c| c.values.iter())
        .collect()
}

/// Whether an ordered setting violates no exclusion condition.
pub fn satisfies_exclusions(conditions: &[ExclusionCondition], setting: &[(String, HyperValue)]) -> bool {
    setting.iter().enumerate().all(|(i, (name, value))| {
        !excluded_values(conditions, &setting[..i], name).contains(&value)
    })
}

/// A component of an ML framework: one algorithm with its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmComponent {
    pub name: String,
    pub kind: AlgorithmKind,
    pub component_type: ComponentType,
    pub hyperparameters: Vec<Hyperparameter>,
    /// Fixed values the controller never chooses.
    pub constant_hyperparameters: Setting,
    /// Values supplied by the data environment.
    pub env_dep_hyperparameters: Setting,
    pub exclusion_conditions: Vec<ExclusionCondition>,
}

impl AlgorithmComponent {
    pub fn new(name: impl Into<String>, kind: AlgorithmKind, component_type: ComponentType) -> Self {
        Self {
            name: name.into(),
            kind,
            component_type,
            hyperparameters: Vec::new(),
            constant_hyperparameters: Setting::new(),
            env_dep_hyperparameters: Setting::new(),
            exclusion_conditions: Vec::new(),
        }
    }

    pub fn with_hyperparameters(mut self, hyperparameters: Vec<Hyperparameter>) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: impl Into<HyperValue>) -> Self {
        self.constant_hyperparameters.insert(name.into(), value.into());
        self
    }

    pub fn with_env_dep(mut self, name: impl Into<String>, value: HyperValue) -> Self {
        self.env_dep_hyperparameters.insert(name.into(), value);
        self
    }

    pub fn with_exclusion(mut self, condition: ExclusionCondition) -> Self {
        self.exclusion_conditions.push(condition);
        self
    }

    fn prefixed(&self, hname: &str) -> String {
        format!("{}__{hname}", self.name)
    }

    /// Checks hyperparameter ranges and that every exclusion condition
    /// refers to this component's hyperparameters in order.
    pub fn validate(&self) -> SpaceResult<()> {
        for h in &self.hyperparameters {
            h.validate()?;
        }
        let position = |name: &str| self.hyperparameters.iter().position(|h| h.name() == name);
        for c in &self.exclusion_conditions {
            match (position(&c.hyperparameter), position(&c.excludes)) {
                (Some(a), Some(b)) if a < b => {}
                _ => {
                    return Err(SpaceError::InvalidHyperparameter {
                        name: self.prefixed(&c.hyperparameter),
                        message: format!("exclusion condition on {} is out of order", c.excludes),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn hyperparameter_name_space(&self) -> Vec<String> {
        self.hyperparameters
            .iter()
            .map(|h| self.prefixed(h.name()))
            .collect()
    }

    pub fn hyperparameter_state_space(&self, with_none_token: bool) -> StateSpace {
        self.hyperparameters
            .iter()
            .map(|h| (self.prefixed(h.name()), h.state_space(with_none_token)))
            .collect()
    }

    pub fn hyperparameter_exclusion_conditions(&self) -> Vec<ExclusionCondition> {
        self.exclusion_conditions
            .iter()
            .map(|c| ExclusionCondition {
                hyperparameter: self.prefixed(&c.hyperparameter),
                value: c.value.clone(),
                excludes: self.prefixed(&c.excludes),
                values: c.values.clone(),
            })
            .collect()
    }

    pub fn env_dep_hyperparameter_name_space(&self) -> Setting {
        self.env_dep_hyperparameters
            .iter()
            .map(|(k, v)| (self.prefixed(k), v.clone()))
            .collect()
    }

    /// Every setting in the cartesian product of the state space that
    /// satisfies the exclusion conditions. Lazy.
    pub fn hyperparameter_iterator(&self) -> HyperparameterIter {
        HyperparameterIter::new(
            self.hyperparameter_state_space(false),
            self.hyperparameter_exclusion_conditions(),
        )
    }

    /// One random setting. Values excluded by earlier choices are never
    /// drawn.
    pub fn sample_hyperparameter_state_space<R: Rng + ?Sized>(&self, rng: &mut R) -> SpaceResult<Setting> {
        let conditions = self.hyperparameter_exclusion_conditions();
        let mut chosen: Vec<(String, HyperValue)> = Vec::new();
        for (name, values) in self.hyperparameter_state_space(false) {
            let excluded = excluded_values(&conditions, &chosen, &name);
            let allowed: Vec<&HyperValue> = values.iter().filter(|v| !excluded.contains(v)).collect();
            if allowed.is_empty() {
                return Err(SpaceError::InvalidHyperparameter {
                    name,
                    message: "every value is excluded".to_string(),
                });
            }
            let value = allowed[rng.gen_range(0..allowed.len())].clone();
            chosen.push((name, value));
        }
        Ok(chosen.into_iter().collect())
    }

    /// Instantiates the step from prefixed hyperparameter values.
    /// Constants are applied first, then environment-dependent values, then
    /// `hyperparameters`; keys of other components are ignored.
    pub fn build(&self, hyperparameters: &Setting) -> SpaceResult<Step> {
        let prefix = format!("{}__", self.name);
        let mut values = self.constant_hyperparameters.clone();
        values.extend(self.env_dep_hyperparameters.clone());
        for (k, v) in hyperparameters {
            if let Some(short) = k.strip_prefix(&prefix) {
                if !v.is_none_token() {
                    values.insert(short.to_string(), v.clone());
                }
            }
        }
        self.kind.build(&self.name, &values)
    }
}

impl fmt::Display for AlgorithmComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<AlgorithmComponent: \"{}\">", self.name)
    }
}

/// Lazy cartesian product over a component's hyperparameter states.
#[derive(Debug, Clone)]
pub struct HyperparameterIter {
    space: StateSpace,
    conditions: Vec<ExclusionCondition>,
    indices: Odometer,
}

impl HyperparameterIter {
    fn new(space: StateSpace, conditions: Vec<ExclusionCondition>) -> Self {
        let indices = Odometer::new(space.iter().map(|(_, v)| v.len()).collect());
        Self {
            space,
            conditions,
            indices,
        }
    }
}

impl Iterator for HyperparameterIter {
    type Item = Setting;

    fn next(&mut self) -> Option<Setting> {
        loop {
            let setting: Vec<(String, HyperValue)> = self
                .indices
                .next()?
                .iter()
                .zip(&self.space)
                .map(|(&i, (name, values))| (name.clone(), values[i].clone()))
                .collect();
            if satisfies_exclusions(&self.conditions, &setting) {
                return Some(setting.into_iter().collect());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn scaler() -> AlgorithmComponent {
        AlgorithmComponent::new(
            "StandardScaler",
            AlgorithmKind::StandardScaler,
            ComponentType::DataPreprocessor,
        )
        .with_hyperparameters(vec![
            Hyperparameter::categorical("with_mean", vec![true.into(), false.into()], true),
            Hyperparameter::categorical("with_std", vec![true.into(), false.into()], true),
        ])
        .with_exclusion(ExclusionCondition::new(
            "with_mean",
            false,
            "with_std",
            vec![false.into()],
        ))
    }

    #[test]
    fn names_are_prefixed() {
        let c = scaler();
        assert_eq!(
            c.hyperparameter_name_space(),
            vec!["StandardScaler__with_mean", "StandardScaler__with_std"]
        );
        let conds = c.hyperparameter_exclusion_conditions();
        assert_eq!(conds[0].hyperparameter, "StandardScaler__with_mean");
        assert_eq!(conds[0].excludes, "StandardScaler__with_std");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn component_without_hyperparameters_has_empty_spaces() {
        let c = AlgorithmComponent::new("MinMaxScaler", AlgorithmKind::MinMaxScaler, ComponentType::DataPreprocessor);
        assert!(c.hyperparameter_name_space().is_empty());
        assert!(c.hyperparameter_state_space(true).is_empty());
        // the empty product has exactly one (empty) setting
        assert_eq!(c.hyperparameter_iterator().count(), 1);
    }

    #[test]
    fn iterator_skips_excluded_combinations() {
        let settings: Vec<Setting> = scaler().hyperparameter_iterator().collect();
        assert_eq!(settings.len(), 3);
        assert!(!settings.iter().any(|s| {
            s["StandardScaler__with_mean"] == HyperValue::Bool(false)
                && s["StandardScaler__with_std"] == HyperValue::Bool(false)
        }));
    }

    #[test]
    fn sampling_respects_exclusions() {
        let c = scaler();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..50 {
            let s = c.sample_hyperparameter_state_space(&mut rng).unwrap();
            assert_eq!(s.len(), 2);
            assert!(!(s["StandardScaler__with_mean"] == HyperValue::Bool(false)
                && s["StandardScaler__with_std"] == HyperValue::Bool(false)));
        }
    }

    #[test]
    fn build_applies_values_and_drops_none_token() {
        let c = scaler();
        let mut setting = Setting::new();
        setting.insert("StandardScaler__with_mean".into(), HyperValue::Bool(false));
        setting.insert("StandardScaler__with_std".into(), HyperValue::NoneToken);
        setting.insert("Other__x".into(), HyperValue::Int(1));
        assert!(matches!(c.build(&setting).unwrap(), Step::Transformer(_)));

        setting.insert("StandardScaler__with_std".into(), HyperValue::Int(3));
        assert!(matches!(
            c.build(&setting),
            Err(SpaceError::InvalidHyperparameter { .. })
        ));
    }

    #[test]
    fn unknown_parameters_are_rejected() {
        let c = scaler().with_constant("bogus", 1i64);
        assert!(matches!(
            c.build(&Setting::new()),
            Err(SpaceError::UnknownHyperparameter { .. })
        ));
    }

    #[test]
    fn out_of_order_exclusion_is_invalid() {
        let c = scaler().with_exclusion(ExclusionCondition::new(
            "with_std",
            true,
            "with_mean",
            vec![true.into()],
        ));
        assert!(c.validate().is_err());
    }
}
