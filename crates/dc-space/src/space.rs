//! The algorithm space: the components and hyperparameter values the
//! controller chooses among.
//!
//! An ML framework follows the structure
//!
//! ```text
//! data preprocessor -> feature preprocessor -> classifier/regressor
//! ```
//!
//! The space exposes two vocabularies: the components (optionally followed by
//! special tokens) and a flat list of every hyperparameter value, keyed
//! `"<Component>__<hyperparameter>__state_<i>"`.

use std::fmt;

use dc_types::{HyperValue, SpaceError, SpaceResult, TargetType};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog;
use crate::component::{AlgorithmComponent, ComponentType, Setting, StateSpace};
use crate::framework::MlFramework;
use crate::product::Odometer;

pub const START_TOKEN: &str = "<sos>";
pub const END_TOKEN: &str = "<eos>";
pub const NONE_TOKEN: &str = "<none>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialToken {
    Start,
    End,
    None,
}

impl SpecialToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => START_TOKEN,
            Self::End => END_TOKEN,
            Self::None => NONE_TOKEN,
        }
    }

    /// Key of the token in the flat hyperparameter state space.
    pub fn flat_key(&self) -> &'static str {
        match self {
            Self::Start => "START_TOKEN",
            Self::End => "END_TOKEN",
            Self::None => "NONE_TOKEN",
        }
    }
}

impl fmt::Display for SpecialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entry of the component vocabulary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpaceItem<'a> {
    Algorithm(&'a AlgorithmComponent),
    Token(SpecialToken),
}

impl SpaceItem<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Algorithm(c) => &c.name,
            Self::Token(t) => t.as_str(),
        }
    }
}

/// An entry of the flat hyperparameter vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlatValue {
    Value(HyperValue),
    Token(SpecialToken),
}

impl fmt::Display for FlatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Token(t) => write!(f, "{t}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmSpace {
    pub data_preprocessors: Vec<AlgorithmComponent>,
    pub feature_preprocessors: Vec<AlgorithmComponent>,
    pub estimators: Vec<AlgorithmComponent>,
    pub estimator_type: ComponentType,
    pub with_start_token: bool,
    pub with_end_token: bool,
    pub with_none_token: bool,
    pub hyperparam_with_start_token: bool,
    pub hyperparam_with_end_token: bool,
    pub hyperparam_with_none_token: bool,
}

impl AlgorithmSpace {
    /// Data preprocessors, feature preprocessors, estimator.
    pub const N_COMPONENT_TYPES: usize = 3;

    /// The catalog components for a target type.
    pub fn new(target_type: TargetType) -> Self {
        Self {
            data_preprocessors: catalog::data_preprocessors(),
            feature_preprocessors: catalog::feature_preprocessors(),
            estimators: catalog::estimators(target_type),
            estimator_type: if target_type.is_classification() {
                ComponentType::Classifier
            } else {
                ComponentType::Regressor
            },
            with_start_token: true,
            with_end_token: false,
            with_none_token: false,
            hyperparam_with_start_token: true,
            hyperparam_with_end_token: false,
            hyperparam_with_none_token: true,
        }
    }

    pub fn with_data_preprocessors(mut self, components: Vec<AlgorithmComponent>) -> Self {
        self.data_preprocessors = components;
        self
    }

    pub fn with_feature_preprocessors(mut self, components: Vec<AlgorithmComponent>) -> Self {
        self.feature_preprocessors = components;
        self
    }

    pub fn with_estimators(mut self, components: Vec<AlgorithmComponent>) -> Self {
        self.estimators = components;
        self
    }

    pub fn with_tokens(mut self, start: bool, end: bool, none: bool) -> Self {
        self.with_start_token = start;
        self.with_end_token = end;
        self.with_none_token = none;
        self
    }

    pub fn with_hyperparameter_tokens(mut self, start: bool, end: bool, none: bool) -> Self {
        self.hyperparam_with_start_token = start;
        self.hyperparam_with_end_token = end;
        self.hyperparam_with_none_token = none;
        self
    }

    /// Checks that every component list is non-empty, holds components of
    /// the right type, and that each component is valid.
    pub fn validate(&self) -> SpaceResult<()> {
        for component_type in self.component_type_order() {
            let components = self.components_of_type(component_type);
            if components.is_empty() {
                return Err(SpaceError::EmptyComponentList {
                    component_type: component_type.to_string(),
                });
            }
            for c in components {
                if c.component_type != component_type {
                    return Err(SpaceError::InvalidHyperparameter {
                        name: c.name.clone(),
                        message: format!("{} listed as {component_type}", c.component_type),
                    });
                }
                c.validate()?;
            }
        }
        Ok(())
    }

    pub fn component_type_order(&self) -> [ComponentType; Self::N_COMPONENT_TYPES] {
        [
            ComponentType::DataPreprocessor,
            ComponentType::FeaturePreprocessor,
            self.estimator_type,
        ]
    }

    pub fn components_of_type(&self, component_type: ComponentType) -> &[AlgorithmComponent] {
        match component_type {
            ComponentType::DataPreprocessor => &self.data_preprocessors,
            ComponentType::FeaturePreprocessor => &self.feature_preprocessors,
            t if t == self.estimator_type => &self.estimators,
            _ => &[],
        }
    }

    fn algorithms(&self) -> impl Iterator<Item = &AlgorithmComponent> {
        self.data_preprocessors
            .iter()
            .chain(&self.feature_preprocessors)
            .chain(&self.estimators)
    }

    fn enabled_tokens(&self) -> Vec<SpecialToken> {
        [
            (self.with_start_token, SpecialToken::Start),
            (self.with_end_token, SpecialToken::End),
            (self.with_none_token, SpecialToken::None),
        ]
        .into_iter()
        .filter_map(|(on, t)| on.then_some(t))
        .collect()
    }

    /// All components followed by the enabled special tokens.
    pub fn components(&self) -> Vec<SpaceItem<'_>> {
        self.algorithms()
            .map(SpaceItem::Algorithm)
            .chain(self.enabled_tokens().into_iter().map(SpaceItem::Token))
            .collect()
    }

    pub fn component_index(&self, name: &str) -> Option<usize> {
        self.components().iter().position(|c| c.name() == name)
    }

    pub fn hyperparameter_name_space(&self) -> Vec<String> {
        self.algorithms()
            .flat_map(|c| c.hyperparameter_name_space())
            .collect()
    }

    pub fn hyperparameter_state_space(&self) -> StateSpace {
        self.algorithms()
            .flat_map(|c| c.hyperparameter_state_space(false))
            .collect()
    }

    /// Every hyperparameter value keyed `"<name>__state_<i>"`, followed by
    /// the enabled hyperparameter tokens.
    pub fn hyperparameter_state_space_flat(&self) -> Vec<(String, FlatValue)> {
        let mut flat: Vec<(String, FlatValue)> = self
            .hyperparameter_state_space()
            .into_iter()
            .flat_map(|(name, values)| {
                values
                    .into_iter()
                    .enumerate()
                    .map(move |(i, v)| (format!("{name}__state_{i}"), FlatValue::Value(v)))
            })
            .collect();
        let tokens = [
            (self.hyperparam_with_start_token, SpecialToken::Start),
            (self.hyperparam_with_end_token, SpecialToken::End),
            (self.hyperparam_with_none_token, SpecialToken::None),
        ];
        for (on, token) in tokens {
            if on {
                flat.push((token.flat_key().to_string(), FlatValue::Token(token)));
            }
        }
        flat
    }

    pub fn hyperparameter_state_space_values(&self) -> Vec<FlatValue> {
        self.hyperparameter_state_space_flat()
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    pub fn hyperparameter_state_space_keys(&self) -> Vec<String> {
        self.hyperparameter_state_space_flat()
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    fn token_index(&self, token: SpecialToken) -> Option<usize> {
        self.components()
            .iter()
            .position(|c| *c == SpaceItem::Token(token))
    }

    pub fn start_token_index(&self) -> Option<usize> {
        self.token_index(SpecialToken::Start)
    }

    pub fn end_token_index(&self) -> Option<usize> {
        self.token_index(SpecialToken::End)
    }

    pub fn none_token_index(&self) -> Option<usize> {
        self.token_index(SpecialToken::None)
    }

    fn h_token_index(&self, token: SpecialToken) -> Option<usize> {
        self.hyperparameter_state_space_values()
            .iter()
            .position(|v| *v == FlatValue::Token(token))
    }

    pub fn h_start_token_index(&self) -> Option<usize> {
        self.h_token_index(SpecialToken::Start)
    }

    pub fn h_none_token_index(&self) -> Option<usize> {
        self.h_token_index(SpecialToken::None)
    }

    pub fn n_components(&self) -> usize {
        self.components().len()
    }

    pub fn n_hyperparameter_names(&self) -> usize {
        self.hyperparameter_name_space().len()
    }

    pub fn n_hyperparameters(&self) -> usize {
        self.hyperparameter_state_space_flat().len()
    }

    /// Flat indices of the values of one hyperparameter.
    pub fn h_value_index(&self, hyperparameter_name: &str) -> Vec<usize> {
        let prefix = format!("{hyperparameter_name}__state_");
        self.hyperparameter_state_space_keys()
            .iter()
            .enumerate()
            .filter(|(_, k)| k.starts_with(&prefix))
            .map(|(i, _)| i)
            .collect()
    }

    /// A random framework. The same seed always yields the same framework.
    pub fn sample_ml_framework(&self, seed: Option<u64>) -> SpaceResult<MlFramework> {
        let mut rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        self.sample_ml_framework_with(&mut rng, &Setting::new())
    }

    /// A random framework drawn with `rng`; one component per type, then a
    /// setting of each component's hyperparameters.
    pub fn sample_ml_framework_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        env_dep_hyperparameters: &Setting,
    ) -> SpaceResult<MlFramework> {
        let mut components = Vec::with_capacity(Self::N_COMPONENT_TYPES);
        for component_type in self.component_type_order() {
            let choices = self.components_of_type(component_type);
            if choices.is_empty() {
                return Err(SpaceError::EmptyComponentList {
                    component_type: component_type.to_string(),
                });
            }
            components.push(choices[rng.gen_range(0..choices.len())].clone());
        }
        let mut hyperparameters = Setting::new();
        for c in &components {
            hyperparameters.extend(c.sample_hyperparameter_state_space(rng)?);
        }
        self.create_ml_framework(components, &hyperparameters, env_dep_hyperparameters)
    }

    /// Every algorithm combination with every valid hyperparameter setting,
    /// built lazily.
    pub fn framework_iterator(&self) -> FrameworkIter<'_> {
        FrameworkIter::new(self)
    }

    /// Builds a framework. None-token values are dropped so those
    /// hyperparameters keep their defaults.
    pub fn create_ml_framework(
        &self,
        components: Vec<AlgorithmComponent>,
        hyperparameters: &Setting,
        env_dep_hyperparameters: &Setting,
    ) -> SpaceResult<MlFramework> {
        let mut merged: Setting = env_dep_hyperparameters.clone();
        merged.extend(hyperparameters.clone());
        merged.retain(|_, v| !v.is_none_token());
        debug!(
            components = ?components.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            n_hyperparameters = merged.len(),
            "creating ml framework"
        );
        MlFramework::build(components, merged)
    }

    /// Rebuilds `framework` with `hyperparameters` set on top of its current
    /// ones; none-token values are dropped.
    pub fn set_ml_framework_params(
        &self,
        framework: MlFramework,
        hyperparameters: &Setting,
    ) -> SpaceResult<MlFramework> {
        let mut merged = framework.hyperparameters().clone();
        for (k, v) in hyperparameters {
            if !v.is_none_token() {
                merged.insert(k.clone(), v.clone());
            }
        }
        MlFramework::build(framework.components().to_vec(), merged)
    }
}

/// Lazy iterator over all frameworks of a space.
pub struct FrameworkIter<'a> {
    space: &'a AlgorithmSpace,
    algorithms: Odometer,
    current: Option<(Vec<AlgorithmComponent>, Vec<Vec<Setting>>, Odometer)>,
}

impl<'a> FrameworkIter<'a> {
    fn new(space: &'a AlgorithmSpace) -> Self {
        let sizes = space
            .component_type_order()
            .iter()
            .map(|t| space.components_of_type(*t).len())
            .collect();
        Self {
            space,
            algorithms: Odometer::new(sizes),
            current: None,
        }
    }

    fn next_algorithms(&mut self) -> Option<()> {
        let indices = self.algorithms.next()?;
        let components: Vec<AlgorithmComponent> = self
            .space
            .component_type_order()
            .iter()
            .zip(indices)
            .map(|(t, i)| self.space.components_of_type(*t)[i].clone())
            .collect();
        let settings: Vec<Vec<Setting>> = components
            .iter()
            .map(|c| c.hyperparameter_iterator().collect())
            .collect();
        let odometer = Odometer::new(settings.iter().map(Vec::len).collect());
        self.current = Some((components, settings, odometer));
        Some(())
    }
}

impl Iterator for FrameworkIter<'_> {
    type Item = SpaceResult<MlFramework>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((components, settings, odometer)) = self.current.as_mut() {
                if let Some(indices) = odometer.next() {
                    let mut hyperparameters = Setting::new();
                    for (s, i) in settings.iter().zip(indices) {
                        hyperparameters.extend(s[i].clone());
                    }
                    return Some(self.space.create_ml_framework(
                        components.clone(),
                        &hyperparameters,
                        &Setting::new(),
                    ));
                }
            }
            self.next_algorithms()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    fn small_space() -> AlgorithmSpace {
        AlgorithmSpace::new(TargetType::Binary)
            .with_data_preprocessors(vec![catalog::imputer(), catalog::minmax_scaler()])
            .with_feature_preprocessors(vec![catalog::pca()])
            .with_estimators(vec![catalog::gaussian_naive_bayes(), catalog::logistic_regression()])
    }

    #[test]
    fn components_end_with_enabled_tokens() {
        let space = small_space().with_tokens(true, true, false);
        let names: Vec<String> = space.components().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(
            names,
            vec!["Imputer", "MinMaxScaler", "PCA", "GaussianNB", "LogisticRegression", "<sos>", "<eos>"]
        );
        assert_eq!(space.start_token_index(), Some(5));
        assert_eq!(space.end_token_index(), Some(6));
        assert_eq!(space.none_token_index(), None);
        assert_eq!(space.n_components(), 7);
    }

    #[test]
    fn flat_state_space_keys_and_tokens() {
        let space = small_space();
        let keys = space.hyperparameter_state_space_keys();
        assert_eq!(keys[0], "Imputer__strategy__state_0");
        assert_eq!(keys[2], "Imputer__strategy__state_2");
        assert_eq!(&keys[keys.len() - 2..], &["START_TOKEN", "NONE_TOKEN"]);
        assert_eq!(space.h_start_token_index(), Some(keys.len() - 2));
        assert_eq!(space.h_value_index("Imputer__strategy"), vec![0, 1, 2]);
        assert_eq!(
            space.hyperparameter_name_space(),
            vec![
                "Imputer__strategy",
                "PCA__n_components",
                "PCA__whiten",
                "LogisticRegression__C",
                "LogisticRegression__fit_intercept"
            ]
        );
        assert_eq!(space.n_hyperparameter_names(), 5);
        // 3 + 5 + 2 + 5 + 2 values and two tokens
        assert_eq!(space.n_hyperparameters(), 19);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let space = AlgorithmSpace::new(TargetType::Multiclass);
        let a = space.sample_ml_framework(Some(11)).unwrap();
        let b = space.sample_ml_framework(Some(11)).unwrap();
        assert_eq!(a.descriptor(), b.descriptor());
        assert_eq!(a.descriptor().steps.len(), AlgorithmSpace::N_COMPONENT_TYPES);
    }

    #[test]
    fn framework_iterator_covers_the_product() {
        let space = AlgorithmSpace::new(TargetType::Binary)
            .with_data_preprocessors(vec![catalog::minmax_scaler(), catalog::normalizer()])
            .with_feature_preprocessors(vec![catalog::truncated_svd()])
            .with_estimators(vec![catalog::gaussian_naive_bayes()]);
        let frameworks: Vec<MlFramework> = space.framework_iterator().map(Result::unwrap).collect();
        // (1 + 3 norms) x 5 n_components x 1
        assert_eq!(frameworks.len(), 20);
    }

    #[test]
    fn none_token_values_are_dropped() {
        let space = small_space();
        let mut hp = Setting::new();
        hp.insert("Imputer__strategy".into(), HyperValue::NoneToken);
        let framework = space
            .create_ml_framework(
                vec![catalog::imputer(), catalog::pca(), catalog::gaussian_naive_bayes()],
                &hp,
                &Setting::new(),
            )
            .unwrap();
        assert!(framework.hyperparameters().is_empty());

        hp.insert("PCA__whiten".into(), HyperValue::Bool(true));
        let framework = space.set_ml_framework_params(framework, &hp).unwrap();
        assert_eq!(framework.hyperparameters().len(), 1);
        assert_eq!(framework.to_string(), "Imputer() -> PCA(whiten=true) -> GaussianNB()");
    }

    #[test]
    fn validation_catches_misplaced_components() {
        assert!(AlgorithmSpace::new(TargetType::Regression).validate().is_ok());
        let bad = small_space().with_estimators(vec![catalog::pca()]);
        assert!(bad.validate().is_err());
        let empty = small_space().with_feature_preprocessors(vec![]);
        assert!(matches!(empty.validate(), Err(SpaceError::EmptyComponentList { .. })));
    }
}
