//! ML frameworks: a fitted-or-not pipeline plus a serializable descriptor.

use std::fmt;

use dc_ml::{Matrix, Pipeline, Vector};
use dc_types::{ModelResult, SpaceError, SpaceResult};
use serde::{Deserialize, Serialize};

use crate::component::{AlgorithmComponent, ComponentType, Setting, Step};

/// One step of a framework with the hyperparameters set on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkStep {
    pub name: String,
    pub component_type: ComponentType,
    /// Unprefixed hyperparameter names.
    pub params: Setting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkDescriptor {
    pub steps: Vec<FrameworkStep>,
}

impl FrameworkDescriptor {
    pub fn algorithm_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }
}

impl fmt::Display for FrameworkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            let params: Vec<String> = step.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, "{}({})", step.name, params.join(", "))?;
        }
        Ok(())
    }
}

/// A pipeline built from algorithm components.
#[derive(Debug)]
pub struct MlFramework {
    components: Vec<AlgorithmComponent>,
    hyperparameters: Setting,
    descriptor: FrameworkDescriptor,
    pipeline: Pipeline,
}

impl MlFramework {
    /// Builds the pipeline. Every component but the last must be a
    /// transformer; the last must be an estimator. `hyperparameters` uses
    /// prefixed names and must not contain none tokens.
    pub fn build(components: Vec<AlgorithmComponent>, hyperparameters: Setting) -> SpaceResult<Self> {
        let (last, transformers) = components.split_last().ok_or_else(|| SpaceError::EmptyComponentList {
            component_type: "framework".to_string(),
        })?;

        let mut steps = Vec::with_capacity(transformers.len());
        for c in transformers {
            match c.build(&hyperparameters)? {
                Step::Transformer(t) => steps.push(t),
                Step::Estimator(_) => {
                    return Err(SpaceError::InvalidHyperparameter {
                        name: c.name.clone(),
                        message: "estimator used before the final step".to_string(),
                    })
                }
            }
        }
        let estimator = match last.build(&hyperparameters)? {
            Step::Estimator(e) => e,
            Step::Transformer(_) => {
                return Err(SpaceError::InvalidHyperparameter {
                    name: last.name.clone(),
                    message: "final step must be an estimator".to_string(),
                })
            }
        };

        let descriptor = FrameworkDescriptor {
            steps: components
                .iter()
                .map(|c| {
                    let prefix = format!("{}__", c.name);
                    FrameworkStep {
                        name: c.name.clone(),
                        component_type: c.component_type,
                        params: hyperparameters
                            .iter()
                            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|s| (s.to_string(), v.clone())))
                            .collect(),
                    }
                })
                .collect(),
        };

        Ok(Self {
            components,
            hyperparameters,
            descriptor,
            pipeline: Pipeline::new(steps, estimator),
        })
    }

    pub fn components(&self) -> &[AlgorithmComponent] {
        &self.components
    }

    pub fn hyperparameters(&self) -> &Setting {
        &self.hyperparameters
    }

    pub fn descriptor(&self) -> &FrameworkDescriptor {
        &self.descriptor
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn fit(&mut self, x: &Matrix, y: &Vector) -> ModelResult<()> {
        self.pipeline.fit(x, y)
    }

    pub fn predict(&self, x: &Matrix) -> ModelResult<Vector> {
        self.pipeline.predict(x)
    }
}

impl fmt::Display for MlFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use dc_types::HyperValue;
    use ndarray::array;

    #[test]
    fn builds_and_describes_a_framework() {
        let mut hp = Setting::new();
        hp.insert("Imputer__strategy".into(), HyperValue::from("median"));
        hp.insert("PCA__n_components".into(), HyperValue::Int(1));
        let mut framework = MlFramework::build(
            vec![catalog::imputer(), catalog::pca(), catalog::gaussian_naive_bayes()],
            hp,
        )
        .unwrap();
        assert_eq!(
            framework.to_string(),
            "Imputer(strategy=median) -> PCA(n_components=1) -> GaussianNB()"
        );
        assert_eq!(
            framework.descriptor().algorithm_names(),
            vec!["Imputer", "PCA", "GaussianNB"]
        );

        let x = array![[0.0, 0.0], [0.1, 0.1], [5.0, 5.0], [5.1, 5.1]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        framework.fit(&x, &y).unwrap();
        assert_eq!(framework.predict(&x).unwrap(), y);
    }

    #[test]
    fn step_roles_are_checked() {
        let err = MlFramework::build(vec![catalog::gaussian_naive_bayes(), catalog::pca()], Setting::new());
        assert!(err.is_err());
        assert!(MlFramework::build(vec![], Setting::new()).is_err());
    }

    #[test]
    fn descriptor_serializes() {
        let framework = MlFramework::build(
            vec![catalog::minmax_scaler(), catalog::truncated_svd(), catalog::ridge_regression()],
            Setting::new(),
        )
        .unwrap();
        let json = serde_json::to_string(framework.descriptor()).unwrap();
        let back: FrameworkDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, framework.descriptor());
    }
}
