//! The task environment the controller interacts with: it hands out data
//! environments, metafeatures and environment-dependent hyperparameters, and
//! scores proposed ML frameworks under a time and memory budget.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use dc_ml::{Matrix, Scorer};
use dc_space::{FrameworkDescriptor, MlFramework, Setting};
use dc_types::{
    ControllerError, DataError, DcResult, ExperimentConfig, HyperValue, ModelError, TargetType,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::environment::{DataEnvSample, DataEnvironment};

pub const ONE_HOT_CATEGORICAL_FEATURES: &str = "OneHotEncoder__categorical_features";

/// Observation handed to the controller at the start of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub metafeatures: Vec<f64>,
    pub data_env_name: String,
}

/// A successful framework evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub reward: f64,
    /// Validation score on the out-of-bag rows.
    pub score: f64,
}

pub struct TaskEnvironment {
    data_envs: Vec<DataEnvironment>,
    scorer: Option<Scorer>,
    per_framework_time_limit: Duration,
    per_framework_memory_limit_mb: u64,
    error_reward: f64,
    n_samples: Option<usize>,
    fit_verbose: bool,
    rng: ChaCha8Rng,
    current: Option<usize>,
    current_sample: Option<DataEnvSample>,
}

impl std::fmt::Debug for TaskEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEnvironment")
            .field("data_envs", &self.data_env_names())
            .field("per_framework_time_limit", &self.per_framework_time_limit)
            .field("per_framework_memory_limit_mb", &self.per_framework_memory_limit_mb)
            .field("error_reward", &self.error_reward)
            .field("current", &self.current_data_env_name())
            .finish()
    }
}

impl TaskEnvironment {
    pub fn new(data_envs: Vec<DataEnvironment>, random_state: Option<u64>) -> DcResult<Self> {
        if data_envs.is_empty() {
            return Err(DataError::NoDataEnvironment.into());
        }
        let target_type = data_envs[0].target_type;
        if let Some(env) = data_envs.iter().find(|e| e.target_type != target_type) {
            return Err(ControllerError::InvalidConfig {
                message: format!(
                    "data environment {} has target type {}, expected {target_type}",
                    env.name, env.target_type
                ),
            }
            .into());
        }
        Ok(Self {
            data_envs,
            scorer: None,
            per_framework_time_limit: Duration::from_secs(180),
            per_framework_memory_limit_mb: 5000,
            error_reward: 0.1,
            n_samples: None,
            fit_verbose: false,
            rng: match random_state {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            },
            current: None,
            current_sample: None,
        })
    }

    /// Task environment with the limits, error reward and seed of `config`.
    pub fn from_config(config: &ExperimentConfig, data_envs: Vec<DataEnvironment>) -> DcResult<Self> {
        Ok(Self::new(data_envs, config.random_state)?
            .with_time_limit(Duration::from_secs(config.per_framework_time_limit))
            .with_memory_limit_mb(config.per_framework_memory_limit)
            .with_error_reward(config.error_reward)
            .with_fit_verbose(config.fit_verbose))
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.per_framework_time_limit = limit;
        self
    }

    pub fn with_memory_limit_mb(mut self, limit_mb: u64) -> Self {
        self.per_framework_memory_limit_mb = limit_mb;
        self
    }

    pub fn with_error_reward(mut self, error_reward: f64) -> Self {
        self.error_reward = error_reward;
        self
    }

    /// Scores every data environment with `scorer` instead of its own.
    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Caps the number of rows drawn per sample.
    pub fn with_n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = Some(n_samples);
        self
    }

    pub fn with_fit_verbose(mut self, fit_verbose: bool) -> Self {
        self.fit_verbose = fit_verbose;
        self
    }

    pub fn target_type(&self) -> TargetType {
        self.data_envs[0].target_type
    }

    pub fn error_reward(&self) -> f64 {
        self.error_reward
    }

    pub fn data_env_names(&self) -> Vec<&str> {
        self.data_envs.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of metafeatures in a [`TaskState`].
    pub fn n_metafeatures(&self) -> usize {
        1
    }

    pub fn current_data_env(&self) -> Option<&DataEnvironment> {
        self.current.map(|i| &self.data_envs[i])
    }

    pub fn current_data_env_name(&self) -> Option<&str> {
        self.current_data_env().map(|e| e.name.as_str())
    }

    /// Picks a data environment uniformly at random.
    pub fn sample_data_env(&mut self) -> &DataEnvironment {
        let i = self.rng.gen_range(0..self.data_envs.len());
        self.current = Some(i);
        self.current_sample = None;
        debug!(data_env = %self.data_envs[i].name, "sampled data environment");
        &self.data_envs[i]
    }

    fn require_current(&self) -> DcResult<&DataEnvironment> {
        self.current_data_env()
            .ok_or_else(|| DataError::NoDataEnvironment.into())
    }

    /// Draws a fresh bootstrap sample of the current data environment and
    /// returns its metafeatures.
    pub fn sample(&mut self) -> DcResult<TaskState> {
        let i = match self.current {
            Some(i) => i,
            None => return Err(DataError::NoDataEnvironment.into()),
        };
        let env = &self.data_envs[i];
        let n_examples = env.training_data()?.n_rows();
        let sample = env.sample(self.n_samples, &mut self.rng)?;
        self.current_sample = Some(sample);
        Ok(TaskState {
            metafeatures: vec![n_examples as f64],
            data_env_name: env.name.clone(),
        })
    }

    /// Hyperparameters whose values depend on the current data environment.
    pub fn env_dep_hyperparameters(&self) -> DcResult<Setting> {
        let env = self.require_current()?;
        let categorical = env.categorical_feature_indices()?;
        let mut setting = Setting::new();
        setting.insert(
            ONE_HOT_CATEGORICAL_FEATURES.to_string(),
            HyperValue::Indices(categorical),
        );
        Ok(setting)
    }

    pub fn scorer(&self) -> DcResult<Scorer> {
        match self.scorer {
            Some(scorer) => Ok(scorer),
            None => Ok(self.require_current()?.scorer()),
        }
    }

    /// Fits `framework` on the current bootstrap sample and scores it on
    /// the out-of-bag rows. `None` when the framework fails, runs out of
    /// time, or would exceed the memory limit.
    pub fn evaluate(&self, framework: MlFramework) -> Option<Evaluation> {
        let descriptor = framework.descriptor().to_string();
        match self.try_evaluate(framework) {
            Ok(evaluation) => Some(evaluation),
            Err(err) => {
                if self.fit_verbose {
                    info!(framework = %descriptor, error = %err, "framework evaluation failed");
                } else {
                    debug!(framework = %descriptor, error = %err, "framework evaluation failed");
                }
                None
            }
        }
    }

    fn try_evaluate(&self, mut framework: MlFramework) -> DcResult<Evaluation> {
        let sample = self.current_sample.clone().ok_or(DataError::NotSampled)?;
        if sample.x_validation.nrows() == 0 {
            return Err(DataError::InsufficientData {
                message: "bootstrap sample has no out-of-bag rows to score on".to_string(),
            }
            .into());
        }
        let scorer = self.scorer()?;

        let required_mb =
            estimate_memory_mb(framework.descriptor(), &sample.x_train, sample.x_validation.nrows());
        if required_mb > self.per_framework_memory_limit_mb {
            return Err(ModelError::MemoryLimit {
                required_mb,
                limit_mb: self.per_framework_memory_limit_mb,
            }
            .into());
        }

        let (tx, rx) = bounded(1);
        let started = Instant::now();
        thread::spawn(move || {
            let result = framework
                .fit(&sample.x_train, &sample.y_train)
                .and_then(|_| scorer.score(&sample.y_validation, framework.pipeline(), &sample.x_validation));
            // the receiver is gone after a timeout
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.per_framework_time_limit) {
            Ok(result) => {
                let score = result?;
                if !score.is_finite() {
                    return Err(ModelError::FitFailed {
                        estimator: "pipeline".to_string(),
                        message: format!("non-finite score {score}"),
                    }
                    .into());
                }
                debug!(score, elapsed_ms = started.elapsed().as_millis() as u64, "framework evaluated");
                Ok(Evaluation {
                    reward: scorer.reward(score),
                    score,
                })
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    seconds = self.per_framework_time_limit.as_secs(),
                    "framework fit exceeded time limit"
                );
                Err(ModelError::Timeout {
                    seconds: self.per_framework_time_limit.as_secs(),
                }
                .into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(ModelError::FitFailed {
                estimator: "pipeline".to_string(),
                message: "worker thread panicked".to_string(),
            }
            .into()),
        }
    }
}

/// Rough working set of a pipeline fit in megabytes: every step holds a
/// dense copy of its output for the train and validation rows.
fn estimate_memory_mb(descriptor: &FrameworkDescriptor, x_train: &Matrix, n_validation: usize) -> u64 {
    let rows = (x_train.nrows() + n_validation) as f64;
    let mut width = x_train.ncols() as f64;
    let mut cells = rows * width;
    for step in &descriptor.steps {
        let param = |name: &str| step.params.get(name).and_then(HyperValue::as_i64);
        width = match step.name.as_str() {
            "PolynomialFeatures" => {
                let degree = param("degree").unwrap_or(2).max(1) as i32;
                // C(width + degree, degree)
                (1..=degree).fold(1.0, |acc, k| acc * (width + k as f64) / k as f64)
            }
            "OneHotEncoder" => width * 10.0,
            _ => param("n_components").map_or(width, |n| n as f64),
        };
        cells += rows * width;
    }
    (cells * 8.0 / (1024.0 * 1024.0)).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::FetchFn;
    use crate::loaders::default_environments;
    use crate::preprocess::RawValue;
    use dc_space::{catalog, AlgorithmSpace};
    use dc_types::{DataSourceType, FeatureType};
    use std::sync::Arc;

    fn binary_task(seed: u64) -> TaskEnvironment {
        TaskEnvironment::new(default_environments(TargetType::Binary, seed).unwrap(), Some(seed)).unwrap()
    }

    fn simple_framework() -> MlFramework {
        let mut hp = Setting::new();
        hp.insert("Imputer__strategy".into(), HyperValue::from("mean"));
        MlFramework::build(
            vec![catalog::imputer(), catalog::pca(), catalog::gaussian_naive_bayes()],
            hp,
        )
        .unwrap()
    }

    #[test]
    fn requires_data_environments() {
        assert!(TaskEnvironment::new(vec![], None).is_err());
    }

    #[test]
    fn sampling_is_required_before_evaluation() {
        let mut task = binary_task(0);
        assert!(task.sample().is_err());
        assert!(task.env_dep_hyperparameters().is_err());

        task.sample_data_env();
        assert!(task.evaluate(simple_framework()).is_none());
        let state = task.sample().unwrap();
        assert_eq!(state.metafeatures.len(), task.n_metafeatures());
        assert_eq!(Some(state.data_env_name.as_str()), task.current_data_env_name());
    }

    #[test]
    fn evaluates_a_framework() {
        let mut task = binary_task(1);
        task.sample_data_env();
        task.sample().unwrap();
        let evaluation = task.evaluate(simple_framework()).unwrap();
        assert!((0.0..=1.0).contains(&evaluation.score));
        assert_eq!(evaluation.reward, evaluation.score);
    }

    #[test]
    fn env_dep_hyperparameters_follow_the_data_environment() {
        let mut task = binary_task(2);
        for _ in 0..20 {
            let name = task.sample_data_env().name.clone();
            let setting = task.env_dep_hyperparameters().unwrap();
            let indices = setting[ONE_HOT_CATEGORICAL_FEATURES].as_indices().unwrap().to_vec();
            if name.ends_with("mixed") {
                assert_eq!(indices, vec![6]);
            } else {
                assert!(indices.is_empty());
            }
        }
    }

    #[test]
    fn fits_past_the_time_limit_score_none() {
        let mut task = binary_task(5).with_time_limit(Duration::from_millis(1));
        task.sample_data_env();
        task.sample().unwrap();
        let mut hp = Setting::new();
        hp.insert("LogisticRegression__max_iter".into(), HyperValue::Int(20_000));
        let slow = MlFramework::build(
            vec![catalog::imputer(), catalog::polynomial_features(), catalog::logistic_regression()],
            hp,
        )
        .unwrap();
        assert!(task.evaluate(slow).is_none());
    }

    #[test]
    fn sample_without_out_of_bag_rows_scores_none() {
        let fetch: FetchFn = Arc::new(|| {
            Ok((vec![vec![RawValue::Number(0.0)], vec![RawValue::Number(1.0)]], vec![0.0, 1.0]))
        });
        let env = DataEnvironment::new(
            "two_rows",
            DataSourceType::Synthetic,
            TargetType::Binary,
            vec![FeatureType::Continuous],
            fetch,
        );
        let mut task = TaskEnvironment::new(vec![env], Some(0)).unwrap();
        task.sample_data_env();
        // redraw until the bootstrap covers both rows
        loop {
            task.sample().unwrap();
            let covered = task
                .current_sample
                .as_ref()
                .is_some_and(|s| s.x_validation.nrows() == 0);
            if covered {
                break;
            }
        }
        assert!(task.evaluate(simple_framework()).is_none());
    }

    #[test]
    fn memory_limit_rejects_frameworks() {
        let mut task = binary_task(3).with_memory_limit_mb(0);
        task.sample_data_env();
        task.sample().unwrap();
        assert!(task.evaluate(simple_framework()).is_none());
    }

    #[test]
    fn sampled_frameworks_evaluate_or_fail_cleanly() {
        let space = AlgorithmSpace::new(TargetType::Binary);
        let mut task = binary_task(4).with_time_limit(Duration::from_secs(30));
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for _ in 0..5 {
            task.sample_data_env();
            task.sample().unwrap();
            let env_dep = task.env_dep_hyperparameters().unwrap();
            let framework = space.sample_ml_framework_with(&mut rng, &env_dep).unwrap();
            if let Some(evaluation) = task.evaluate(framework) {
                assert!(evaluation.reward.is_finite());
            }
        }
    }

    #[test]
    fn mixed_target_types_are_rejected() {
        let mut envs = default_environments(TargetType::Binary, 0).unwrap();
        envs.extend(default_environments(TargetType::Regression, 0).unwrap());
        assert!(TaskEnvironment::new(envs, None).is_err());
    }

    #[test]
    fn memory_estimate_grows_with_polynomial_features() {
        let x = Matrix::zeros((1000, 10));
        let mut framework_hp = Setting::new();
        framework_hp.insert("PolynomialFeatures__degree".into(), HyperValue::Int(3));
        let poly = MlFramework::build(
            vec![catalog::imputer(), catalog::polynomial_features(), catalog::gaussian_naive_bayes()],
            framework_hp,
        )
        .unwrap();
        let plain = simple_framework();
        assert!(
            estimate_memory_mb(poly.descriptor(), &x, 0) >= estimate_memory_mb(plain.descriptor(), &x, 0)
        );
    }
}
