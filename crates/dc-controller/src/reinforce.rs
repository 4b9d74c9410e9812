//! REINFORCE training loop for the CASH controller.

use std::collections::HashMap;

use dc_data::{Evaluation, TaskEnvironment};
use dc_space::FrameworkDescriptor;
use dc_types::DcResult;
use tracing::{debug, info};

use crate::controller::{Action, CashController};
use crate::history::{exponential_mean, EpisodeRecord, EpisodeTracker};
use crate::loggers::MetricsLogger;

pub struct CashReinforce {
    pub controller: CashController,
    pub t_env: TaskEnvironment,
    beta: f64,
    with_baseline: bool,
    multi_baseline: bool,
    normalize_reward: bool,
    metrics_logger: Option<Box<dyn MetricsLogger>>,
    baselines: HashMap<String, f64>,
    history: Vec<EpisodeRecord>,
    best_frameworks: Vec<Option<FrameworkDescriptor>>,
}

impl std::fmt::Debug for CashReinforce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CashReinforce")
            .field("t_env", &self.t_env)
            .field("beta", &self.beta)
            .field("with_baseline", &self.with_baseline)
            .field("multi_baseline", &self.multi_baseline)
            .field("normalize_reward", &self.normalize_reward)
            .field("episodes", &self.history.len())
            .finish()
    }
}

impl CashReinforce {
    pub fn new(controller: CashController, t_env: TaskEnvironment) -> Self {
        Self {
            controller,
            t_env,
            beta: 0.99,
            with_baseline: true,
            multi_baseline: false,
            normalize_reward: false,
            metrics_logger: None,
            baselines: HashMap::new(),
            history: Vec::new(),
            best_frameworks: Vec::new(),
        }
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_baseline(mut self, with_baseline: bool, multi_baseline: bool) -> Self {
        self.with_baseline = with_baseline;
        self.multi_baseline = multi_baseline;
        self
    }

    pub fn with_normalize_reward(mut self, normalize_reward: bool) -> Self {
        self.normalize_reward = normalize_reward;
        self
    }

    pub fn with_metrics_logger(mut self, logger: Box<dyn MetricsLogger>) -> Self {
        self.metrics_logger = Some(logger);
        self
    }

    /// Key of the baseline used for the current data environment.
    fn baseline_key(&self) -> String {
        if self.multi_baseline {
            self.t_env.current_data_env_name().unwrap_or_default().to_string()
        } else {
            String::new()
        }
    }

    /// Current baseline reward (0 before any update).
    pub fn baseline_reward(&self) -> f64 {
        self.baselines.get(&self.baseline_key()).copied().unwrap_or(0.0)
    }

    /// Trains for `n_episodes` episodes of `n_iter` iterations each.
    /// `procnum` tags the records when several trials run side by side.
    pub fn fit(&mut self, n_episodes: usize, n_iter: usize, verbose: bool, procnum: Option<usize>) -> DcResult<&mut Self> {
        self.history.clear();
        self.best_frameworks.clear();
        self.baselines.clear();
        let trial = procnum.unwrap_or(0);

        for i_episode in 0..n_episodes {
            let data_env_name = self.t_env.sample_data_env().name.clone();
            info!(trial, episode = i_episode, task = %data_env_name, "starting episode");

            let mut tracker = EpisodeTracker::new();
            for i_iter in 0..n_iter {
                self.fit_iter(&mut tracker)?;
                if verbose {
                    debug!(
                        trial,
                        iter = i_iter,
                        n_valid_mlf = tracker.n_successful(),
                        n_iter = i_iter + 1,
                        exponential_mean_reward = self.baseline_reward(),
                        "iteration finished"
                    );
                }
            }

            let loss = self
                .controller
                .backward(self.with_baseline, self.normalize_reward)?;
            let (record, best) = tracker.finish(trial, i_episode + 1, &data_env_name, loss);
            if let Some(logger) = &self.metrics_logger {
                logger.log_episode(&record);
            }
            self.history.push(record);
            self.best_frameworks.push(best);
        }
        Ok(self)
    }

    fn fit_iter(&mut self, tracker: &mut EpisodeTracker) -> DcResult<()> {
        let state = self.t_env.sample()?;
        let actions = self.controller.decode(&state.metafeatures)?;
        let reward = self.evaluate_actions(&actions, tracker)?;

        self.controller
            .log_prob_buffer
            .push(actions.into_iter().map(|a| a.log_prob_grad).collect());
        self.controller.reward_buffer.push(reward);

        // the buffered baseline is the one before this reward
        let key = self.baseline_key();
        let baseline = self.baselines.get(&key).copied().unwrap_or(0.0);
        self.controller.baseline_reward_buffer.push(baseline);
        self.baselines
            .insert(key, exponential_mean(reward, baseline, self.beta));
        Ok(())
    }

    /// Builds the proposed framework and evaluates it. Frameworks that fail
    /// to build or evaluate earn the error reward.
    fn evaluate_actions(&mut self, actions: &[Action], tracker: &mut EpisodeTracker) -> DcResult<f64> {
        let (algorithms, hyperparameters) = CashController::framework_components(actions);
        let env_dep = self.t_env.env_dep_hyperparameters()?;
        let framework = match self
            .controller
            .a_space
            .create_ml_framework(algorithms, &hyperparameters, &env_dep)
        {
            Ok(framework) => framework,
            Err(err) => {
                debug!(error = %err, "proposed framework could not be built");
                tracker.record_failure(self.t_env.error_reward());
                return Ok(self.t_env.error_reward());
            }
        };
        let descriptor = framework.descriptor().clone();
        match self.t_env.evaluate(framework) {
            Some(Evaluation { reward, score }) => {
                tracker.record_success(reward, score, &descriptor, &hyperparameters);
                Ok(reward)
            }
            None => {
                tracker.record_failure(self.t_env.error_reward());
                Ok(self.t_env.error_reward())
            }
        }
    }

    pub fn history(&self) -> &[EpisodeRecord] {
        &self.history
    }

    /// Best framework of each episode, `None` when nothing succeeded.
    pub fn best_frameworks(&self) -> &[Option<FrameworkDescriptor>] {
        &self.best_frameworks
    }
}
