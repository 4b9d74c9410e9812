//! Random search baseline: frameworks drawn uniformly from the algorithm
//! space, with the same episode structure and history as the trainer.

use dc_data::{Evaluation, TaskEnvironment};
use dc_space::{AlgorithmSpace, FrameworkDescriptor};
use dc_types::DcResult;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::history::{EpisodeRecord, EpisodeTracker};
use crate::loggers::MetricsLogger;

pub struct RandomSearch {
    pub a_space: AlgorithmSpace,
    pub t_env: TaskEnvironment,
    rng: ChaCha8Rng,
    metrics_logger: Option<Box<dyn MetricsLogger>>,
    history: Vec<EpisodeRecord>,
    best_frameworks: Vec<Option<FrameworkDescriptor>>,
}

impl RandomSearch {
    pub fn new(a_space: AlgorithmSpace, t_env: TaskEnvironment, random_state: Option<u64>) -> Self {
        Self {
            a_space,
            t_env,
            rng: match random_state {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            },
            metrics_logger: None,
            history: Vec::new(),
            best_frameworks: Vec::new(),
        }
    }

    pub fn with_metrics_logger(mut self, logger: Box<dyn MetricsLogger>) -> Self {
        self.metrics_logger = Some(logger);
        self
    }

    /// Runs `n_episodes` episodes of `n_iter` sampled frameworks. The loss
    /// column is always 0.
    pub fn fit(&mut self, n_episodes: usize, n_iter: usize, procnum: Option<usize>) -> DcResult<&mut Self> {
        self.history.clear();
        self.best_frameworks.clear();
        let trial = procnum.unwrap_or(0);
        for i_episode in 0..n_episodes {
            let data_env_name = self.t_env.sample_data_env().name.clone();
            info!(trial, episode = i_episode, task = %data_env_name, "starting random search episode");
            let mut tracker = EpisodeTracker::new();
            for _ in 0..n_iter {
                self.t_env.sample()?;
                let env_dep = self.t_env.env_dep_hyperparameters()?;
                let framework = match self.a_space.sample_ml_framework_with(&mut self.rng, &env_dep) {
                    Ok(framework) => framework,
                    Err(err) => {
                        debug!(error = %err, "sampled framework could not be built");
                        tracker.record_failure(self.t_env.error_reward());
                        continue;
                    }
                };
                let descriptor = framework.descriptor().clone();
                let hyperparameters = framework.hyperparameters().clone();
                match self.t_env.evaluate(framework) {
                    Some(Evaluation { reward, score }) => {
                        tracker.record_success(reward, score, &descriptor, &hyperparameters)
                    }
                    None => tracker.record_failure(self.t_env.error_reward()),
                }
            }
            let (record, best) = tracker.finish(trial, i_episode + 1, &data_env_name, 0.0);
            if let Some(logger) = &self.metrics_logger {
                logger.log_episode(&record);
            }
            self.history.push(record);
            self.best_frameworks.push(best);
        }
        Ok(self)
    }

    pub fn history(&self) -> &[EpisodeRecord] {
        &self.history
    }

    pub fn best_frameworks(&self) -> &[Option<FrameworkDescriptor>] {
        &self.best_frameworks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_data::default_environments;
    use dc_types::TargetType;
    use std::time::Duration;

    #[test]
    fn random_search_produces_history() {
        let t_env = TaskEnvironment::new(default_environments(TargetType::Binary, 7).unwrap(), Some(7))
            .unwrap()
            .with_time_limit(Duration::from_secs(30))
            .with_n_samples(80);
        let mut search = RandomSearch::new(AlgorithmSpace::new(TargetType::Binary), t_env, Some(7));
        search.fit(2, 4, None).unwrap();
        assert_eq!(search.history().len(), 2);
        for record in search.history() {
            assert_eq!(record.loss, 0.0);
            assert!(record.n_successful_mlfs <= 4);
            assert_eq!(record.best_mlf.is_some(), record.n_successful_mlfs > 0);
        }
    }
}
