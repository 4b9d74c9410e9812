//! Runs independent training trials in parallel and writes their history.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dc_data::TaskEnvironment;
use dc_space::{AlgorithmSpace, FrameworkDescriptor};
use dc_types::{DcResult, ExperimentConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::controller::{CashController, ControllerConfig};
use crate::history::{self, EpisodeRecord};
use crate::loggers::metrics_logger;
use crate::random_search::RandomSearch;
use crate::reinforce::CashReinforce;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Reinforce,
    RandomSearch,
}

impl SearchMethod {
    pub fn history_file_name(&self) -> &'static str {
        match self {
            Self::Reinforce => "rnn_cash_controller_experiment.csv",
            Self::RandomSearch => "random_search_experiment.csv",
        }
    }

    pub fn summary_file_name(&self) -> &'static str {
        match self {
            Self::Reinforce => "rnn_cash_controller_experiment_summary.json",
            Self::RandomSearch => "random_search_experiment_summary.json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub trial: usize,
    pub seed: u64,
    pub best_validation_score: Option<f64>,
    pub best_episode: Option<usize>,
    pub best_mlf: Option<FrameworkDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub run_id: Uuid,
    pub method: SearchMethod,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: ExperimentConfig,
    pub history_path: PathBuf,
    pub trials: Vec<TrialSummary>,
}

struct TrialOutput {
    history: Vec<EpisodeRecord>,
    summary: TrialSummary,
}

fn summarize(trial: usize, seed: u64, history: &[EpisodeRecord], best: &[Option<FrameworkDescriptor>]) -> TrialSummary {
    let mut summary = TrialSummary {
        trial,
        seed,
        best_validation_score: None,
        best_episode: None,
        best_mlf: None,
    };
    let mut best_reward = f64::NEG_INFINITY;
    for (record, descriptor) in history.iter().zip(best) {
        let (Some(reward), Some(descriptor)) = (record.best_reward, descriptor) else {
            continue;
        };
        if reward > best_reward {
            best_reward = reward;
            summary.best_validation_score = record.best_validation_score;
            summary.best_episode = Some(record.episode);
            summary.best_mlf = Some(descriptor.clone());
        }
    }
    summary
}

fn run_trial<F>(config: &ExperimentConfig, method: SearchMethod, trial: usize, seed: u64, t_env_factory: &F) -> DcResult<TrialOutput>
where
    F: Fn(&ExperimentConfig) -> DcResult<TaskEnvironment> + Sync,
{
    let trial_config = config.clone().with_random_state(seed);
    let t_env = t_env_factory(&trial_config)?;
    let a_space = AlgorithmSpace::new(t_env.target_type());
    info!(trial, seed, method = ?method, data_envs = ?t_env.data_env_names(), "starting trial");

    let (history, best) = match method {
        SearchMethod::Reinforce => {
            let controller_config = ControllerConfig::from_experiment(&trial_config, t_env.n_metafeatures());
            let controller = CashController::new(a_space, &controller_config)?;
            let mut reinforce = CashReinforce::new(controller, t_env)
                .with_beta(config.beta)
                .with_baseline(config.with_baseline, config.multi_baseline)
                .with_normalize_reward(config.normalize_reward)
                .with_metrics_logger(metrics_logger(config.logger));
            reinforce.fit(config.n_episodes, config.n_iter, config.fit_verbose, Some(trial))?;
            (reinforce.history().to_vec(), reinforce.best_frameworks().to_vec())
        }
        SearchMethod::RandomSearch => {
            let mut search = RandomSearch::new(a_space, t_env, Some(seed))
                .with_metrics_logger(metrics_logger(config.logger));
            search.fit(config.n_episodes, config.n_iter, Some(trial))?;
            (search.history().to_vec(), search.best_frameworks().to_vec())
        }
    };
    let summary = summarize(trial, seed, &history, &best);
    Ok(TrialOutput { history, summary })
}

/// Runs `config.n_trials` trials in parallel, trial `i` seeded with
/// `random_state + i`, and writes the concatenated history as CSV and a
/// JSON summary under `config.output_fp`.
pub fn run_experiment<F>(config: &ExperimentConfig, method: SearchMethod, t_env_factory: F) -> DcResult<ExperimentSummary>
where
    F: Fn(&ExperimentConfig) -> DcResult<TaskEnvironment> + Sync,
{
    config.validate()?;
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let base_seed = config.random_state.unwrap_or_else(rand::random);
    info!(%run_id, n_trials = config.n_trials, base_seed, output_fp = %config.output_fp, "starting experiment");

    let outputs: Vec<TrialOutput> = (0..config.n_trials)
        .into_par_iter()
        .map(|trial| run_trial(config, method, trial, base_seed.wrapping_add(trial as u64), &t_env_factory))
        .collect::<DcResult<_>>()?;

    let output_dir = PathBuf::from(&config.output_fp);
    fs::create_dir_all(&output_dir)?;
    let history_path = output_dir.join(method.history_file_name());
    let records: Vec<EpisodeRecord> = outputs.iter().flat_map(|o| o.history.iter().cloned()).collect();
    history::write_csv(&records, &history_path)?;

    let summary = ExperimentSummary {
        run_id,
        method,
        started_at,
        finished_at: Utc::now(),
        config: config.clone(),
        history_path,
        trials: outputs.into_iter().map(|o| o.summary).collect(),
    };
    history::write_json(&summary, output_dir.join(method.summary_file_name()))?;
    info!(
        %run_id,
        episodes = records.len(),
        elapsed_s = (summary.finished_at - started_at).num_seconds(),
        "experiment finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_data::default_environments;
    use dc_types::TargetType;
    use std::time::Duration;

    fn factory(config: &ExperimentConfig) -> DcResult<TaskEnvironment> {
        Ok(TaskEnvironment::from_config(
            config,
            default_environments(TargetType::Binary, config.random_state.unwrap_or(0))?,
        )?
        .with_time_limit(Duration::from_secs(30))
        .with_n_samples(60))
    }

    fn small_config(dir: &std::path::Path) -> ExperimentConfig {
        let mut config = ExperimentConfig::default()
            .with_output_fp(dir.display().to_string())
            .with_episodes(2, 2)
            .with_network(4, 8, 1)
            .with_random_state(11);
        config.n_trials = 2;
        config
    }

    #[test]
    fn writes_history_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let summary = run_experiment(&config, SearchMethod::Reinforce, factory).unwrap();
        assert_eq!(summary.trials.len(), 2);
        assert_eq!(summary.trials[1].seed, 12);

        let records = history::read_csv(dir.path().join("rnn_cash_controller_experiment.csv")).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records.iter().filter(|r| r.trial == 1).count(), 2);

        let json = fs::read_to_string(dir.path().join(SearchMethod::Reinforce.summary_file_name())).unwrap();
        let back: ExperimentSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, summary.run_id);
    }

    #[test]
    fn random_search_uses_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.n_trials = 1;
        run_experiment(&config, SearchMethod::RandomSearch, factory).unwrap();
        assert!(dir.path().join("random_search_experiment.csv").exists());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.n_trials = 0;
        assert!(run_experiment(&config, SearchMethod::Reinforce, factory).is_err());
    }
}
