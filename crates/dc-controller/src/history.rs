//! Per-episode statistics shared by the REINFORCE trainer and the random
//! search baseline.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use dc_space::{FrameworkDescriptor, Setting};
use dc_types::{DcResult, IntoDcError};
use serde::{Deserialize, Serialize};

/// One row of a training history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub trial: usize,
    /// 1-based.
    pub episode: usize,
    pub data_env_name: String,
    pub loss: f64,
    pub mean_reward: f64,
    /// NaN when no framework succeeded.
    pub mean_validation_score: f64,
    pub std_validation_score: f64,
    pub n_successful_mlfs: usize,
    pub n_unique_mlfs: usize,
    pub n_unique_hyperparameters: usize,
    pub mlf_diversity: f64,
    /// Reward of the episode's best framework.
    pub best_reward: Option<f64>,
    pub best_validation_score: Option<f64>,
    pub best_mlf: Option<String>,
}

/// Unique successful frameworks over successful frameworks; 0 when none
/// succeeded.
pub fn mlf_diversity(n_unique_mlfs: usize, n_successful_mlfs: usize) -> f64 {
    if n_successful_mlfs == 0 {
        0.0
    } else {
        n_unique_mlfs as f64 / n_successful_mlfs as f64
    }
}

/// `b ← β·b + (1−β)·r`
pub fn exponential_mean(reward: f64, previous: f64, beta: f64) -> f64 {
    beta * previous + (1.0 - beta) * reward
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Accumulates the iterations of one episode.
#[derive(Debug, Default)]
pub struct EpisodeTracker {
    rewards: Vec<f64>,
    validation_scores: Vec<f64>,
    algorithm_sets: HashSet<Vec<String>>,
    hyperparameter_sets: HashSet<String>,
    best: Option<(f64, f64, FrameworkDescriptor)>,
}

impl EpisodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_iterations(&self) -> usize {
        self.rewards.len()
    }

    pub fn n_successful(&self) -> usize {
        self.validation_scores.len()
    }

    /// Records a failed framework.
    pub fn record_failure(&mut self, error_reward: f64) {
        self.rewards.push(error_reward);
    }

    /// Records a framework that fit and scored. The best framework is the
    /// one with the highest reward.
    pub fn record_success(
        &mut self,
        reward: f64,
        score: f64,
        descriptor: &FrameworkDescriptor,
        hyperparameters: &Setting,
    ) {
        self.rewards.push(reward);
        self.validation_scores.push(score);
        self.algorithm_sets.insert(descriptor.algorithm_names());
        self.hyperparameter_sets.insert(format!("{hyperparameters:?}"));
        if self.best.as_ref().map_or(true, |(best, _, _)| reward > *best) {
            self.best = Some((reward, score, descriptor.clone()));
        }
    }

    /// Closes the episode; also returns the best framework's descriptor.
    pub fn finish(
        self,
        trial: usize,
        episode: usize,
        data_env_name: &str,
        loss: f64,
    ) -> (EpisodeRecord, Option<FrameworkDescriptor>) {
        let mean_reward = if self.rewards.is_empty() {
            f64::NAN
        } else {
            self.rewards.iter().sum::<f64>() / self.rewards.len() as f64
        };
        let (mean_validation_score, std_validation_score) = mean_std(&self.validation_scores);
        let n_successful_mlfs = self.validation_scores.len();
        let n_unique_mlfs = self.algorithm_sets.len();
        let (best_reward, best_validation_score, best) = match self.best {
            Some((reward, score, descriptor)) => (Some(reward), Some(score), Some(descriptor)),
            None => (None, None, None),
        };
        let record = EpisodeRecord {
            trial,
            episode,
            data_env_name: data_env_name.to_string(),
            loss,
            mean_reward,
            mean_validation_score,
            std_validation_score,
            n_successful_mlfs,
            n_unique_mlfs,
            n_unique_hyperparameters: self.hyperparameter_sets.len(),
            mlf_diversity: mlf_diversity(n_unique_mlfs, n_successful_mlfs),
            best_reward,
            best_validation_score,
            best_mlf: best.as_ref().map(|d| d.to_string()),
        };
        (record, best)
    }
}

pub fn write_csv(records: &[EpisodeRecord], path: impl AsRef<Path>) -> DcResult<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())
        .map_err(|e| format!("opening {}: {e}", path.as_ref().display()).into_dc_error())?;
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| format!("writing history row: {e}").into_dc_error())?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv(path: impl AsRef<Path>) -> DcResult<Vec<EpisodeRecord>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| format!("opening {}: {e}", path.as_ref().display()).into_dc_error())?;
    reader
        .deserialize()
        .map(|row| row.map_err(|e| format!("reading history row: {e}").into_dc_error()))
        .collect()
}

pub fn write_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> DcResult<()> {
    let file = File::create(path.as_ref())?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}
