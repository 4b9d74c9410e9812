//! Experiment configuration shared by the trainer, the CLI and the job
//! launcher.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::{DcError, DcResult};
use crate::{config_error, validation_error};

pub const ENV_OUT_PATH: &str = "DEEP_CASH_OUT_PATH";
pub const ENV_BETA: &str = "DEEP_CASH_BETA";
pub const ENV_N_EPISODES: &str = "DEEP_CASH_N_EPISODES";
pub const ENV_N_ITER: &str = "DEEP_CASH_N_ITER";
pub const ENV_LEARNING_RATE: &str = "DEEP_CASH_LEARNING_RATE";
pub const ENV_ERROR_REWARD: &str = "DEEP_CASH_ERROR_REWARD";
pub const ENV_LOGGER: &str = "DEEP_CASH_LOGGER";
pub const ENV_FIT_VERBOSE: &str = "DEEP_CASH_FIT_VERBOSE";

/// How per-episode metrics are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggerKind {
    #[default]
    Default,
    /// One JSON metric object per line on stdout, the format floyd picks up.
    Floyd,
}

impl fmt::Display for LoggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Floyd => write!(f, "floyd"),
        }
    }
}

impl FromStr for LoggerKind {
    type Err = DcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "floyd" => Ok(Self::Floyd),
            other => Err(config_error!("unknown logger: {other}")),
        }
    }
}

/// Hyperparameters of a controller training experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub output_fp: String,
    pub n_trials: usize,
    /// Size of the previous-action embedding fed to the policy network.
    pub input_size: usize,
    pub hidden_size: usize,
    /// Must equal the action vocabulary size when set.
    pub output_size: Option<usize>,
    pub n_layers: usize,
    pub dropout_rate: f64,
    /// Decay of the exponential mean baseline reward.
    pub beta: f64,
    pub with_baseline: bool,
    /// Track one baseline per data environment.
    pub multi_baseline: bool,
    pub normalize_reward: bool,
    pub n_episodes: usize,
    pub n_iter: usize,
    pub learning_rate: f64,
    /// Reward assigned to frameworks that fail to fit or score.
    pub error_reward: f64,
    /// Seconds.
    pub per_framework_time_limit: u64,
    /// Megabytes.
    pub per_framework_memory_limit: u64,
    pub logger: LoggerKind,
    pub fit_verbose: bool,
    pub random_state: Option<u64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            output_fp: "./output".to_string(),
            n_trials: 1,
            input_size: 30,
            hidden_size: 30,
            output_size: None,
            n_layers: 3,
            dropout_rate: 0.2,
            beta: 0.9,
            with_baseline: true,
            multi_baseline: false,
            normalize_reward: false,
            n_episodes: 100,
            n_iter: 16,
            learning_rate: 0.005,
            error_reward: 0.1,
            per_framework_time_limit: 180,
            per_framework_memory_limit: 5000,
            logger: LoggerKind::Default,
            fit_verbose: false,
            random_state: None,
        }
    }
}

impl ExperimentConfig {
    pub fn with_output_fp(mut self, output_fp: impl Into<String>) -> Self {
        self.output_fp = output_fp.into();
        self
    }

    pub fn with_episodes(mut self, n_episodes: usize, n_iter: usize) -> Self {
        self.n_episodes = n_episodes;
        self.n_iter = n_iter;
        self
    }

    pub fn with_network(mut self, input_size: usize, hidden_size: usize, n_layers: usize) -> Self {
        self.input_size = input_size;
        self.hidden_size = hidden_size;
        self.n_layers = n_layers;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> DcResult<()> {
        let positive = [
            ("n_trials", self.n_trials),
            ("n_episodes", self.n_episodes),
            ("n_iter", self.n_iter),
            ("input_size", self.input_size),
            ("hidden_size", self.hidden_size),
            ("n_layers", self.n_layers),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(validation_error!("{name} must be at least 1"));
            }
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(validation_error!(
                "dropout_rate must be in [0, 1), found {}",
                self.dropout_rate
            ));
        }
        if !(0.0..1.0).contains(&self.beta) {
            return Err(validation_error!(
                "beta must be in [0, 1), found {}",
                self.beta
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(validation_error!(
                "learning_rate must be positive, found {}",
                self.learning_rate
            ));
        }
        if !self.error_reward.is_finite() {
            return Err(validation_error!("error_reward must be finite"));
        }
        if self.per_framework_time_limit == 0 {
            return Err(validation_error!("per_framework_time_limit must be positive"));
        }
        Ok(())
    }

    /// Command-line flags of the training script, in launch order.
    pub fn to_flags(&self) -> Vec<(&'static str, String)> {
        let mut flags = vec![
            ("--output_fp", self.output_fp.clone()),
            ("--n_trials", self.n_trials.to_string()),
            ("--input_size", self.input_size.to_string()),
            ("--hidden_size", self.hidden_size.to_string()),
        ];
        if let Some(output_size) = self.output_size {
            flags.push(("--output_size", output_size.to_string()));
        }
        flags.extend([
            ("--n_layers", self.n_layers.to_string()),
            ("--dropout_rate", self.dropout_rate.to_string()),
            ("--beta", self.beta.to_string()),
            ("--with_baseline", py_bool(self.with_baseline)),
            ("--multi_baseline", py_bool(self.multi_baseline)),
            ("--normalize_reward", py_bool(self.normalize_reward)),
            ("--n_episodes", self.n_episodes.to_string()),
            ("--n_iter", self.n_iter.to_string()),
            ("--learning_rate", self.learning_rate.to_string()),
            ("--error_reward", self.error_reward.to_string()),
            (
                "--per_framework_time_limit",
                self.per_framework_time_limit.to_string(),
            ),
            (
                "--per_framework_memory_limit",
                self.per_framework_memory_limit.to_string(),
            ),
            ("--logger", self.logger.to_string()),
            ("--fit_verbose", py_bool(self.fit_verbose)),
        ]);
        flags
    }

    /// Environment variables consumed by the annealing job.
    pub fn to_env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_OUT_PATH, self.output_fp.clone()),
            (ENV_BETA, self.beta.to_string()),
            (ENV_N_EPISODES, self.n_episodes.to_string()),
            (ENV_N_ITER, self.n_iter.to_string()),
            (ENV_LEARNING_RATE, self.learning_rate.to_string()),
            (ENV_ERROR_REWARD, self.error_reward.to_string()),
            (ENV_LOGGER, self.logger.to_string()),
            (ENV_FIT_VERBOSE, py_bool(self.fit_verbose)),
        ]
    }

    /// Build a config from `DEEP_CASH_*` variables; unset ones keep defaults.
    pub fn from_env_map(vars: &HashMap<String, String>) -> DcResult<Self> {
        let mut config = Self::default();
        if let Some(v) = vars.get(ENV_OUT_PATH) {
            config.output_fp = v.clone();
        }
        if let Some(v) = vars.get(ENV_BETA) {
            config.beta = parse_var(ENV_BETA, v)?;
        }
        if let Some(v) = vars.get(ENV_N_EPISODES) {
            config.n_episodes = parse_var(ENV_N_EPISODES, v)?;
        }
        if let Some(v) = vars.get(ENV_N_ITER) {
            config.n_iter = parse_var(ENV_N_ITER, v)?;
        }
        if let Some(v) = vars.get(ENV_LEARNING_RATE) {
            config.learning_rate = parse_var(ENV_LEARNING_RATE, v)?;
        }
        if let Some(v) = vars.get(ENV_ERROR_REWARD) {
            config.error_reward = parse_var(ENV_ERROR_REWARD, v)?;
        }
        if let Some(v) = vars.get(ENV_LOGGER) {
            config.logger = v.parse()?;
        }
        if let Some(v) = vars.get(ENV_FIT_VERBOSE) {
            config.fit_verbose = parse_bool(v).ok_or_else(|| {
                config_error!("{ENV_FIT_VERBOSE}: expected a boolean, found {v}")
            })?;
        }
        Ok(config)
    }

    /// Read the `DEEP_CASH_*` variables of the current process.
    pub fn from_env() -> DcResult<Self> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("DEEP_CASH_"))
            .collect();
        Self::from_env_map(&vars)
    }
}

fn py_bool(v: bool) -> String {
    let s = if v { "True" } else { "False" };
    s.to_string()
}

/// Accepts the spellings the launch scripts use ("True", "false", "1", ...).
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> DcResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| config_error!("{name}: could not parse {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ExperimentConfig::default().validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = ExperimentConfig::default();
        config.dropout_rate = 1.0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.n_iter = 0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.learning_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn flags_follow_launch_order() {
        let config = ExperimentConfig::default();
        let names: Vec<&str> = config.to_flags().iter().map(|(k, _)| *k).collect();
        assert_eq!(names.first(), Some(&"--output_fp"));
        assert_eq!(names.last(), Some(&"--fit_verbose"));
        assert!(!names.contains(&"--output_size"));

        let mut config = ExperimentConfig::default();
        config.output_size = Some(42);
        let flags = config.to_flags();
        let pos = flags.iter().position(|(k, _)| *k == "--output_size").unwrap();
        assert_eq!(flags[pos - 1].0, "--hidden_size");
        assert_eq!(flags[pos].1, "42");
    }

    #[test]
    fn flag_values_are_literal() {
        let config = ExperimentConfig::default();
        let flags: HashMap<&str, String> = config.to_flags().into_iter().collect();
        assert_eq!(flags["--learning_rate"], "0.005");
        assert_eq!(flags["--with_baseline"], "True");
        assert_eq!(flags["--multi_baseline"], "False");
        assert_eq!(flags["--per_framework_time_limit"], "180");
        assert_eq!(flags["--logger"], "default");
    }

    #[test]
    fn env_round_trip() {
        let mut config = ExperimentConfig::default()
            .with_output_fp("/output")
            .with_episodes(500, 50);
        config.beta = 0.95;
        config.logger = LoggerKind::Floyd;
        config.fit_verbose = true;

        let vars: HashMap<String, String> = config
            .to_env_vars()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let back = ExperimentConfig::from_env_map(&vars).unwrap();
        assert_eq!(back.output_fp, "/output");
        assert_eq!(back.n_episodes, 500);
        assert_eq!(back.n_iter, 50);
        assert_eq!(back.beta, 0.95);
        assert_eq!(back.logger, LoggerKind::Floyd);
        assert!(back.fit_verbose);
    }

    #[test]
    fn env_parse_error_names_variable() {
        let mut vars = HashMap::new();
        vars.insert(ENV_N_ITER.to_string(), "many".to_string());
        let err = ExperimentConfig::from_env_map(&vars).unwrap_err();
        assert!(err.to_string().contains(ENV_N_ITER));
    }

    #[test]
    fn missing_env_uses_defaults() {
        let config = ExperimentConfig::from_env_map(&HashMap::new()).unwrap();
        assert_eq!(config, ExperimentConfig::default());
    }
}
