//! Batches of floyd jobs described in TOML.
//!
//! ```toml
//! [[jobs]]
//! name = "multi-baseline"
//! kind = "train"
//! env = "pytorch-0.3"
//! cpu2 = true
//! message = "multi baseline, 1000 episodes"
//!
//! [jobs.config]
//! output_fp = "/output"
//! n_trials = 10
//! multi_baseline = true
//! logger = "floyd"
//! ```

use std::fs;
use std::path::Path;

use dc_types::{DcError, DcResult, ExperimentConfig, LaunchError};
use serde::{Deserialize, Serialize};

use crate::command::{ShellCommand, DEFAULT_ENV_FILE};
use crate::floyd::FloydJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Training script driven by command-line flags.
    Train,
    /// Annealing script driven by `DEEP_CASH_*` variables.
    Anneal,
}

fn default_env_file() -> String {
    DEFAULT_ENV_FILE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: Option<String>,
    pub kind: JobKind,
    pub env: Option<String>,
    #[serde(default)]
    pub cpu2: bool,
    pub message: Option<String>,
    #[serde(default = "default_env_file")]
    pub env_file: String,
    #[serde(default)]
    pub config: ExperimentConfig,
    /// Overrides the script of `kind`.
    pub script: Option<String>,
}

impl JobSpec {
    pub fn new(kind: JobKind, config: ExperimentConfig) -> Self {
        Self {
            name: None,
            kind,
            env: None,
            cpu2: false,
            message: None,
            env_file: default_env_file(),
            config,
            script: None,
        }
    }

    pub fn to_floyd_job(&self) -> DcResult<FloydJob> {
        self.config.validate().map_err(|e| {
            LaunchError::InvalidJob {
                message: format!("{}: {e}", self.name.as_deref().unwrap_or("unnamed job")),
            }
        })?;
        if self.env_file.trim().is_empty() {
            return Err(LaunchError::InvalidJob {
                message: "env_file must not be empty".to_string(),
            }
            .into());
        }

        let mut command = match self.kind {
            JobKind::Train => ShellCommand::train(self.env_file.clone(), &self.config),
            JobKind::Anneal => ShellCommand::anneal(self.env_file.clone(), &self.config),
        };
        if let Some(script) = &self.script {
            command.script = script.clone();
        }

        let mut job = FloydJob::new(command).with_cpu2(self.cpu2);
        if let Some(env) = &self.env {
            job = job.with_env(env.clone());
        }
        if let Some(message) = &self.message {
            job = job.with_message(message.clone());
        }
        Ok(job)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

impl JobFile {
    pub fn from_toml_str(content: &str) -> DcResult<Self> {
        toml::from_str(content).map_err(|e| DcError::Config(format!("invalid job file: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> DcResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| DcError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn floyd_jobs(&self) -> DcResult<Vec<FloydJob>> {
        self.jobs.iter().map(JobSpec::to_floyd_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_types::LoggerKind;
    use std::io::Write;

    const JOBS: &str = r#"
[[jobs]]
name = "baseline"
kind = "train"
env = "pytorch-0.3"
cpu2 = true
message = "single baseline"

[jobs.config]
output_fp = "/output"
n_trials = 10
n_episodes = 1000
logger = "floyd"

[[jobs]]
kind = "anneal"
env_file = "floyd.env"

[jobs.config]
output_fp = "/output"
beta = 0.5
"#;

    #[test]
    fn parses_jobs_with_defaults() {
        let file = JobFile::from_toml_str(JOBS).unwrap();
        assert_eq!(file.jobs.len(), 2);

        let train = &file.jobs[0];
        assert_eq!(train.kind, JobKind::Train);
        assert_eq!(train.env_file, ".env");
        assert_eq!(train.config.n_trials, 10);
        assert_eq!(train.config.n_iter, 16);
        assert_eq!(train.config.logger, LoggerKind::Floyd);

        let anneal = &file.jobs[1];
        assert!(!anneal.cpu2);
        assert_eq!(anneal.env_file, "floyd.env");
        assert_eq!(anneal.config.beta, 0.5);
    }

    #[test]
    fn builds_floyd_jobs() {
        let jobs = JobFile::from_toml_str(JOBS).unwrap().floyd_jobs().unwrap();
        assert!(jobs[0]
            .render()
            .starts_with("floyd run --env pytorch-0.3 --cpu2 --message \"single baseline\" \"source .env && python experiments/run_deep_cash.py --output_fp /output --n_trials 10"));
        assert_eq!(
            jobs[1].render(),
            "floyd run \"source floyd.env && DEEP_CASH_OUT_PATH=/output DEEP_CASH_BETA=0.5 \
             DEEP_CASH_N_EPISODES=100 DEEP_CASH_N_ITER=16 DEEP_CASH_LEARNING_RATE=0.005 \
             DEEP_CASH_ERROR_REWARD=0.1 DEEP_CASH_LOGGER=default DEEP_CASH_FIT_VERBOSE=False \
             python experiments/anneal_dataset.py\""
        );
    }

    #[test]
    fn script_override() {
        let mut spec = JobSpec::new(JobKind::Train, ExperimentConfig::default());
        spec.script = Some("run_random_search".to_string());
        let job = spec.to_floyd_job().unwrap();
        assert_eq!(job.command.script, "run_random_search");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ExperimentConfig::default();
        config.beta = 1.5;
        let err = JobSpec::new(JobKind::Train, config).to_floyd_job().unwrap_err();
        assert!(matches!(err, DcError::Launch(LaunchError::InvalidJob { .. })));
    }

    #[test]
    fn unknown_kind_is_a_config_error() {
        let err = JobFile::from_toml_str("[[jobs]]\nkind = \"deploy\"\n").unwrap_err();
        assert!(matches!(err, DcError::Config(_)));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(JOBS.as_bytes()).unwrap();
        let jobs = JobFile::load(file.path()).unwrap();
        assert_eq!(jobs.jobs.len(), 2);
        assert!(JobFile::load("/nonexistent/jobs.toml").is_err());
    }
}
