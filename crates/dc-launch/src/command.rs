//! The shell command a floyd job runs.

use std::borrow::Cow;

use dc_types::ExperimentConfig;
use serde::{Deserialize, Serialize};

pub const TRAIN_SCRIPT: &str = "run_deep_cash";
pub const ANNEAL_SCRIPT: &str = "anneal_dataset";
pub const DEFAULT_ENV_FILE: &str = ".env";

/// `source <env_file> && [VAR=value ...] python experiments/<script>.py [--flag value ...]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCommand {
    pub env_file: String,
    pub env_vars: Vec<(String, String)>,
    pub script: String,
    pub flags: Vec<(String, String)>,
}

impl ShellCommand {
    pub fn new(env_file: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            env_file: env_file.into(),
            env_vars: Vec::new(),
            script: script.into(),
            flags: Vec::new(),
        }
    }

    /// The training script with every flag of `config`.
    pub fn train(env_file: impl Into<String>, config: &ExperimentConfig) -> Self {
        Self::new(env_file, TRAIN_SCRIPT).with_flags(config.to_flags())
    }

    /// The annealing script, configured through `DEEP_CASH_*` variables.
    pub fn anneal(env_file: impl Into<String>, config: &ExperimentConfig) -> Self {
        Self::new(env_file, ANNEAL_SCRIPT).with_env_vars(config.to_env_vars())
    }

    pub fn with_env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((name.into(), value.into()));
        self
    }

    pub fn with_env_vars<K: Into<String>, V: Into<String>>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self {
        self.env_vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.push((flag.into(), value.into()));
        self
    }

    pub fn with_flags<K: Into<String>, V: Into<String>>(mut self, flags: impl IntoIterator<Item = (K, V)>) -> Self {
        self.flags
            .extend(flags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Values with whitespace or shell metacharacters are single-quoted.
    pub fn render(&self) -> String {
        let mut out = format!("source {} && ", shell_word(&self.env_file));
        for (name, value) in &self.env_vars {
            out.push_str(&format!("{name}={} ", shell_word(value)));
        }
        out.push_str(&format!("python experiments/{}.py", self.script));
        for (flag, value) in &self.flags {
            out.push_str(&format!(" {flag} {}", shell_word(value)));
        }
        out
    }
}

fn shell_word(value: &str) -> Cow<'_, str> {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:,+@%".contains(c));
    if plain {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("'{}'", value.replace('\'', "'\\''")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_types::LoggerKind;

    #[test]
    fn bare_command() {
        let cmd = ShellCommand::new(".env", "run_deep_cash");
        assert_eq!(cmd.render(), "source .env && python experiments/run_deep_cash.py");
    }

    #[test]
    fn anneal_command_sets_variables_before_python() {
        let mut config = ExperimentConfig::default()
            .with_output_fp("/output")
            .with_episodes(500, 100);
        config.beta = 0.7;
        config.learning_rate = 0.003;
        config.error_reward = 0.0;
        config.logger = LoggerKind::Floyd;
        let cmd = ShellCommand::anneal(".env", &config);
        assert_eq!(
            cmd.render(),
            "source .env && DEEP_CASH_OUT_PATH=/output DEEP_CASH_BETA=0.7 \
             DEEP_CASH_N_EPISODES=500 DEEP_CASH_N_ITER=100 DEEP_CASH_LEARNING_RATE=0.003 \
             DEEP_CASH_ERROR_REWARD=0 DEEP_CASH_LOGGER=floyd DEEP_CASH_FIT_VERBOSE=False \
             python experiments/anneal_dataset.py"
        );
    }

    #[test]
    fn values_with_spaces_or_metacharacters_are_quoted() {
        let cmd = ShellCommand::new(".env", "run_deep_cash")
            .with_env_var("DEEP_CASH_OUT_PATH", "/data/my runs")
            .with_flag("--output_fp", "$HOME/out;rm")
            .with_flag("--message", "it's")
            .with_flag("--tag", "")
            .with_flag("--n_iter", "16");
        assert_eq!(
            cmd.render(),
            "source .env && DEEP_CASH_OUT_PATH='/data/my runs' \
             python experiments/run_deep_cash.py --output_fp '$HOME/out;rm' \
             --message 'it'\\''s' --tag '' --n_iter 16"
        );
    }

    #[test]
    fn train_command_carries_every_flag() {
        let cmd = ShellCommand::train(".env", &ExperimentConfig::default());
        let rendered = cmd.render();
        assert!(rendered.starts_with("source .env && python experiments/run_deep_cash.py --output_fp ./output"));
        assert!(rendered.ends_with("--logger default --fit_verbose False"));
        assert_eq!(cmd.flags.len(), 18);
    }
}
