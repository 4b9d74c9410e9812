//! floyd job descriptors.

use serde::{Deserialize, Serialize};

use crate::command::ShellCommand;

pub const FLOYD_PROGRAM: &str = "floyd";

/// A `floyd run` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloydJob {
    /// floyd environment name (e.g. "pytorch-0.3").
    pub env: Option<String>,
    /// Run on the two-core CPU instance.
    pub cpu2: bool,
    pub message: Option<String>,
    pub command: ShellCommand,
}

impl FloydJob {
    pub fn new(command: ShellCommand) -> Self {
        Self {
            env: None,
            cpu2: false,
            message: None,
            command,
        }
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn with_cpu2(mut self, cpu2: bool) -> Self {
        self.cpu2 = cpu2;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Arguments passed to the floyd CLI; the shell command is one argument.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        if let Some(env) = &self.env {
            args.push("--env".to_string());
            args.push(env.clone());
        }
        if self.cpu2 {
            args.push("--cpu2".to_string());
        }
        if let Some(message) = &self.message {
            args.push("--message".to_string());
            args.push(message.clone());
        }
        args.push(self.command.render());
        args
    }

    /// The invocation as it would be typed in a shell.
    pub fn render(&self) -> String {
        let mut out = format!("{FLOYD_PROGRAM} run");
        if let Some(env) = &self.env {
            out.push_str(&format!(" --env {env}"));
        }
        if self.cpu2 {
            out.push_str(" --cpu2");
        }
        if let Some(message) = &self.message {
            out.push_str(&format!(" --message {}", quote(message)));
        }
        out.push_str(&format!(" {}", quote(&self.command.render())));
        out
    }
}

/// Double-quotes `s` so the shell expands nothing inside it.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_types::{ExperimentConfig, LoggerKind};

    #[test]
    fn renders_a_training_job() {
        let mut config = ExperimentConfig::default()
            .with_output_fp("/output")
            .with_episodes(1000, 16);
        config.n_trials = 10;
        config.output_size = Some(30);
        config.multi_baseline = true;
        config.error_reward = 0.0;
        config.logger = LoggerKind::Floyd;

        let job = FloydJob::new(ShellCommand::train(".env", &config))
            .with_env("pytorch-0.3")
            .with_cpu2(true)
            .with_message("multi baseline");
        assert_eq!(
            job.render(),
            "floyd run --env pytorch-0.3 --cpu2 --message \"multi baseline\" \
             \"source .env && python experiments/run_deep_cash.py \
             --output_fp /output --n_trials 10 --input_size 30 --hidden_size 30 \
             --output_size 30 --n_layers 3 --dropout_rate 0.2 --beta 0.9 \
             --with_baseline True --multi_baseline True --normalize_reward False \
             --n_episodes 1000 --n_iter 16 --learning_rate 0.005 --error_reward 0 \
             --per_framework_time_limit 180 --per_framework_memory_limit 5000 \
             --logger floyd --fit_verbose False\""
        );
    }

    #[test]
    fn optional_flags_are_omitted() {
        let job = FloydJob::new(ShellCommand::new(".env", "anneal_dataset"));
        assert_eq!(
            job.render(),
            "floyd run \"source .env && python experiments/anneal_dataset.py\""
        );
        assert_eq!(
            job.to_args(),
            vec!["run", "source .env && python experiments/anneal_dataset.py"]
        );
    }

    #[test]
    fn quoting_blocks_expansion() {
        assert_eq!(quote("cost $5 `date`"), "\"cost \\$5 \\`date\\`\"");
        assert_eq!(quote("a\\b"), "\"a\\\\b\"");
        let job = FloydJob::new(ShellCommand::new(".env", "run_deep_cash").with_flag("--output_fp", "$OUT"))
            .with_message("run $(whoami)");
        assert_eq!(
            job.render(),
            "floyd run --message \"run \\$(whoami)\" \
             \"source .env && python experiments/run_deep_cash.py --output_fp '\\$OUT'\""
        );
    }

    #[test]
    fn args_keep_flag_order() {
        let job = FloydJob::new(ShellCommand::new("env.sh", "run_deep_cash"))
            .with_message("say \"hi\"")
            .with_cpu2(true)
            .with_env("pytorch-0.3");
        let args = job.to_args();
        assert_eq!(&args[..5], &["run", "--env", "pytorch-0.3", "--cpu2", "--message"]);
        assert_eq!(args[5], "say \"hi\"");
        assert!(job.render().contains("--message \"say \\\"hi\\\"\""));
    }
}
