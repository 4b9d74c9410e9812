//! Command-line surface of the `deep-cash` binary.
//!
//! Training flags keep the underscore spelling the launcher renders, so a
//! rendered job's flags can be passed to `deep-cash run` unchanged.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use dc_types::{parse_bool, ExperimentConfig, LoggerKind, TargetType};

#[derive(Debug, Parser)]
#[command(name = "deep-cash", version, about = "Reinforcement learning for combined algorithm selection and hyperparameter optimization")]
pub struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Train the CASH controller with REINFORCE
    Run {
        #[command(flatten)]
        train: TrainArgs,
        #[command(flatten)]
        data: DataArgs,
    },
    /// Train with the DEEP_CASH_* environment as configuration
    Anneal {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Run the random search baseline
    RandomSearch {
        #[command(flatten)]
        train: TrainArgs,
        #[command(flatten)]
        data: DataArgs,
    },
    /// Print the floyd command of every job in a job file
    Render {
        jobs: PathBuf,
    },
    /// Submit every job in a job file to floyd
    Submit {
        jobs: PathBuf,
        /// Render the jobs without calling floyd
        #[arg(long)]
        dry_run: bool,
    },
}

fn py_bool(s: &str) -> Result<bool, String> {
    parse_bool(s).ok_or_else(|| format!("expected True or False, found {s:?}"))
}

fn logger_kind(s: &str) -> Result<LoggerKind, String> {
    s.parse().map_err(|e: dc_types::DcError| e.to_string())
}

fn target_type(s: &str) -> Result<TargetType, String> {
    s.parse().map_err(|e: dc_types::DcError| e.to_string())
}

/// Flags left unset keep the `ExperimentConfig` default.
#[derive(Debug, Default, Args)]
pub struct TrainArgs {
    #[arg(long = "output_fp")]
    pub output_fp: Option<String>,
    #[arg(long = "n_trials")]
    pub n_trials: Option<usize>,
    #[arg(long = "input_size")]
    pub input_size: Option<usize>,
    #[arg(long = "hidden_size")]
    pub hidden_size: Option<usize>,
    #[arg(long = "output_size")]
    pub output_size: Option<usize>,
    #[arg(long = "n_layers")]
    pub n_layers: Option<usize>,
    #[arg(long = "dropout_rate")]
    pub dropout_rate: Option<f64>,
    #[arg(long)]
    pub beta: Option<f64>,
    #[arg(long = "with_baseline", action = ArgAction::Set, value_parser = py_bool)]
    pub with_baseline: Option<bool>,
    #[arg(long = "multi_baseline", action = ArgAction::Set, value_parser = py_bool)]
    pub multi_baseline: Option<bool>,
    #[arg(long = "normalize_reward", action = ArgAction::Set, value_parser = py_bool)]
    pub normalize_reward: Option<bool>,
    #[arg(long = "n_episodes")]
    pub n_episodes: Option<usize>,
    #[arg(long = "n_iter")]
    pub n_iter: Option<usize>,
    #[arg(long = "learning_rate")]
    pub learning_rate: Option<f64>,
    #[arg(long = "error_reward", allow_negative_numbers = true)]
    pub error_reward: Option<f64>,
    /// Seconds
    #[arg(long = "per_framework_time_limit")]
    pub per_framework_time_limit: Option<u64>,
    /// Megabytes
    #[arg(long = "per_framework_memory_limit")]
    pub per_framework_memory_limit: Option<u64>,
    #[arg(long, value_parser = logger_kind)]
    pub logger: Option<LoggerKind>,
    #[arg(long = "fit_verbose", action = ArgAction::Set, value_parser = py_bool)]
    pub fit_verbose: Option<bool>,
}

impl TrainArgs {
    pub fn apply(&self, mut config: ExperimentConfig) -> ExperimentConfig {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field.clone() {
                    config.$field = v;
                })*
            };
        }
        set!(
            output_fp,
            n_trials,
            input_size,
            hidden_size,
            n_layers,
            dropout_rate,
            beta,
            with_baseline,
            multi_baseline,
            normalize_reward,
            n_episodes,
            n_iter,
            learning_rate,
            error_reward,
            per_framework_time_limit,
            per_framework_memory_limit,
            logger,
            fit_verbose,
        );
        if self.output_size.is_some() {
            config.output_size = self.output_size;
        }
        config
    }
}

#[derive(Debug, Args)]
pub struct DataArgs {
    #[arg(long, default_value = "binary", value_parser = target_type)]
    pub target_type: TargetType,
    /// Train on a CSV file instead of the synthetic environments
    #[arg(long)]
    pub csv: Option<PathBuf>,
    #[arg(long, default_value = "target")]
    pub target_column: String,
    /// Held-out fraction of each data environment
    #[arg(long, default_value_t = 0.2)]
    pub test_size: f64,
    #[arg(long)]
    pub random_state: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn rendered_training_flags_parse() {
        let config = ExperimentConfig::default().with_output_fp("/output");
        let mut argv = vec!["deep-cash".to_string(), "run".to_string()];
        for (flag, value) in config.to_flags() {
            argv.push(flag.to_string());
            argv.push(value);
        }
        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Run { train, data } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(train.apply(ExperimentConfig::default()), config);
        assert_eq!(data.target_type, TargetType::Binary);
    }

    #[test]
    fn unset_flags_keep_defaults() {
        let cli = Cli::try_parse_from([
            "deep-cash",
            "-v",
            "random-search",
            "--n_episodes",
            "5",
            "--multi_baseline",
            "True",
            "--error_reward",
            "-1",
            "--target-type",
            "regression",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::RandomSearch { train, data } = cli.command else {
            panic!("expected random-search");
        };
        let config = train.apply(ExperimentConfig::default());
        assert_eq!(config.n_episodes, 5);
        assert_eq!(config.n_iter, 16);
        assert!(config.multi_baseline);
        assert_eq!(config.error_reward, -1.0);
        assert_eq!(data.target_type, TargetType::Regression);
    }

    #[test]
    fn bad_boolean_is_rejected() {
        assert!(Cli::try_parse_from(["deep-cash", "run", "--fit_verbose", "maybe"]).is_err());
    }

    #[test]
    fn submit_takes_a_job_file() {
        let cli = Cli::try_parse_from(["deep-cash", "submit", "jobs.toml", "--dry-run"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Submit { dry_run: true, .. }
        ));
    }
}
