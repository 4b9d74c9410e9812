mod cli;
mod logger;

use anyhow::{Context, Result};
use clap::Parser;
use dc_controller::{run_experiment, ExperimentSummary, SearchMethod};
use dc_data::{default_environments, load_csv, DataEnvironment, TaskEnvironment};
use dc_launch::{submit_all, JobFile};
use dc_types::{DcResult, ExperimentConfig};
use tracing::{debug, info};

use crate::cli::{Cli, Command, DataArgs};

fn data_environments(data: &DataArgs, seed: u64) -> DcResult<Vec<DataEnvironment>> {
    match &data.csv {
        Some(path) => {
            let env = load_csv(path, &data.target_column, None, data.target_type)?
                .with_test_size(data.test_size, Some(seed))?;
            Ok(vec![env])
        }
        None => default_environments(data.target_type, seed),
    }
}

fn train(config: ExperimentConfig, data: &DataArgs, method: SearchMethod) -> Result<()> {
    let config = match data.random_state {
        Some(seed) => config.with_random_state(seed),
        None => config,
    };
    config.validate().context("invalid experiment configuration")?;
    debug!(?config, "experiment configuration");

    let factory = |trial_config: &ExperimentConfig| -> DcResult<TaskEnvironment> {
        let seed = trial_config.random_state.unwrap_or_default();
        TaskEnvironment::from_config(trial_config, data_environments(data, seed)?)
    };
    let summary = run_experiment(&config, method, factory)
        .with_context(|| format!("{method:?} experiment failed"))?;
    report(&summary);
    Ok(())
}

fn report(summary: &ExperimentSummary) {
    for trial in &summary.trials {
        match (&trial.best_mlf, trial.best_validation_score) {
            (Some(mlf), Some(score)) => println!(
                "trial {} (seed {}): best validation score {score:.4} at episode {}: {mlf}",
                trial.trial,
                trial.seed,
                trial.best_episode.unwrap_or_default(),
            ),
            _ => println!("trial {} (seed {}): no framework fit successfully", trial.trial, trial.seed),
        }
    }
    println!("history written to {}", summary.history_path.display());
}

fn load_jobs(path: &std::path::Path) -> Result<Vec<dc_launch::FloydJob>> {
    let jobs = JobFile::load(path)?
        .floyd_jobs()
        .with_context(|| format!("invalid job in {}", path.display()))?;
    info!(path = %path.display(), jobs = jobs.len(), "loaded job file");
    Ok(jobs)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_cli_logger(cli.verbose);

    match cli.command {
        Command::Run { train: args, data } => {
            let config = args.apply(ExperimentConfig::default());
            tokio::task::block_in_place(|| train(config, &data, SearchMethod::Reinforce))?;
        }
        Command::Anneal { data } => {
            let config = ExperimentConfig::from_env().context("reading DEEP_CASH_* environment")?;
            tokio::task::block_in_place(|| train(config, &data, SearchMethod::Reinforce))?;
        }
        Command::RandomSearch { train: args, data } => {
            let config = args.apply(ExperimentConfig::default());
            tokio::task::block_in_place(|| train(config, &data, SearchMethod::RandomSearch))?;
        }
        Command::Render { jobs } => {
            for job in load_jobs(&jobs)? {
                println!("{}", job.render());
            }
        }
        Command::Submit { jobs, dry_run } => {
            let outcomes = submit_all(&load_jobs(&jobs)?, dry_run).await?;
            for outcome in outcomes {
                println!("{}", outcome.rendered);
            }
        }
    }
    Ok(())
}
