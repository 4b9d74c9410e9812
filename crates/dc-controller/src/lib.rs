//! The reinforcement-learning side of deep-cash: a policy network over
//! algorithm and hyperparameter actions, trained with REINFORCE against a
//! task environment, plus a random search baseline to compare it with.

pub mod controller;
pub mod experiment;
pub mod history;
pub mod loggers;
pub mod nn;
pub mod random_search;
pub mod reinforce;

pub use controller::{Action, ActionType, CashController, Choice, ControllerConfig, LogProbGrad};
pub use experiment::{run_experiment, ExperimentSummary, SearchMethod, TrialSummary};
pub use history::{EpisodeRecord, EpisodeTracker};
pub use loggers::{metrics_logger, DefaultLogger, FloydLogger, MetricsLogger};
pub use nn::{Adam, RecurrentPolicy};
pub use random_search::RandomSearch;
pub use reinforce::CashReinforce;
