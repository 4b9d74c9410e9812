//! Renders and submits deep-cash jobs to floydhub.

pub mod command;
pub mod floyd;
pub mod jobs;
pub mod submit;

pub use command::{ShellCommand, ANNEAL_SCRIPT, DEFAULT_ENV_FILE, TRAIN_SCRIPT};
pub use floyd::{FloydJob, FLOYD_PROGRAM};
pub use jobs::{JobFile, JobKind, JobSpec};
pub use submit::{submit, submit_all, submit_with_program, SubmitOutcome};
