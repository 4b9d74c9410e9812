//! Data environments and the task environment for deep-cash.
//!
//! A [`DataEnvironment`] wraps a dataset (CSV file or synthetic generator)
//! with cached train/test partitions. The [`TaskEnvironment`] samples data
//! environments and evaluates ML frameworks on bootstrap samples.

pub mod environment;
pub mod loaders;
pub mod preprocess;
pub mod task;

pub use environment::{DataEnvSample, DataEnvironment, FetchFn, Partition, TargetPreprocessor};
pub use loaders::{default_environments, load_csv, make_classification, make_regression};
pub use preprocess::{encode_labels, preprocess_features, CleanFeatures, RawFeatures, RawValue};
pub use task::{Evaluation, TaskEnvironment, TaskState};
