use thiserror::Error;

/// Main error type for the deep-cash system
#[derive(Error, Debug)]
pub enum DcError {
    #[error("Algorithm space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Algorithm space errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    #[error("No {component_type} components in the algorithm space")]
    EmptyComponentList { component_type: String },

    #[error("Unknown hyperparameter: {name}")]
    UnknownHyperparameter { name: String },

    #[error("Invalid hyperparameter {name}: {message}")]
    InvalidHyperparameter { name: String, message: String },
}

/// Data-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Data source not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("test_size must be a float between 0 and 1, found: {test_size:.2}")]
    InvalidTestSize { test_size: f64 },

    #[error("Data environment {name} has no test partition; provide test data or a test_size")]
    NoTestPartition { name: String },

    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    #[error("Task environment has no data environments")]
    NoDataEnvironment,

    #[error("No data environment sampled yet")]
    NotSampled,
}

/// Estimator and pipeline errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("{estimator} is not fitted")]
    NotFitted { estimator: String },

    #[error("Shape mismatch: expected {expected} columns, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Empty input passed to {estimator}")]
    EmptyInput { estimator: String },

    #[error("Invalid parameter {parameter} for {estimator}: {message}")]
    InvalidParameter {
        estimator: String,
        parameter: String,
        message: String,
    },

    #[error("{estimator} fit failed: {message}")]
    FitFailed { estimator: String, message: String },

    #[error("Fit exceeded the time limit of {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Fit requires ~{required_mb} MB, limit is {limit_mb} MB")]
    MemoryLimit { required_mb: u64, limit_mb: u64 },
}

/// Controller and training errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("output_size {actual} does not match the action vocabulary size {expected}")]
    VocabularyMismatch { expected: usize, actual: usize },

    #[error("Backward called with empty buffers")]
    EmptyBuffer,

    #[error("No valid action at decoding step {step}")]
    NoValidAction { step: String },

    #[error("Invalid controller configuration: {message}")]
    InvalidConfig { message: String },
}

/// Job rendering and submission errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaunchError {
    #[error("Job CLI not found: {program}")]
    CliNotFound { program: String },

    #[error("Job submission failed with status {status}")]
    SubmitFailed { status: i32 },

    #[error("Failed to spawn job CLI: {message}")]
    SpawnFailed { message: String },

    #[error("Invalid job definition: {message}")]
    InvalidJob { message: String },
}

/// Result type alias for deep-cash operations
pub type DcResult<T> = Result<T, DcError>;

/// Result type alias for algorithm space operations
pub type SpaceResult<T> = Result<T, SpaceError>;

/// Result type alias for estimator operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Helper trait for converting string errors
pub trait IntoDcError {
    fn into_dc_error(self) -> DcError;
}

impl IntoDcError for String {
    fn into_dc_error(self) -> DcError {
        DcError::Internal(self)
    }
}

impl IntoDcError for &str {
    fn into_dc_error(self) -> DcError {
        DcError::Internal(self.to_string())
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::DcError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::DcError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::DcError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DataError::InvalidTestSize { test_size: 1.5 };
        assert!(error.to_string().contains("between 0 and 1"));
        assert!(error.to_string().contains("1.50"));

        let error = ModelError::MemoryLimit {
            required_mb: 9000,
            limit_mb: 5000,
        };
        assert!(error.to_string().contains("9000"));
        assert!(error.to_string().contains("5000"));
    }

    #[test]
    fn test_error_conversion() {
        let space_error = SpaceError::EmptyComponentList {
            component_type: "classifier".to_string(),
        };
        let dc_error: DcError = space_error.into();

        match dc_error {
            DcError::Space(_) => (),
            _ => panic!("Expected Space error"),
        }
    }

    #[test]
    fn test_macros() {
        let err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(err, DcError::Validation(ref m) if m == "Invalid value: 42"));
        let _internal_err = internal_error!("Something went wrong");
        let err = config_error!("Missing variable: {}", "DEEP_CASH_BETA");
        assert!(err.to_string().contains("DEEP_CASH_BETA"));
    }
}
