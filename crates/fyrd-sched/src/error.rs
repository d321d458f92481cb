//! Error handling for job submission.

use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur while building, submitting or tracking jobs.
#[derive(Error, Debug)]
pub enum SchedError {
    /// Keyword is not part of the option table.
    #[error("Unknown option '{name}'{}", suggestion.as_ref().map(|s| format!(", did you mean '{s}'?")).unwrap_or_default())]
    UnknownOption {
        name: String,
        suggestion: Option<String>,
    },

    /// The same option was given twice, possibly under an alias.
    #[error("Option '{0}' given more than once")]
    DuplicateOption(String),

    /// Option value has the wrong type or format.
    #[error("Invalid value for option '{name}': {message}")]
    InvalidOptionValue { name: String, message: String },

    /// Profile not found in the configuration.
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Invalid job state for the requested operation.
    #[error("Invalid job state: expected {expected}, found {found}")]
    InvalidJobState { expected: String, found: String },

    /// Invalid dependency reference.
    #[error("Invalid dependency: {0}")]
    InvalidDependency(String),

    /// Unsupported queue type name.
    #[error("Unknown queue type '{0}', expected one of: slurm, torque, local, auto")]
    UnknownQueueType(String),

    /// SLURM submission failed.
    #[error("SLURM submission failed: {0}")]
    SlurmSubmitError(String),

    /// SLURM command execution failed.
    #[error("SLURM command failed: {command} - {message}")]
    SlurmCommandError { command: String, message: String },

    /// SLURM job not found.
    #[error("SLURM job not found: {0}")]
    SlurmJobNotFound(String),

    /// Torque submission failed.
    #[error("Torque submission failed: {0}")]
    TorqueSubmitError(String),

    /// Torque command execution failed.
    #[error("Torque command failed: {command} - {message}")]
    TorqueCommandError { command: String, message: String },

    /// Torque job not found.
    #[error("Torque job not found: {0}")]
    TorqueJobNotFound(String),

    /// Local execution failed.
    #[error("Local execution failed: {0}")]
    LocalError(String),

    /// Local job started by another fyrd process, whose pool this process cannot see.
    #[error("Local job {0} belongs to another fyrd process")]
    LocalJobNotOwned(String),

    /// The called function raised an error on the compute node.
    #[error("Function {function} failed: {message}")]
    FunctionFailed { function: String, message: String },

    /// Expected output file is missing.
    #[error("Output file missing: {0}")]
    MissingOutput(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Timeout waiting for a command or job.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_yaml_ng::Error> for SchedError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        SchedError::ConfigError(e.to_string())
    }
}

impl SchedError {
    /// Shorthand for an [`SchedError::InvalidOptionValue`].
    pub fn invalid_value(name: impl Into<String>, message: impl Into<String>) -> Self {
        SchedError::InvalidOptionValue {
            name: name.into(),
            message: message.into(),
        }
    }
}
