use backend::GatewayError;
use thiserror::Error;

/// Errors surfaced by the evaluation core.
///
/// Connectivity and data errors abort the run they occur in; individual
/// metric scoring failures never reach this type; they are captured as
/// data on the affected `MetricResult` instead.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Dataset error: {message}")]
    Dataset { message: String },

    #[error("Missing session_id for evaluation. Upload documents before running metrics.")]
    MissingSession,

    #[error("Unknown metric: {name}")]
    UnknownMetric { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
