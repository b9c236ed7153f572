use thiserror::Error;


#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Histogram error: {0}")]
    HistogramError(#[from] hdrhistogram::errors::CreationError),
    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),
    #[error("Invalid load profile: {0}")]
    InvalidProfile(String),
    #[error("Invalid threshold on '{metric}': {reason}")]
    InvalidThreshold { metric: String, reason: String },
    #[error("Unsupported config format: {0}")]
    UnsupportedConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
