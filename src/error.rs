use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("No sheet matches prefix '{prefix}' (available: {available:?})")]
    NoMatchingSheet {
        prefix: String,
        available: Vec<String>,
    },

    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("Invalid period '{0}': expected YYYY-MM")]
    InvalidPeriod(String),

    #[error("Date parsing error: {0}")]
    DateError(String),

    #[error("Unknown analysis: {0}")]
    UnknownAnalysis(String),

    #[error("Invalid argument '{name}': {details}")]
    InvalidArgument { name: String, details: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
