use crate::logic::expression::CompileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WellcastError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("External database error: {0}")]
    ExternalDatabase(#[from] sqlx::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Rule '{key}' failed to compile: {source}")]
    Compile {
        key: String,
        #[source]
        source: CompileError,
    },

    #[error("Data source unavailable: {0}")]
    DataSourceUnavailable(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl WellcastError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, WellcastError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, WellcastError>;
