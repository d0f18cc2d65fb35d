use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error at '{path}': {message}")]
    Store { path: String, message: String },

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Load failed: {0}")]
    Load(String),

    #[error("Invalid identifier '{0}': expected letters, digits and underscores")]
    InvalidIdentifier(String),

    #[error("Unknown schema type '{0}'")]
    UnknownSchema(String),

    #[error("An archive run for table '{0}' is already in progress")]
    RunInProgress(String),

    #[error("Archive run cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("Archive run timed out during {stage} after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },
}

impl ArchiveError {
    pub fn store(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ArchiveError::Store {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
