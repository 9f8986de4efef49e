use std::path::PathBuf;

/// Errors that abort an estimation run.
#[derive(Debug, thiserror::Error)]
pub enum EffestError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("pairing contract violated: {0}")]
    Pairing(String),

    #[error("no fragments from single isoform transcripts survived filtering")]
    EmptyFragments,

    #[error("reference sequence not found: {0}")]
    MissingReference(String),

    #[error("alignment parsing error at record {record}: {msg}")]
    Sam { record: usize, msg: String },

    #[error("stored record error: {0}")]
    Schema(String),

    #[error("{0}")]
    Fatal(String),

    #[error("I/O error: {source} ({path})")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EffestError {
    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}

impl From<std::io::Error> for EffestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            source: err,
            path: PathBuf::from("<unknown>"),
        }
    }
}

pub type Result<T> = std::result::Result<T, EffestError>;
