use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommitcovError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Annotate failed for {path} at {revision}: {message}")]
    Blame {
        revision: String,
        path: String,
        message: String,
    },

    /// A path with a coverage record does not exist at the build revision.
    #[error("No annotate data for {path} at build revision {revision}")]
    MissingBuildAnnotate { revision: String, path: String },

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    Other(String),
}

impl From<ureq::Error> for CommitcovError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, resp) => {
                let url = resp.get_url().to_string();
                CommitcovError::Http(format!("{url} returned HTTP {code}"))
            }
            other => CommitcovError::Http(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommitcovError>;
