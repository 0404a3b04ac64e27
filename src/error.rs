use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("malformed source {url}: {reason}")]
    MalformedSource { url: String, reason: String },

    #[error("key-value store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("snapshot file missing: {}", path.display())]
    ConfigMissing { path: PathBuf },

    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("invalid cursor: {0:?}")]
    BadCursor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn channel_not_found(uid: impl Into<String>) -> Self {
        Error::NotFound { kind: "channel", id: uid.into() }
    }

    pub fn malformed(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::MalformedSource { url: url.into(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
