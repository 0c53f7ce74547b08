use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("unreadable watch directory: {0}")]
    WatchDirUnreadable(String),

    #[error("unwritable store directory: {0}")]
    StoreDirUnwritable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
