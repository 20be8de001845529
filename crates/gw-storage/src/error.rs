pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {key}")]
    NotFound { key: String },
    #[error("not supported: {operation}")]
    NotSupported { operation: &'static str },
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}
