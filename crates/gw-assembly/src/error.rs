pub type AssemblyResult<T> = Result<T, AssemblyError>;

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("plan not found: {0}")]
    PlanNotFound(String),
    #[error("backup not found for plan: {0}")]
    BackupNotFound(String),
    #[error("transaction apply failed: {0}")]
    TransactionFailed(String),
    #[error("storage error: {0}")]
    Storage(#[from] gw_storage::StorageError),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}
