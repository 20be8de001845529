use gw_common::CredentialId;

pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential not found: {0}")]
    NotFound(CredentialId),
    #[error("credential {0} has no refresh token")]
    MissingRefreshToken(CredentialId),
    #[error("refresh request transport error: {0}")]
    RefreshTransport(String),
    #[error("refresh request rejected: {status}: {body}")]
    RefreshRejected { status: u16, body: String },
    #[error("refresh response missing access_token")]
    RefreshMissingAccessToken,
    #[error("storage error: {0}")]
    Storage(#[from] gw_storage::StorageError),
}
