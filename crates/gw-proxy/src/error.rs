pub type ProxyResult<T> = Result<T, ProxyError>;

/// Upstream proxy/stream-pipeline error taxonomy (spec §4.2, §7), mirroring
/// the teacher's per-crate `errors.rs` convention.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },
    #[error("SSE line buffer exceeded {0} bytes without a newline")]
    BufferOverflow(usize),
    #[error("credential error: {0}")]
    Credential(#[from] gw_credential::CredentialError),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ProxyError {
    pub fn to_gateway_error(&self) -> gw_common::GatewayError {
        match self {
            ProxyError::UpstreamStatus { status, body } if *status == 401 => {
                gw_common::GatewayError::new(gw_common::ErrorKind::UpstreamAuth, "upstream rejected credentials")
                    .with_details(body.clone())
            }
            ProxyError::UpstreamStatus { status, body } if (500..600).contains(status) || *status == 429 => {
                gw_common::GatewayError::new(gw_common::ErrorKind::UpstreamRetryable, format!("upstream error {status}"))
                    .with_details(body.clone())
            }
            ProxyError::UpstreamStatus { status, body } => {
                gw_common::GatewayError::new(gw_common::ErrorKind::UpstreamFatal, format!("upstream error {status}"))
                    .with_details(body.clone())
            }
            other => gw_common::GatewayError::internal(other.to_string()),
        }
    }
}
