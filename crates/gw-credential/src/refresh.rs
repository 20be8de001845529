use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, CredentialResult};
use crate::model::Credential;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Outcome of a successful refresh exchange: a fresh access token and its
/// lifetime, to be swapped into the credential record by the caller.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub expires_at: i64,
}

/// OAuth refresh-token exchange collaborator (spec §4.6 `RefreshCredential`).
///
/// Grounded on the teacher's Google OAuth refresh flow
/// (`provider/geminicli/refresh.rs`): a `POST grant_type=refresh_token`
/// form body against a configurable token URI, using the client id/secret
/// pair carried on the credential record itself rather than a single
/// global pair (this gateway's credential model is per-credential, not
/// provider-wide).
#[async_trait]
pub trait OAuthRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential, now: i64) -> CredentialResult<RefreshOutcome>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct ReqwestOAuthRefresher {
    client: reqwest::Client,
}

impl ReqwestOAuthRefresher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OAuthRefresher for ReqwestOAuthRefresher {
    async fn refresh(&self, credential: &Credential, now: i64) -> CredentialResult<RefreshOutcome> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| CredentialError::MissingRefreshToken(credential.id.clone()))?;
        let client_id = credential.client_id.as_deref().unwrap_or_default();
        let client_secret = credential.client_secret.as_deref().unwrap_or_default();
        let token_uri = credential
            .token_uri
            .as_deref()
            .unwrap_or(DEFAULT_TOKEN_URI);

        let body = RefreshRequest {
            client_id,
            client_secret,
            grant_type: "refresh_token",
            refresh_token,
        };

        let response = self
            .client
            .post(token_uri)
            .form(&body)
            .send()
            .await
            .map_err(|err| CredentialError::RefreshTransport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CredentialError::RefreshRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let payload: RefreshResponse = response
            .json()
            .await
            .map_err(|err| CredentialError::RefreshTransport(err.to_string()))?;
        let access_token = payload
            .access_token
            .ok_or(CredentialError::RefreshMissingAccessToken)?;
        let expires_at = now + payload.expires_in.unwrap_or(3600);

        Ok(RefreshOutcome {
            access_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_common::CredentialId;

    struct StubRefresher {
        outcome: CredentialResult<RefreshOutcome>,
    }

    #[async_trait]
    impl OAuthRefresher for StubRefresher {
        async fn refresh(&self, _: &Credential, _: i64) -> CredentialResult<RefreshOutcome> {
            match &self.outcome {
                Ok(outcome) => Ok(outcome.clone()),
                Err(_) => Err(CredentialError::RefreshMissingAccessToken),
            }
        }
    }

    #[tokio::test]
    async fn stub_refresher_round_trips() {
        let refresher = StubRefresher {
            outcome: Ok(RefreshOutcome {
                access_token: "tok".to_string(),
                expires_at: 100,
            }),
        };
        let cred = Credential::new(
            CredentialId::new("c1"),
            crate::model::CredentialType::Oauth,
            0,
        );
        let out = refresher.refresh(&cred, 0).await.unwrap();
        assert_eq!(out.access_token, "tok");
    }
}
