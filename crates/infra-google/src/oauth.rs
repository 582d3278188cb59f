use async_trait::async_trait;
use harvest_domain::{AccessGrant, CredentialProvider};
use harvest_error::SyncError;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::http::send_failed;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
}

pub struct GoogleOAuth {
    client: Client,
    config: OAuthConfig,
    token_url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl GoogleOAuth {
    pub fn new(client: Client, config: OAuthConfig) -> Self {
        Self {
            client,
            config,
            token_url: TOKEN_URL.to_string(),
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }
}

#[async_trait]
impl CredentialProvider for GoogleOAuth {
    async fn refresh(&self, refresh_token: &str) -> Result<AccessGrant, SyncError> {
        debug!(url = %self.token_url, "refreshing access token");
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(send_failed("oauth"))?;

        // Any rejection from the token endpoint means the grant is unusable.
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "token refresh rejected");
            return Err(SyncError::auth(format!("token refresh failed ({status}): {body}")));
        }

        let tokens: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::auth(format!("token response parse failed: {e}")))?;
        Ok(AccessGrant {
            access_token: tokens.access_token,
            expires_in_secs: tokens.expires_in,
        })
    }
}
