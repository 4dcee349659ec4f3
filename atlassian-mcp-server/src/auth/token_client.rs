//! HTTP client for the Atlassian OAuth token endpoint

use crate::auth::oauth::{RefreshFailure, TokenEndpoint, TokenGrant, DEFAULT_TOKEN_LIFETIME_SECONDS};
use crate::config::OAuthClientConfig;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Refreshes tokens against `auth.atlassian.com` (or a configured override)
pub struct AtlassianTokenClient {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: SecretString,
}

impl AtlassianTokenClient {
    pub fn new(config: &OAuthClientConfig, timeout: Duration) -> AtlassianMcpResult<Self> {
        let token_url = Url::parse(&config.token_url).map_err(|e| {
            AtlassianMcpError::config(format!("Invalid OAuth token URL {}: {}", config.token_url, e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AtlassianMcpError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }
}

#[async_trait]
impl TokenEndpoint for AtlassianTokenClient {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, RefreshFailure> {
        let body = RefreshRequest {
            grant_type: "refresh_token",
            client_id: &self.client_id,
            client_secret: self.client_secret.expose_secret(),
            refresh_token: refresh_token.expose_secret(),
        };

        debug!("POST {}", self.token_url);
        let response = self
            .http
            .post(self.token_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| RefreshFailure::Network(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            let parsed: TokenResponse = response
                .json()
                .await
                .map_err(|e| RefreshFailure::Network(format!("invalid token response: {}", e)))?;
            return Ok(TokenGrant {
                access_token: SecretString::from(parsed.access_token),
                refresh_token: parsed.refresh_token.map(SecretString::from),
                expires_in: parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS),
            });
        }

        let text = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<TokenErrorResponse>(&text)
            .map(|e| match e.error_description {
                Some(description) => format!("{}: {}", e.error, description),
                None => e.error,
            })
            .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));

        warn!(status = status.as_u16(), "OAuth token endpoint refused refresh: {}", reason);

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(RefreshFailure::Rejected(reason))
            }
            _ => Err(RefreshFailure::Network(reason)),
        }
    }
}
