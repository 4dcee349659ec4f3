//! Per-request authentication headers
//!
//! HTTP-based transports may carry caller credentials and a cloud-id hint.
//! The values live for exactly one call and are never cached.

use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::masking::mask_secret;
use http::header::{HeaderMap, AUTHORIZATION};
use secrecy::SecretString;
use std::fmt;

/// Header carrying the cloud-id hint
pub const CLOUD_ID_HEADER: &str = "x-atlassian-cloud-id";

/// Caller-supplied credential override
#[derive(Clone)]
pub enum RequestAuthorization {
    /// `Authorization: Bearer <oauth access token>`
    Bearer(SecretString),
    /// `Authorization: Token <personal access token>`
    PersonalToken(SecretString),
}

impl fmt::Debug for RequestAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestAuthorization::Bearer(token) => {
                write!(f, "Bearer({})", mask_secret(token))
            }
            RequestAuthorization::PersonalToken(token) => {
                write!(f, "PersonalToken({})", mask_secret(token))
            }
        }
    }
}

/// Authentication-related headers of one inbound call
#[derive(Debug, Clone, Default)]
pub struct RequestAuthHeaders {
    pub authorization: Option<RequestAuthorization>,
    pub cloud_id: Option<String>,
}

impl RequestAuthHeaders {
    /// Headers of a call made over a transport without headers (stdio)
    pub fn none() -> Self {
        Self::default()
    }

    /// Headers carrying a caller OAuth bearer token
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            authorization: Some(RequestAuthorization::Bearer(SecretString::from(token.into()))),
            cloud_id: None,
        }
    }

    /// Headers carrying a caller personal access token
    pub fn personal_token(token: impl Into<String>) -> Self {
        Self {
            authorization: Some(RequestAuthorization::PersonalToken(SecretString::from(
                token.into(),
            ))),
            cloud_id: None,
        }
    }

    /// Attach a cloud-id hint
    pub fn with_cloud_id(mut self, cloud_id: impl Into<String>) -> Self {
        self.cloud_id = Some(cloud_id.into());
        self
    }

    /// Parse the headers of an HTTP transport request
    pub fn from_header_map(headers: &HeaderMap) -> AtlassianMcpResult<Self> {
        let authorization = match headers.get(AUTHORIZATION) {
            None => None,
            Some(value) => {
                let raw = value.to_str().map_err(|_| {
                    AtlassianMcpError::invalid_auth_header("value is not valid ASCII")
                })?;
                Some(parse_authorization(raw)?)
            }
        };

        let cloud_id = headers
            .get(CLOUD_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        Ok(Self {
            authorization,
            cloud_id,
        })
    }
}

/// Parse an `Authorization` header value
fn parse_authorization(raw: &str) -> AtlassianMcpResult<RequestAuthorization> {
    let (scheme, token) = raw
        .trim()
        .split_once(' ')
        .map(|(scheme, token)| (scheme, token.trim()))
        .unwrap_or((raw.trim(), ""));

    if token.is_empty() {
        return Err(AtlassianMcpError::invalid_auth_header(format!(
            "missing credential after '{}'",
            scheme
        )));
    }

    match scheme.to_ascii_lowercase().as_str() {
        "bearer" => Ok(RequestAuthorization::Bearer(SecretString::from(
            token.to_string(),
        ))),
        "token" => Ok(RequestAuthorization::PersonalToken(SecretString::from(
            token.to_string(),
        ))),
        other => Err(AtlassianMcpError::invalid_auth_header(format!(
            "unsupported scheme '{}'; only 'Bearer <OAuthToken>' or 'Token <PAT>' are accepted",
            other
        ))),
    }
}
