//! Credential resolution
//!
//! Picks the credential for one downstream call. Resolution order:
//! per-request authorization, then PAT, then API token, then the OAuth
//! default account.

use crate::auth::headers::{RequestAuthHeaders, RequestAuthorization};
use crate::config::ServerAuthConfig;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::masking::mask_secret;
use crate::routing::SiteAccess;
use crate::tools::catalog::Service;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Which mechanism authenticated a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Caller-supplied OAuth bearer token
    RequestBearer,
    /// Caller-supplied personal access token
    RequestPat,
    /// Server-configured personal access token
    PersonalAccessToken,
    /// Server-configured username + API token
    ApiToken,
    /// Server-configured OAuth account
    OAuth,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::RequestBearer => "request_bearer",
            AuthMethod::RequestPat => "request_pat",
            AuthMethod::PersonalAccessToken => "personal_access_token",
            AuthMethod::ApiToken => "api_token",
            AuthMethod::OAuth => "oauth",
        }
    }

    /// Credentials tied to the configured service URL rather than a cloud id
    pub fn is_site_bound(&self) -> bool {
        matches!(
            self,
            AuthMethod::RequestPat | AuthMethod::PersonalAccessToken | AuthMethod::ApiToken
        )
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret material selected for a call
#[derive(Clone)]
pub enum CredentialSecret {
    Bearer(SecretString),
    Basic {
        username: String,
        token: SecretString,
    },
    /// Token must be obtained from the OAuth session manager
    OAuthAccount(String),
}

impl fmt::Debug for CredentialSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSecret::Bearer(token) => write!(f, "Bearer({})", mask_secret(token)),
            CredentialSecret::Basic { username, token } => {
                write!(f, "Basic({}, {})", username, mask_secret(token))
            }
            CredentialSecret::OAuthAccount(account) => write!(f, "OAuthAccount({})", account),
        }
    }
}

/// Credential chosen for exactly one call
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub method: AuthMethod,
    pub secret: CredentialSecret,
}

/// Concrete credential sent to a downstream API
#[derive(Clone)]
pub enum Authorization {
    Bearer(SecretString),
    Basic {
        username: String,
        token: SecretString,
    },
}

impl Authorization {
    /// Credentials for the gouqi Jira client
    pub fn to_gouqi_credentials(&self) -> gouqi::Credentials {
        match self {
            Authorization::Bearer(token) => {
                gouqi::Credentials::Bearer(token.expose_secret().to_string())
            }
            Authorization::Basic { username, token } => {
                gouqi::Credentials::Basic(username.clone(), token.expose_secret().to_string())
            }
        }
    }

    /// Attach this credential to a reqwest request
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Authorization::Bearer(token) => request.bearer_auth(token.expose_secret()),
            Authorization::Basic { username, token } => {
                request.basic_auth(username, Some(token.expose_secret()))
            }
        }
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::Bearer(token) => write!(f, "Bearer({})", mask_secret(token)),
            Authorization::Basic { username, token } => {
                write!(f, "Basic({}, {})", username, mask_secret(token))
            }
        }
    }
}

/// A resolved credential with its OAuth token, if any, already obtained
#[derive(Debug, Clone)]
pub struct AuthenticatedCredential {
    pub method: AuthMethod,
    pub authorization: Authorization,
    /// Sites this credential may be routed to
    pub access: SiteAccess,
}

/// Resolve the credential for a call against `service`
///
/// Never mutates the configuration and logs only masked values.
pub fn resolve(
    config: &ServerAuthConfig,
    service: Service,
    headers: &RequestAuthHeaders,
) -> AtlassianMcpResult<ResolvedCredential> {
    if let Some(authorization) = &headers.authorization {
        let resolved = match authorization {
            RequestAuthorization::Bearer(token) => ResolvedCredential {
                method: AuthMethod::RequestBearer,
                secret: CredentialSecret::Bearer(token.clone()),
            },
            RequestAuthorization::PersonalToken(token) => ResolvedCredential {
                method: AuthMethod::RequestPat,
                secret: CredentialSecret::Bearer(token.clone()),
            },
        };
        debug!(
            service = service.as_str(),
            method = resolved.method.as_str(),
            credential = ?resolved.secret,
            "Using per-request credential"
        );
        return Ok(resolved);
    }

    if let Some(service_config) = config.service(service) {
        if let Some(token) = &service_config.personal_token {
            debug!(
                service = service.as_str(),
                token = %mask_secret(token),
                "Using configured personal access token"
            );
            return Ok(ResolvedCredential {
                method: AuthMethod::PersonalAccessToken,
                secret: CredentialSecret::Bearer(token.clone()),
            });
        }

        if let (Some(username), Some(token)) = (&service_config.username, &service_config.api_token)
        {
            debug!(
                service = service.as_str(),
                username = username.as_str(),
                token = %mask_secret(token),
                "Using configured API token"
            );
            return Ok(ResolvedCredential {
                method: AuthMethod::ApiToken,
                secret: CredentialSecret::Basic {
                    username: username.clone(),
                    token: token.clone(),
                },
            });
        }
    }

    if let Some(oauth) = &config.oauth {
        debug!(
            service = service.as_str(),
            account = oauth.account(),
            "Using OAuth default account"
        );
        return Ok(ResolvedCredential {
            method: AuthMethod::OAuth,
            secret: CredentialSecret::OAuthAccount(oauth.account().to_string()),
        });
    }

    Err(AtlassianMcpError::no_credentials(service.as_str()))
}
