//! Request context construction
//!
//! Turns a gated tool call plus its headers into the immutable
//! [`RequestContext`] handed to the tool body: credential resolution, OAuth
//! completion and routing, in that order.

use crate::auth::credentials::{
    self, AuthMethod, AuthenticatedCredential, Authorization, CredentialSecret,
};
use crate::auth::headers::RequestAuthHeaders;
use crate::auth::oauth::OAuthSessionManager;
use crate::config::ServerAuthConfig;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::routing::{CloudRouter, RoutedSite, SiteAccess};
use crate::tools::catalog::{Service, ToolDescriptor};
use crate::tools::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Everything a tool body needs for one call
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tool: ToolDescriptor,
    pub method: AuthMethod,
    pub authorization: Authorization,
    pub site: RoutedSite,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub ssl_verify: bool,
}

impl RequestContext {
    pub fn service(&self) -> Service {
        self.tool.service
    }

    pub fn base_url(&self) -> &Url {
        &self.site.base_url
    }

    pub fn cloud_id(&self) -> Option<&str> {
        self.site.cloud_id.as_deref()
    }

    /// HTTP client honouring the call's timeout and TLS settings
    pub fn http_client(&self) -> AtlassianMcpResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(!self.ssl_verify)
            .build()
            .map_err(|e| AtlassianMcpError::internal(format!("Failed to build HTTP client: {}", e)))
    }
}

/// Builds request contexts from the shared configuration
pub struct RequestContextBuilder {
    config: Arc<ServerAuthConfig>,
    sessions: Option<Arc<OAuthSessionManager>>,
    router: CloudRouter,
}

impl RequestContextBuilder {
    pub fn new(
        config: Arc<ServerAuthConfig>,
        sessions: Option<Arc<OAuthSessionManager>>,
    ) -> AtlassianMcpResult<Self> {
        let router = CloudRouter::from_config(&config)?;
        Ok(Self {
            config,
            sessions,
            router,
        })
    }

    pub fn config(&self) -> &Arc<ServerAuthConfig> {
        &self.config
    }

    /// Resolve the credential for `service` and complete it with an OAuth
    /// access token when needed
    #[instrument(skip(self, headers))]
    pub async fn authenticate(
        &self,
        service: Service,
        headers: &RequestAuthHeaders,
    ) -> AtlassianMcpResult<AuthenticatedCredential> {
        let resolved = credentials::resolve(&self.config, service, headers)?;

        let credential = match resolved.secret {
            CredentialSecret::Bearer(token) => AuthenticatedCredential {
                method: resolved.method,
                authorization: Authorization::Bearer(token),
                access: if resolved.method.is_site_bound() {
                    SiteAccess::SiteBound
                } else {
                    SiteAccess::Unverified
                },
            },
            CredentialSecret::Basic { username, token } => AuthenticatedCredential {
                method: resolved.method,
                authorization: Authorization::Basic { username, token },
                access: SiteAccess::SiteBound,
            },
            CredentialSecret::OAuthAccount(account) => {
                let sessions = self.sessions.as_ref().ok_or_else(|| {
                    AtlassianMcpError::config("OAuth is configured but no session manager is running")
                })?;
                let state = sessions.get_valid_access_token(&account).await?;
                AuthenticatedCredential {
                    method: resolved.method,
                    authorization: Authorization::Bearer(state.access_token.clone()),
                    access: SiteAccess::Sites(state.cloud_ids.clone()),
                }
            }
        };

        debug!(
            service = service.as_str(),
            method = credential.method.as_str(),
            "Authenticated call"
        );
        Ok(credential)
    }

    /// Choose where the call is sent
    pub fn route(
        &self,
        service: Service,
        credential: &AuthenticatedCredential,
        headers: &RequestAuthHeaders,
    ) -> AtlassianMcpResult<RoutedSite> {
        self.router
            .route(service, credential, headers.cloud_id.as_deref())
    }

    /// Assemble the context from the outputs of the earlier stages
    pub fn assemble(
        &self,
        tool: ToolDescriptor,
        credential: AuthenticatedCredential,
        site: RoutedSite,
    ) -> RequestContext {
        let ssl_verify = self
            .config
            .service(tool.service)
            .map(|service| service.ssl_verify)
            .unwrap_or(true);

        RequestContext {
            tool,
            method: credential.method,
            authorization: credential.authorization,
            site,
            timeout: Duration::from_secs(self.config.request_timeout_seconds),
            retry: RetryPolicy::new(self.config.max_retries),
            ssl_verify,
        }
    }

    /// Run all stages for one call
    pub async fn build(
        &self,
        tool: &ToolDescriptor,
        headers: &RequestAuthHeaders,
    ) -> AtlassianMcpResult<RequestContext> {
        let credential = self.authenticate(tool.service, headers).await?;
        let site = self.route(tool.service, &credential, headers)?;
        Ok(self.assemble(*tool, credential, site))
    }
}
