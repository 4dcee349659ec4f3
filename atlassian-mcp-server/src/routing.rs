//! Multi-cloud routing
//!
//! Chooses the base URL a call is sent to. Site-bound credentials (PAT, API
//! token) always talk to the configured service URL; OAuth credentials are
//! routed through the Atlassian API gateway to one of the cloud sites they
//! may access.

use crate::auth::credentials::AuthenticatedCredential;
use crate::config::ServerAuthConfig;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::tools::catalog::Service;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// Sites a credential may be routed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteAccess {
    /// Caller-supplied bearer token; the remote side enforces access
    Unverified,
    /// Bound to the configured service URL
    SiteBound,
    /// The cloud ids recorded for an OAuth account
    Sites(Vec<String>),
}

/// Where a call is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedSite {
    pub base_url: Url,
    pub cloud_id: Option<String>,
}

/// Routes calls to a base URL per service and credential
#[derive(Debug, Clone)]
pub struct CloudRouter {
    api_gateway: Url,
    default_cloud_id: Option<String>,
    service_urls: BTreeMap<Service, Url>,
}

impl CloudRouter {
    pub fn new(
        api_gateway: Url,
        default_cloud_id: Option<String>,
        service_urls: BTreeMap<Service, Url>,
    ) -> Self {
        Self {
            api_gateway,
            default_cloud_id,
            service_urls,
        }
    }

    pub fn from_config(config: &ServerAuthConfig) -> AtlassianMcpResult<Self> {
        let gateway = config
            .oauth
            .as_ref()
            .map(|oauth| oauth.api_gateway.as_str())
            .unwrap_or(crate::config::DEFAULT_API_GATEWAY);
        let api_gateway = Url::parse(gateway).map_err(|e| {
            AtlassianMcpError::config(format!("Invalid API gateway URL {}: {}", gateway, e))
        })?;

        let service_urls = [Service::Jira, Service::Confluence]
            .into_iter()
            .filter_map(|service| {
                config
                    .service(service)
                    .map(|service_config| (service, service_config.url.clone()))
            })
            .collect();

        Ok(Self::new(
            api_gateway,
            config.default_cloud_id().map(str::to_string),
            service_urls,
        ))
    }

    /// Gateway URL of a cloud site for a service
    pub fn gateway_url(&self, service: Service, cloud_id: &str) -> AtlassianMcpResult<Url> {
        let mut url = self.api_gateway.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                AtlassianMcpError::config(format!(
                    "API gateway URL cannot be a base: {}",
                    self.api_gateway
                ))
            })?;
            segments.pop_if_empty();
            match service {
                Service::Jira => {
                    segments.extend(["ex", "jira", cloud_id]);
                }
                Service::Confluence => {
                    segments.extend(["ex", "confluence", cloud_id, "wiki"]);
                }
            }
        }
        Ok(url)
    }

    /// Pick the base URL and cloud id for a call
    pub fn route(
        &self,
        service: Service,
        credential: &AuthenticatedCredential,
        cloud_id_hint: Option<&str>,
    ) -> AtlassianMcpResult<RoutedSite> {
        let service_url = self.service_urls.get(&service).ok_or_else(|| {
            AtlassianMcpError::config(format!("{} is not configured", service))
        })?;
        let default = self.default_cloud_id.as_deref();

        let routed = match &credential.access {
            SiteAccess::SiteBound => match cloud_id_hint {
                Some(hint) if Some(hint) == default => RoutedSite {
                    base_url: service_url.clone(),
                    cloud_id: Some(hint.to_string()),
                },
                Some(hint) => return Err(AtlassianMcpError::cloud_id_not_authorized(hint)),
                None => RoutedSite {
                    base_url: service_url.clone(),
                    cloud_id: None,
                },
            },

            SiteAccess::Unverified => match cloud_id_hint.or(default) {
                Some(cloud_id) => self.cloud_site(service, cloud_id)?,
                None => RoutedSite {
                    base_url: service_url.clone(),
                    cloud_id: None,
                },
            },

            SiteAccess::Sites(sites) => {
                let accessible: Vec<&str> = if sites.is_empty() {
                    default.into_iter().collect()
                } else {
                    sites.iter().map(String::as_str).collect()
                };

                let chosen = match cloud_id_hint {
                    Some(hint) if accessible.contains(&hint) => hint,
                    Some(hint) => return Err(AtlassianMcpError::cloud_id_not_authorized(hint)),
                    None => match default.filter(|d| accessible.contains(d)) {
                        Some(default) => default,
                        None => match accessible.as_slice() {
                            [only] => *only,
                            [] => {
                                return Err(AtlassianMcpError::ambiguous_cloud(
                                    "the OAuth account has no accessible sites and no default cloud id is configured",
                                ))
                            }
                            several => {
                                return Err(AtlassianMcpError::ambiguous_cloud(format!(
                                    "the OAuth account can access {} sites; send an X-Atlassian-Cloud-Id header or set ATLASSIAN_OAUTH_CLOUD_ID",
                                    several.len()
                                )))
                            }
                        },
                    },
                };
                self.cloud_site(service, chosen)?
            }
        };

        debug!(
            service = service.as_str(),
            method = credential.method.as_str(),
            base_url = %routed.base_url,
            cloud_id = routed.cloud_id.as_deref().unwrap_or("-"),
            "Routed call"
        );

        Ok(routed)
    }

    fn cloud_site(&self, service: Service, cloud_id: &str) -> AtlassianMcpResult<RoutedSite> {
        Ok(RoutedSite {
            base_url: self.gateway_url(service, cloud_id)?,
            cloud_id: Some(cloud_id.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::{AuthMethod, Authorization};
    use crate::error::ErrorKind;
    use secrecy::SecretString;

    fn router(default: Option<&str>) -> CloudRouter {
        let mut urls = BTreeMap::new();
        urls.insert(
            Service::Jira,
            Url::parse("https://example.atlassian.net").unwrap(),
        );
        urls.insert(
            Service::Confluence,
            Url::parse("https://example.atlassian.net/wiki").unwrap(),
        );
        CloudRouter::new(
            Url::parse("https://api.atlassian.com").unwrap(),
            default.map(str::to_string),
            urls,
        )
    }

    fn credential(method: AuthMethod, access: SiteAccess) -> AuthenticatedCredential {
        AuthenticatedCredential {
            method,
            authorization: Authorization::Bearer(SecretString::from("t".to_string())),
            access,
        }
    }

    fn oauth(sites: &[&str]) -> AuthenticatedCredential {
        credential(
            AuthMethod::OAuth,
            SiteAccess::Sites(sites.iter().map(|s| s.to_string()).collect()),
        )
    }

    #[test]
    fn test_gateway_urls() {
        let router = router(None);
        assert_eq!(
            router.gateway_url(Service::Jira, "abc").unwrap().as_str(),
            "https://api.atlassian.com/ex/jira/abc"
        );
        assert_eq!(
            router
                .gateway_url(Service::Confluence, "abc")
                .unwrap()
                .as_str(),
            "https://api.atlassian.com/ex/confluence/abc/wiki"
        );
    }

    #[test]
    fn test_hint_segment_is_escaped() {
        let url = router(None).gateway_url(Service::Jira, "a/../b").unwrap();
        assert!(url.as_str().starts_with("https://api.atlassian.com/ex/jira/"));
        assert!(!url.as_str().ends_with("/b"));
    }

    #[test]
    fn test_oauth_hint_must_be_accessible() {
        let router = router(None);
        let cred = oauth(&["site-a", "site-b"]);

        let routed = router.route(Service::Jira, &cred, Some("site-b")).unwrap();
        assert_eq!(routed.cloud_id.as_deref(), Some("site-b"));
        assert_eq!(
            routed.base_url.as_str(),
            "https://api.atlassian.com/ex/jira/site-b"
        );

        let err = router
            .route(Service::Jira, &cred, Some("site-z"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CloudIdNotAuthorized);
    }

    #[test]
    fn test_oauth_without_hint_uses_default() {
        let routed = router(Some("site-b"))
            .route(Service::Confluence, &oauth(&["site-a", "site-b"]), None)
            .unwrap();
        assert_eq!(routed.cloud_id.as_deref(), Some("site-b"));
    }

    #[test]
    fn test_oauth_single_site_without_default() {
        let routed = router(None)
            .route(Service::Jira, &oauth(&["only"]), None)
            .unwrap();
        assert_eq!(routed.cloud_id.as_deref(), Some("only"));
    }

    #[test]
    fn test_oauth_several_sites_is_ambiguous() {
        let err = router(None)
            .route(Service::Jira, &oauth(&["a", "b"]), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousCloudSelection);
    }

    #[test]
    fn test_oauth_empty_sites_fall_back_to_default() {
        let router = router(Some("configured"));
        let routed = router.route(Service::Jira, &oauth(&[]), None).unwrap();
        assert_eq!(routed.cloud_id.as_deref(), Some("configured"));

        let err = router
            .route(Service::Jira, &oauth(&[]), Some("other"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CloudIdNotAuthorized);
    }

    #[test]
    fn test_site_bound_credentials_keep_service_url() {
        let router = router(Some("home"));
        let cred = credential(AuthMethod::PersonalAccessToken, SiteAccess::SiteBound);

        let routed = router.route(Service::Jira, &cred, None).unwrap();
        assert_eq!(routed.base_url.as_str(), "https://example.atlassian.net/");

        let routed = router.route(Service::Jira, &cred, Some("home")).unwrap();
        assert_eq!(routed.base_url.as_str(), "https://example.atlassian.net/");
        assert_eq!(routed.cloud_id.as_deref(), Some("home"));

        let err = router
            .route(Service::Jira, &cred, Some("elsewhere"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CloudIdNotAuthorized);
    }

    #[test]
    fn test_unverified_bearer_accepts_any_hint() {
        let router = router(None);
        let cred = credential(AuthMethod::RequestBearer, SiteAccess::Unverified);

        let routed = router.route(Service::Jira, &cred, Some("anything")).unwrap();
        assert_eq!(routed.cloud_id.as_deref(), Some("anything"));

        let routed = router.route(Service::Jira, &cred, None).unwrap();
        assert_eq!(routed.base_url.as_str(), "https://example.atlassian.net/");
        assert!(routed.cloud_id.is_none());
    }
}
