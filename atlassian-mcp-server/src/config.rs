//! Configuration management for the Atlassian MCP Server
//!
//! Builds the process-wide [`ServerAuthConfig`] once at startup from an
//! optional TOML file and environment variables. The result is shared as an
//! `Arc` and never mutated afterwards.

use crate::tools::catalog::{self, Service};
use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

/// Default Atlassian OAuth token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://auth.atlassian.com/oauth/token";

/// Default Atlassian API gateway used for cloud-id routed requests
pub const DEFAULT_API_GATEWAY: &str = "https://api.atlassian.com";

/// Upper bound for the retry budget of downstream calls
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Config files tried in order; the first one that exists is used
pub const CONFIG_FILE_CANDIDATES: [&str; 2] = [
    "config/atlassian-mcp-config.toml",
    "atlassian-mcp-config.toml",
];

/// Process-wide authentication and tool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerAuthConfig {
    /// Jira service (absent when JIRA_URL is not configured)
    pub jira: Option<ServiceConfig>,

    /// Confluence service (absent when CONFLUENCE_URL is not configured)
    pub confluence: Option<ServiceConfig>,

    /// OAuth 2.0 (3LO) client for the default account
    pub oauth: Option<OAuthClientConfig>,

    /// Disable every mutating tool
    pub read_only: bool,

    /// Allow-list of tool names; when present, everything else is hidden
    pub enabled_tools: Option<BTreeSet<String>>,

    /// Deny-list of tool names, ignored when an allow-list is configured
    pub disabled_tools: BTreeSet<String>,

    /// Timeout for downstream HTTP calls in seconds (default: 30)
    pub request_timeout_seconds: u64,

    /// Bounded retry attempts for retryable downstream failures (default: 3)
    pub max_retries: u32,
}

/// Connection settings for one Atlassian service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the site (e.g. https://example.atlassian.net)
    pub url: Url,

    /// Username (email on Cloud) for API token authentication
    #[serde(default)]
    pub username: Option<String>,

    /// API token paired with `username`
    #[serde(default)]
    pub api_token: Option<SecretString>,

    /// Personal Access Token (Server/Data Center)
    #[serde(default)]
    pub personal_token: Option<SecretString>,

    /// Verify TLS certificates (default: true)
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
}

/// OAuth client parameters for the default account
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,

    pub client_secret: SecretString,

    #[serde(default)]
    pub redirect_uri: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,

    /// Default cloud id used when a call carries no cloud-id hint
    #[serde(default)]
    pub cloud_id: Option<String>,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_api_gateway")]
    pub api_gateway: String,

    /// Directory holding persisted token state
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,
}

impl Default for ServerAuthConfig {
    fn default() -> Self {
        Self {
            jira: None,
            confluence: None,
            oauth: None,
            read_only: false,
            enabled_tools: None,
            disabled_tools: BTreeSet::new(),
            request_timeout_seconds: 30,
            max_retries: 3,
        }
    }
}

impl ServiceConfig {
    /// Create a service config with only a base URL
    pub fn new(url: Url) -> Self {
        Self {
            url,
            username: None,
            api_token: None,
            personal_token: None,
            ssl_verify: true,
        }
    }

    /// Whether the URL points at an Atlassian Cloud site
    pub fn is_cloud(&self) -> bool {
        self.url
            .host_str()
            .map(|host| host.ends_with(".atlassian.net") || host.ends_with(".jira.com"))
            .unwrap_or(false)
    }
}

impl OAuthClientConfig {
    /// Create an OAuth client config with default endpoints
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: None,
            scope: None,
            cloud_id: None,
            token_url: default_token_url(),
            api_gateway: default_api_gateway(),
            token_dir: default_token_dir(),
        }
    }

    /// The account key under which token state is stored
    pub fn account(&self) -> &str {
        &self.client_id
    }
}

impl ServerAuthConfig {
    /// Load configuration from environment variables, TOML file, and defaults
    /// Priority: env vars > TOML file > defaults
    pub fn load() -> Result<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::load_with(&CONFIG_FILE_CANDIDATES.map(PathBuf::from), &vars)
    }

    /// Load from the first existing file among `candidates`, then overlay `vars`
    ///
    /// A file that exists but cannot be read or parsed is an error.
    pub fn load_with(candidates: &[PathBuf], vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = match candidates.iter().find(|path| path.is_file()) {
            Some(path) => {
                let config = Self::load_from_file(path)?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => {
                debug!("No TOML configuration file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_vars(vars)?;
        config.validate()?;

        Ok(config)
    }

    /// Build configuration from environment-shaped key/value input only
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        config.apply_vars(vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Overlay environment-shaped variables on top of the current values
    fn apply_vars(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        self.jira = Self::service_from_vars(self.jira.take(), "JIRA", &get)?;
        self.confluence = Self::service_from_vars(self.confluence.take(), "CONFLUENCE", &get)?;

        if let Some(client_id) = get("ATLASSIAN_OAUTH_CLIENT_ID") {
            let client_secret = get("ATLASSIAN_OAUTH_CLIENT_SECRET")
                .context("ATLASSIAN_OAUTH_CLIENT_SECRET required when ATLASSIAN_OAUTH_CLIENT_ID is set")?;
            let mut oauth = OAuthClientConfig::new(client_id, SecretString::from(client_secret));
            if let Some(existing) = self.oauth.take() {
                oauth.redirect_uri = existing.redirect_uri;
                oauth.scope = existing.scope;
                oauth.cloud_id = existing.cloud_id;
                oauth.token_url = existing.token_url;
                oauth.api_gateway = existing.api_gateway;
                oauth.token_dir = existing.token_dir;
            }
            self.oauth = Some(oauth);
            debug!("Configured OAuth client from environment");
        }

        if let Some(oauth) = self.oauth.as_mut() {
            if let Some(redirect_uri) = get("ATLASSIAN_OAUTH_REDIRECT_URI") {
                oauth.redirect_uri = Some(redirect_uri);
            }
            if let Some(scope) = get("ATLASSIAN_OAUTH_SCOPE") {
                oauth.scope = Some(scope);
            }
            if let Some(cloud_id) = get("ATLASSIAN_OAUTH_CLOUD_ID") {
                oauth.cloud_id = Some(cloud_id);
            }
            if let Some(dir) = get("ATLASSIAN_OAUTH_TOKEN_DIR") {
                oauth.token_dir = PathBuf::from(dir);
            }
        }

        if let Some(read_only) = get("READ_ONLY_MODE") {
            self.read_only = is_truthy(&read_only);
            debug!("Set read-only mode to {} from environment", self.read_only);
        }

        if let Some(enabled) = get("ENABLED_TOOLS") {
            self.enabled_tools = Some(parse_tool_list(&enabled));
        }

        if let Some(disabled) = get("DISABLED_TOOLS") {
            self.disabled_tools = parse_tool_list(&disabled);
        }

        if let Some(timeout) = get("ATLASSIAN_REQUEST_TIMEOUT") {
            if let Ok(timeout_seconds) = timeout.parse::<u64>() {
                self.request_timeout_seconds = timeout_seconds;
                debug!(
                    "Set request timeout to {} seconds from environment",
                    timeout_seconds
                );
            } else {
                warn!("Ignoring non-numeric ATLASSIAN_REQUEST_TIMEOUT: {}", timeout);
            }
        }

        if let Some(retries) = get("ATLASSIAN_MAX_RETRIES") {
            if let Ok(max_retries) = retries.parse::<u32>() {
                self.max_retries = max_retries;
                debug!("Set max retries to {} from environment", max_retries);
            } else {
                warn!("Ignoring non-numeric ATLASSIAN_MAX_RETRIES: {}", retries);
            }
        }

        Ok(())
    }

    /// Build one service section from `<PREFIX>_*` variables
    fn service_from_vars(
        existing: Option<ServiceConfig>,
        prefix: &str,
        get: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Option<ServiceConfig>> {
        let mut service = match get(&format!("{prefix}_URL")) {
            Some(raw) => {
                let url = Url::parse(&raw)
                    .with_context(|| format!("{prefix}_URL is not a valid URL: {raw}"))?;
                debug!("Loaded {}_URL from environment", prefix);
                match existing {
                    Some(mut existing) => {
                        existing.url = url;
                        existing
                    }
                    None => ServiceConfig::new(url),
                }
            }
            None => match existing {
                Some(existing) => existing,
                None => return Ok(None),
            },
        };

        if let Some(username) = get(&format!("{prefix}_USERNAME")) {
            service.username = Some(username);
        }
        if let Some(token) = get(&format!("{prefix}_API_TOKEN")) {
            service.api_token = Some(SecretString::from(token));
        }
        if let Some(token) = get(&format!("{prefix}_PERSONAL_TOKEN")) {
            service.personal_token = Some(SecretString::from(token));
        }
        if let Some(verify) = get(&format!("{prefix}_SSL_VERIFY")) {
            service.ssl_verify = is_truthy(&verify);
        }

        Ok(Some(service))
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        for (name, service) in [("Jira", &self.jira), ("Confluence", &self.confluence)] {
            let Some(service) = service else { continue };

            if service.url.scheme() != "http" && service.url.scheme() != "https" {
                return Err(anyhow::anyhow!(
                    "{} URL must start with http:// or https://. Got: {}",
                    name,
                    service.url
                ));
            }

            match (&service.username, &service.api_token) {
                (Some(_), None) => {
                    return Err(anyhow::anyhow!(
                        "{} username is set but the API token is missing",
                        name
                    ))
                }
                (None, Some(_)) => {
                    return Err(anyhow::anyhow!(
                        "{} API token is set but the username is missing",
                        name
                    ))
                }
                _ => {}
            }

            if !service.ssl_verify {
                warn!("{} TLS verification is disabled", name);
            }
        }

        if let Some(oauth) = &self.oauth {
            if oauth.client_id.trim().is_empty() {
                return Err(anyhow::anyhow!("OAuth client id cannot be empty"));
            }
            for (label, raw) in [
                ("token URL", &oauth.token_url),
                ("API gateway", &oauth.api_gateway),
            ] {
                Url::parse(raw)
                    .with_context(|| format!("OAuth {} is not a valid URL: {}", label, raw))?;
            }
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("request timeout must be at least 1 second"));
        }

        for name in self.unknown_tool_names() {
            warn!("Tool list names unknown tool '{}'; it is ignored", name);
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(anyhow::anyhow!(
                "max_retries cannot exceed {}",
                MAX_RETRIES_LIMIT
            ));
        }

        if self.jira.is_none() && self.confluence.is_none() {
            warn!("Neither JIRA_URL nor CONFLUENCE_URL is set; no tools will be available");
        }

        if self.read_only {
            info!("Read-only mode is active; mutating tools are blocked");
        }

        info!("Configuration validation successful");
        Ok(())
    }

    /// Names in the enable or disable list that are not catalog tools
    pub fn unknown_tool_names(&self) -> Vec<&str> {
        self.enabled_tools
            .iter()
            .flatten()
            .chain(self.disabled_tools.iter())
            .map(String::as_str)
            .filter(|name| catalog::find(name).is_none())
            .collect()
    }

    /// Get the configuration of one service, if enabled
    pub fn service(&self, service: Service) -> Option<&ServiceConfig> {
        match service {
            Service::Jira => self.jira.as_ref(),
            Service::Confluence => self.confluence.as_ref(),
        }
    }

    /// The default cloud id, if one is configured
    pub fn default_cloud_id(&self) -> Option<&str> {
        self.oauth.as_ref().and_then(|o| o.cloud_id.as_deref())
    }
}

/// Parse a truthy flag value
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "on"
    )
}

/// Parse a comma-separated tool name list
fn parse_tool_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_api_gateway() -> String {
    DEFAULT_API_GATEWAY.to_string()
}

fn default_token_dir() -> PathBuf {
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".atlassian-mcp")
}
