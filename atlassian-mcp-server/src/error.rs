//! Error types and handling for the Atlassian MCP Server
//!
//! Provides structured error types that map to MCP JSON-RPC error codes
//! and converts various error types from dependencies into MCP-compatible errors.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Machine-readable error kind reported to MCP callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Configuration,
    NoCredentialsAvailable,
    InvalidRequest,
    OAuthRefreshFailed,
    CloudIdNotAuthorized,
    AmbiguousCloudSelection,
    ToolUnavailable,
    DownstreamNetworkError,
    DownstreamApiError,
    InvalidParameter,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "Configuration",
            ErrorKind::NoCredentialsAvailable => "NoCredentialsAvailable",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::OAuthRefreshFailed => "OAuthRefreshFailed",
            ErrorKind::CloudIdNotAuthorized => "CloudIdNotAuthorized",
            ErrorKind::AmbiguousCloudSelection => "AmbiguousCloudSelection",
            ErrorKind::ToolUnavailable => "ToolUnavailable",
            ErrorKind::DownstreamNetworkError => "DownstreamNetworkError",
            ErrorKind::DownstreamApiError => "DownstreamApiError",
            ErrorKind::InvalidParameter => "InvalidParameter",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom error types for the Atlassian MCP Server
#[derive(Debug, Clone, Error)]
pub enum AtlassianMcpError {
    /// Configuration errors (-32001)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// No usable credential for the call (-32002)
    #[error("No credentials available for {service}: configure server credentials or send an Authorization header")]
    NoCredentialsAvailable { service: String },

    /// Malformed per-request authorization (-32602)
    #[error("Invalid Authorization header: {message}")]
    InvalidAuthorizationHeader { message: String },

    /// OAuth refresh token rejected or missing (-32002)
    #[error("OAuth refresh failed for account '{account}': {reason}")]
    OAuthRefreshFailed { account: String, reason: String },

    /// Cloud id hint not accessible to the credential (-32008)
    #[error("Cloud id '{cloud_id}' is not authorized for this credential")]
    CloudIdNotAuthorized { cloud_id: String },

    /// No cloud id hint, no default, and not exactly one accessible site (-32008)
    #[error("Cannot select an Atlassian site: {message}")]
    AmbiguousCloudSelection { message: String },

    /// Tool hidden or blocked by configuration (-32009)
    #[error("Tool '{tool}' is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// Transient I/O failure talking to Atlassian or the token endpoint (-32003)
    #[error("Network error: {message}")]
    DownstreamNetwork { message: String },

    /// Structured failure returned by the remote API (-32004)
    #[error("Atlassian API error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    DownstreamApi { status: Option<u16>, message: String },

    /// Invalid parameter errors (-32006)
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Internal server errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AtlassianMcpError {
    /// Get the machine-readable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AtlassianMcpError::Configuration { .. } => ErrorKind::Configuration,
            AtlassianMcpError::NoCredentialsAvailable { .. } => ErrorKind::NoCredentialsAvailable,
            AtlassianMcpError::InvalidAuthorizationHeader { .. } => ErrorKind::InvalidRequest,
            AtlassianMcpError::OAuthRefreshFailed { .. } => ErrorKind::OAuthRefreshFailed,
            AtlassianMcpError::CloudIdNotAuthorized { .. } => ErrorKind::CloudIdNotAuthorized,
            AtlassianMcpError::AmbiguousCloudSelection { .. } => {
                ErrorKind::AmbiguousCloudSelection
            }
            AtlassianMcpError::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            AtlassianMcpError::DownstreamNetwork { .. } => ErrorKind::DownstreamNetworkError,
            AtlassianMcpError::DownstreamApi { .. } => ErrorKind::DownstreamApiError,
            AtlassianMcpError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            AtlassianMcpError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get the MCP JSON-RPC error code for this error
    pub fn error_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => -32001,
            ErrorKind::NoCredentialsAvailable | ErrorKind::OAuthRefreshFailed => -32002,
            ErrorKind::DownstreamNetworkError => -32003,
            ErrorKind::DownstreamApiError => -32004,
            ErrorKind::InvalidParameter => -32006,
            ErrorKind::CloudIdNotAuthorized | ErrorKind::AmbiguousCloudSelection => -32008,
            ErrorKind::ToolUnavailable => -32009,
            ErrorKind::InvalidRequest => -32602,
            ErrorKind::Internal => -32603,
        }
    }

    /// Whether the external collaborator layer may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, AtlassianMcpError::DownstreamNetwork { .. })
    }

    /// Get additional error data for MCP error responses
    pub fn error_data(&self) -> Value {
        let mut data = serde_json::Map::new();
        data.insert("kind".to_string(), Value::String(self.kind().to_string()));
        data.insert("retryable".to_string(), Value::Bool(self.is_retryable()));

        match self {
            AtlassianMcpError::NoCredentialsAvailable { service } => {
                data.insert("service".to_string(), Value::String(service.clone()));
            }
            AtlassianMcpError::OAuthRefreshFailed { account, .. } => {
                data.insert("account".to_string(), Value::String(account.clone()));
            }
            AtlassianMcpError::CloudIdNotAuthorized { cloud_id } => {
                data.insert("cloud_id".to_string(), Value::String(cloud_id.clone()));
            }
            AtlassianMcpError::ToolUnavailable { tool, reason } => {
                data.insert("tool".to_string(), Value::String(tool.clone()));
                data.insert("reason".to_string(), Value::String(reason.clone()));
            }
            AtlassianMcpError::DownstreamApi {
                status: Some(status),
                ..
            } => {
                data.insert("status".to_string(), Value::Number((*status).into()));
            }
            AtlassianMcpError::InvalidParameter { parameter, .. } => {
                data.insert("parameter".to_string(), Value::String(parameter.clone()));
            }
            _ => {}
        }

        Value::Object(data)
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        AtlassianMcpError::Configuration {
            message: message.into(),
        }
    }

    /// Create a "no credentials" error for a service
    pub fn no_credentials(service: impl Into<String>) -> Self {
        AtlassianMcpError::NoCredentialsAvailable {
            service: service.into(),
        }
    }

    /// Create an invalid Authorization header error
    pub fn invalid_auth_header(message: impl Into<String>) -> Self {
        AtlassianMcpError::InvalidAuthorizationHeader {
            message: message.into(),
        }
    }

    /// Create an OAuth refresh failure
    pub fn oauth_refresh_failed(account: impl Into<String>, reason: impl Into<String>) -> Self {
        AtlassianMcpError::OAuthRefreshFailed {
            account: account.into(),
            reason: reason.into(),
        }
    }

    /// Create a cloud id authorization error
    pub fn cloud_id_not_authorized(cloud_id: impl Into<String>) -> Self {
        AtlassianMcpError::CloudIdNotAuthorized {
            cloud_id: cloud_id.into(),
        }
    }

    /// Create an ambiguous cloud selection error
    pub fn ambiguous_cloud(message: impl Into<String>) -> Self {
        AtlassianMcpError::AmbiguousCloudSelection {
            message: message.into(),
        }
    }

    /// Create a tool unavailable error
    pub fn tool_unavailable(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        AtlassianMcpError::ToolUnavailable {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        AtlassianMcpError::DownstreamNetwork {
            message: message.into(),
        }
    }

    /// Create a downstream API error
    pub fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        AtlassianMcpError::DownstreamApi {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_param(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        AtlassianMcpError::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        AtlassianMcpError::Internal {
            message: message.into(),
        }
    }

    /// Classify an HTTP status returned by an Atlassian endpoint
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 | 502 | 503 | 504 => {
                AtlassianMcpError::network(format!("HTTP {}: {}", status, message.into()))
            }
            _ => AtlassianMcpError::api(Some(status), message),
        }
    }
}

/// Convert from gouqi errors to AtlassianMcpError
impl From<gouqi::Error> for AtlassianMcpError {
    fn from(err: gouqi::Error) -> Self {
        match err {
            gouqi::Error::Http(_) => AtlassianMcpError::network(format!("HTTP error: {}", err)),
            gouqi::Error::IO(_) => AtlassianMcpError::network(format!("IO error: {}", err)),
            gouqi::Error::Serde(_) => {
                AtlassianMcpError::internal(format!("Serialization error: {}", err))
            }
            gouqi::Error::Unauthorized => {
                AtlassianMcpError::api(Some(401), "Jira rejected the credentials")
            }
            gouqi::Error::NotFound => AtlassianMcpError::api(Some(404), "Jira resource not found"),
            gouqi::Error::Fault { code, .. } => {
                AtlassianMcpError::from_status(code.as_u16(), format!("Jira API error: {}", err))
            }
            _ => AtlassianMcpError::api(None, format!("Jira client error: {}", err)),
        }
    }
}

/// Convert from reqwest errors
impl From<reqwest::Error> for AtlassianMcpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AtlassianMcpError::network(format!("Request timed out: {}", err))
        } else if let Some(status) = err.status() {
            AtlassianMcpError::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            AtlassianMcpError::internal(format!("Failed to decode response: {}", err))
        } else {
            AtlassianMcpError::network(err.to_string())
        }
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for AtlassianMcpError {
    fn from(err: serde_json::Error) -> Self {
        AtlassianMcpError::internal(format!("JSON error: {}", err))
    }
}

/// Convert from TOML parsing errors
impl From<toml::de::Error> for AtlassianMcpError {
    fn from(err: toml::de::Error) -> Self {
        AtlassianMcpError::config(format!("TOML parsing error: {}", err))
    }
}

/// Result type alias for Atlassian MCP operations
pub type AtlassianMcpResult<T> = Result<T, AtlassianMcpError>;
