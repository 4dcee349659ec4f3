//! Tools module for the Atlassian MCP Server
//!
//! The catalog and availability gate describe every tool; `jira` and
//! `confluence` hold their implementations.

pub mod catalog;
pub mod confluence;
pub mod gate;
pub mod jira;
pub mod retry;

use crate::dispatcher::Dispatcher;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use confluence::{
    AddLabelParams, ConfluenceSearchParams, CreatePageParams, GetPageParams, PageIdParams,
    UpdatePageParams,
};
pub use jira::{
    AddCommentParams, CreateIssueParams, GetIssueParams, GetTransitionsParams,
    GetUserProfileParams, LinkIssuesParams, RankIssuesParams, SearchParams,
    TransitionIssueParams, UpdateIssueParams,
};

/// Decode tool arguments, treating a missing argument object as empty
pub fn parse_params<T: DeserializeOwned>(arguments: Value) -> AtlassianMcpResult<T> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| AtlassianMcpError::invalid_param("arguments", e.to_string()))
}

pub(crate) fn require_non_empty(parameter: &str, value: &str) -> AtlassianMcpResult<()> {
    if value.trim().is_empty() {
        Err(AtlassianMcpError::invalid_param(
            parameter,
            "must not be empty",
        ))
    } else {
        Ok(())
    }
}

/// Register the implementation of every catalog tool
pub fn register_all(dispatcher: &mut Dispatcher) {
    jira::register(dispatcher);
    confluence::register(dispatcher);
}
