//! Jira tool bodies
//!
//! Each tool parses its arguments, validates them, and runs against a
//! [`JiraClient`] built from the call's context.

use crate::context::RequestContext;
use crate::dispatcher::{Dispatcher, ToolBody};
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::jira_client::{JiraClient, RankPosition, RankRequest};
use crate::tools::catalog::{
    JIRA_ADD_COMMENT, JIRA_CREATE_ISSUE, JIRA_GET_ISSUE, JIRA_GET_TRANSITIONS,
    JIRA_GET_USER_PROFILE, JIRA_LINK_ISSUES, JIRA_RANK_ISSUES, JIRA_SEARCH,
    JIRA_TRANSITION_ISSUE, JIRA_UPDATE_ISSUE,
};
use crate::tools::{parse_params, require_non_empty};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Default page size for `jira_search`
pub const DEFAULT_SEARCH_LIMIT: u32 = 50;

/// Parameters for jira_get_user_profile (none)
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GetUserProfileParams {}

/// Parameters for jira_get_issue
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetIssueParams {
    /// Issue key, e.g. "PROJ-123"
    pub issue_key: String,

    /// Include the issue's comments (default: false)
    #[serde(default)]
    pub include_comments: Option<bool>,
}

/// Parameters for jira_search
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// JQL query, e.g. `project = PROJ AND status = "In Progress"`
    pub jql: String,

    /// Index of the first result (default: 0)
    #[serde(default)]
    pub start_at: Option<u32>,

    /// Page size, 1 to 100 (default: 50)
    #[serde(default)]
    pub max_results: Option<u32>,
}

/// Parameters for jira_get_transitions
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetTransitionsParams {
    /// Issue key, e.g. "PROJ-123"
    pub issue_key: String,
}

/// Parameters for jira_create_issue
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateIssueParams {
    /// Key of the project to create the issue in
    pub project_key: String,

    pub summary: String,

    /// Issue type name, e.g. "Task", "Bug", "Story"
    pub issue_type: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Account id (Cloud) or username (Server/DC) of the assignee
    #[serde(default)]
    pub assignee: Option<String>,

    /// Priority name, e.g. "High"
    #[serde(default)]
    pub priority: Option<String>,

    #[serde(default)]
    pub labels: Option<Vec<String>>,

    /// Extra fields passed through verbatim, e.g. {"customfield_10010": 5}
    #[serde(default)]
    pub additional_fields: Option<Map<String, Value>>,
}

/// Parameters for jira_update_issue
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateIssueParams {
    /// Issue key, e.g. "PROJ-123"
    pub issue_key: String,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Replaces all labels
    #[serde(default)]
    pub labels: Option<Vec<String>>,

    #[serde(default)]
    pub priority: Option<String>,

    /// Extra fields passed through verbatim
    #[serde(default)]
    pub additional_fields: Option<Map<String, Value>>,
}

/// Parameters for jira_add_comment
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddCommentParams {
    /// Issue key, e.g. "PROJ-123"
    pub issue_key: String,

    /// Comment text
    pub body: String,
}

/// Parameters for jira_transition_issue
///
/// Give either `transition_id` or `transition_name`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransitionIssueParams {
    /// Issue key, e.g. "PROJ-123"
    pub issue_key: String,

    /// Transition id from jira_get_transitions
    #[serde(default)]
    pub transition_id: Option<String>,

    /// Transition name, matched case-insensitively, e.g. "Done"
    #[serde(default)]
    pub transition_name: Option<String>,

    /// Comment added with the transition
    #[serde(default)]
    pub comment: Option<String>,
}

/// Parameters for jira_link_issues
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LinkIssuesParams {
    /// Link type name, e.g. "Blocks", "Relates", "Duplicate"
    pub link_type: String,

    /// Inward side of the link, e.g. the blocked issue for "Blocks"
    pub inward_issue_key: String,

    /// Outward side of the link
    pub outward_issue_key: String,

    #[serde(default)]
    pub comment: Option<String>,
}

/// Parameters for jira_rank_issues
///
/// Exactly one of `rank_before` or `rank_after` is required.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RankIssuesParams {
    /// Issues to move, in the order they should end up
    pub issues: Vec<String>,

    /// Place the issues before this issue
    #[serde(default)]
    pub rank_before: Option<String>,

    /// Place the issues after this issue
    #[serde(default)]
    pub rank_after: Option<String>,

    /// Rank field id on Server/DC instances with a custom rank field,
    /// e.g. "customfield_10019"
    #[serde(default)]
    pub rank_custom_field_id: Option<String>,
}

/// Check the `PROJECT-123` shape of an issue key
pub fn validate_issue_key(parameter: &str, key: &str) -> AtlassianMcpResult<()> {
    let valid = key.split_once('-').is_some_and(|(project, number)| {
        !project.is_empty()
            && project
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !number.is_empty()
            && number.chars().all(|c| c.is_ascii_digit())
    });

    if valid {
        Ok(())
    } else {
        Err(AtlassianMcpError::invalid_param(
            parameter,
            format!("'{}' is not an issue key like PROJ-123", key),
        ))
    }
}

impl RankIssuesParams {
    /// Validate and split into the request and its position
    pub fn into_request(self) -> AtlassianMcpResult<(RankRequest, RankPosition)> {
        if self.issues.is_empty() {
            return Err(AtlassianMcpError::invalid_param(
                "issues",
                "At least one issue key must be provided",
            ));
        }
        for key in &self.issues {
            validate_issue_key("issues", key)?;
        }

        let position = match (self.rank_before, self.rank_after) {
            (Some(before), None) => RankPosition::Before(before),
            (None, Some(after)) => RankPosition::After(after),
            _ => {
                return Err(AtlassianMcpError::invalid_param(
                    "rank_before",
                    "Exactly one of rank_before or rank_after must be provided",
                ))
            }
        };
        match &position {
            RankPosition::Before(key) => validate_issue_key("rank_before", key)?,
            RankPosition::After(key) => validate_issue_key("rank_after", key)?,
        }

        let request = RankRequest::new(self.issues, &position, self.rank_custom_field_id);
        Ok((request, position))
    }
}

impl CreateIssueParams {
    /// Build the `fields` object of the create request
    pub fn into_fields(self) -> AtlassianMcpResult<Map<String, Value>> {
        require_non_empty("project_key", &self.project_key)?;
        require_non_empty("summary", &self.summary)?;
        require_non_empty("issue_type", &self.issue_type)?;

        let mut fields = self.additional_fields.unwrap_or_default();
        fields.insert("project".to_string(), json!({ "key": self.project_key }));
        fields.insert("summary".to_string(), json!(self.summary));
        fields.insert("issuetype".to_string(), json!({ "name": self.issue_type }));
        if let Some(description) = self.description {
            fields.insert("description".to_string(), json!(description));
        }
        if let Some(assignee) = self.assignee {
            fields.insert("assignee".to_string(), assignee_value(&assignee));
        }
        if let Some(priority) = self.priority {
            fields.insert("priority".to_string(), json!({ "name": priority }));
        }
        if let Some(labels) = self.labels {
            fields.insert("labels".to_string(), json!(labels));
        }
        Ok(fields)
    }
}

impl UpdateIssueParams {
    /// Build the edited fields, failing when nothing would change
    pub fn into_fields(self) -> AtlassianMcpResult<BTreeMap<String, Value>> {
        let mut fields: BTreeMap<String, Value> = self
            .additional_fields
            .unwrap_or_default()
            .into_iter()
            .collect();
        if let Some(summary) = self.summary {
            require_non_empty("summary", &summary)?;
            fields.insert("summary".to_string(), json!(summary));
        }
        if let Some(description) = self.description {
            fields.insert("description".to_string(), json!(description));
        }
        if let Some(labels) = self.labels {
            fields.insert("labels".to_string(), json!(labels));
        }
        if let Some(priority) = self.priority {
            fields.insert("priority".to_string(), json!({ "name": priority }));
        }

        if fields.is_empty() {
            return Err(AtlassianMcpError::invalid_param(
                "fields",
                "Provide at least one field to update",
            ));
        }
        Ok(fields)
    }
}

/// Account ids on Cloud look like `557058:...` or 24+ hex characters;
/// anything else is treated as a Server/DC username
fn assignee_value(assignee: &str) -> Value {
    let looks_like_account_id =
        assignee.contains(':') || (assignee.len() >= 24 && assignee.chars().all(|c| c.is_ascii_hexdigit()));
    if looks_like_account_id {
        json!({ "accountId": assignee })
    } else {
        json!({ "name": assignee })
    }
}

pub struct GetUserProfileTool;

#[async_trait]
impl ToolBody for GetUserProfileTool {
    async fn execute(&self, ctx: &RequestContext, _arguments: Value) -> AtlassianMcpResult<Value> {
        let user = JiraClient::for_context(ctx)?.get_current_user().await?;
        Ok(serde_json::to_value(user)?)
    }
}

pub struct GetIssueTool;

#[async_trait]
impl ToolBody for GetIssueTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: GetIssueParams = parse_params(arguments)?;
        validate_issue_key("issue_key", &params.issue_key)?;

        let details = JiraClient::for_context(ctx)?
            .get_issue(&params.issue_key, params.include_comments.unwrap_or(false))
            .await?;
        Ok(serde_json::to_value(details)?)
    }
}

pub struct SearchTool;

#[async_trait]
impl ToolBody for SearchTool {
    #[instrument(skip_all)]
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: SearchParams = parse_params(arguments)?;
        require_non_empty("jql", &params.jql)?;

        let result = JiraClient::for_context(ctx)?
            .search_issues_jql(
                &params.jql,
                params.start_at.unwrap_or(0),
                params.max_results.unwrap_or(DEFAULT_SEARCH_LIMIT),
            )
            .await?;
        Ok(serde_json::to_value(result)?)
    }
}

pub struct GetTransitionsTool;

#[async_trait]
impl ToolBody for GetTransitionsTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: GetTransitionsParams = parse_params(arguments)?;
        validate_issue_key("issue_key", &params.issue_key)?;

        let transitions = JiraClient::for_context(ctx)?
            .get_transitions(&params.issue_key)
            .await?;
        Ok(json!({
            "issue_key": params.issue_key,
            "transitions": transitions,
        }))
    }
}

pub struct CreateIssueTool;

#[async_trait]
impl ToolBody for CreateIssueTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: CreateIssueParams = parse_params(arguments)?;
        let fields = params.into_fields()?;

        let created = JiraClient::for_context(ctx)?.create_issue(fields).await?;
        Ok(json!({
            "success": true,
            "issue_key": created.key,
            "issue_id": created.id,
            "self": created.self_url,
        }))
    }
}

pub struct UpdateIssueTool;

#[async_trait]
impl ToolBody for UpdateIssueTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: UpdateIssueParams = parse_params(arguments)?;
        validate_issue_key("issue_key", &params.issue_key)?;
        let issue_key = params.issue_key.clone();
        let fields = params.into_fields()?;
        let updated: Vec<String> = fields.keys().cloned().collect();

        JiraClient::for_context(ctx)?
            .update_issue(&issue_key, fields)
            .await?;
        Ok(json!({
            "success": true,
            "issue_key": issue_key,
            "updated_fields": updated,
        }))
    }
}

pub struct AddCommentTool;

#[async_trait]
impl ToolBody for AddCommentTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: AddCommentParams = parse_params(arguments)?;
        validate_issue_key("issue_key", &params.issue_key)?;
        require_non_empty("body", &params.body)?;

        let comment = JiraClient::for_context(ctx)?
            .add_comment(&params.issue_key, &params.body)
            .await?;
        Ok(json!({
            "success": true,
            "issue_key": params.issue_key,
            "comment": comment,
        }))
    }
}

pub struct TransitionIssueTool;

#[async_trait]
impl ToolBody for TransitionIssueTool {
    #[instrument(skip_all)]
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: TransitionIssueParams = parse_params(arguments)?;
        validate_issue_key("issue_key", &params.issue_key)?;

        let client = JiraClient::for_context(ctx)?;
        let transition_id = match (&params.transition_id, &params.transition_name) {
            (Some(id), _) => id.clone(),
            (None, Some(name)) => {
                let available = client.get_transitions(&params.issue_key).await?;
                available
                    .iter()
                    .find(|t| {
                        t.name.eq_ignore_ascii_case(name)
                            || t
                                .to_status
                                .as_deref()
                                .is_some_and(|s| s.eq_ignore_ascii_case(name))
                    })
                    .map(|t| t.id.clone())
                    .ok_or_else(|| {
                        let names: Vec<&str> = available.iter().map(|t| t.name.as_str()).collect();
                        AtlassianMcpError::invalid_param(
                            "transition_name",
                            format!(
                                "No transition '{}' on {}; available: {}",
                                name,
                                params.issue_key,
                                names.join(", ")
                            ),
                        )
                    })?
            }
            (None, None) => {
                return Err(AtlassianMcpError::invalid_param(
                    "transition_id",
                    "Provide transition_id or transition_name",
                ))
            }
        };

        client
            .transition_issue(&params.issue_key, &transition_id, params.comment.as_deref())
            .await?;

        info!("Transitioned {} via {}", params.issue_key, transition_id);
        Ok(json!({
            "success": true,
            "issue_key": params.issue_key,
            "transition_id": transition_id,
        }))
    }
}

pub struct LinkIssuesTool;

#[async_trait]
impl ToolBody for LinkIssuesTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: LinkIssuesParams = parse_params(arguments)?;
        require_non_empty("link_type", &params.link_type)?;
        validate_issue_key("inward_issue_key", &params.inward_issue_key)?;
        validate_issue_key("outward_issue_key", &params.outward_issue_key)?;
        if params.inward_issue_key == params.outward_issue_key {
            return Err(AtlassianMcpError::invalid_param(
                "outward_issue_key",
                "Cannot link an issue to itself",
            ));
        }

        JiraClient::for_context(ctx)?
            .link_issues(
                &params.link_type,
                &params.inward_issue_key,
                &params.outward_issue_key,
                params.comment.as_deref(),
            )
            .await?;

        Ok(json!({
            "success": true,
            "inward_issue": params.inward_issue_key,
            "outward_issue": params.outward_issue_key,
            "link_type": params.link_type,
        }))
    }
}

pub struct RankIssuesTool;

#[async_trait]
impl ToolBody for RankIssuesTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: RankIssuesParams = parse_params(arguments)?;
        let (request, position) = params.into_request()?;

        JiraClient::for_context(ctx)?
            .rank_issues(&request, &position)
            .await
    }
}

/// Register every Jira tool body
pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register(JIRA_GET_USER_PROFILE, Arc::new(GetUserProfileTool));
    dispatcher.register(JIRA_GET_ISSUE, Arc::new(GetIssueTool));
    dispatcher.register(JIRA_SEARCH, Arc::new(SearchTool));
    dispatcher.register(JIRA_GET_TRANSITIONS, Arc::new(GetTransitionsTool));
    dispatcher.register(JIRA_CREATE_ISSUE, Arc::new(CreateIssueTool));
    dispatcher.register(JIRA_UPDATE_ISSUE, Arc::new(UpdateIssueTool));
    dispatcher.register(JIRA_ADD_COMMENT, Arc::new(AddCommentTool));
    dispatcher.register(JIRA_TRANSITION_ISSUE, Arc::new(TransitionIssueTool));
    dispatcher.register(JIRA_LINK_ISSUES, Arc::new(LinkIssuesTool));
    dispatcher.register(JIRA_RANK_ISSUES, Arc::new(RankIssuesTool));
}
