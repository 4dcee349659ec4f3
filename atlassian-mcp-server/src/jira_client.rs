//! Jira client wrapper around gouqi
//!
//! A client is built for each call from its [`RequestContext`], so the
//! credential and base URL of one call can never leak into another.
//! Read operations are retried per the context's retry policy; writes are
//! attempted once.

use crate::auth::credentials::Authorization;
use crate::context::RequestContext;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::tools::retry::{with_retry, RetryPolicy};
use gouqi::issues::{AddComment, EditIssue};
use gouqi::r#async::Jira;
use gouqi::{Comment, CreateIssueLinkInput, Issue, SearchOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound Jira accepts for `maxResults`
pub const MAX_SEARCH_RESULTS: u32 = 100;

/// Jira client bound to one call
pub struct JiraClient {
    client: Jira,
    http: reqwest::Client,
    authorization: Authorization,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

/// Search result wrapper with pagination info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub issues: Vec<IssueInfo>,
    pub total: u64,
    pub start_at: u64,
    pub max_results: u64,
    pub is_last: bool,
}

/// Simplified issue information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueInfo {
    pub key: String,
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub issue_type: String,
    pub status: String,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub reporter: Option<String>,
    pub created: String,
    pub updated: String,
    pub project_key: String,
    pub labels: Vec<String>,
}

/// Issue with its comments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDetails {
    #[serde(flatten)]
    pub issue: IssueInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<CommentInfo>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentInfo {
    pub id: Option<String>,
    pub author: String,
    pub body: String,
    pub created: Option<String>,
}

/// The authenticated user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    /// Cloud account id, or the username on Server/Data Center
    pub account_id: String,
    pub display_name: String,
    pub email_address: Option<String>,
    pub active: bool,
    pub time_zone: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyselfResponse {
    account_id: Option<String>,
    name: Option<String>,
    display_name: Option<String>,
    email_address: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
    time_zone: Option<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionInfo {
    pub id: String,
    pub name: String,
    pub to_status: Option<String>,
}

#[derive(Deserialize)]
struct TransitionsResponse {
    #[serde(default)]
    transitions: Vec<RawTransition>,
}

#[derive(Deserialize)]
struct RawTransition {
    id: String,
    name: String,
    #[serde(default)]
    to: Option<RawStatus>,
}

#[derive(Deserialize)]
struct RawStatus {
    name: String,
}

/// Identifiers of a newly created issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub key: String,
    pub id: String,
    #[serde(rename = "self")]
    pub self_url: Option<String>,
}

/// Where ranked issues are placed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankPosition {
    Before(String),
    After(String),
}

impl RankPosition {
    pub fn describe(&self) -> String {
        match self {
            RankPosition::Before(key) => format!("before {}", key),
            RankPosition::After(key) => format!("after {}", key),
        }
    }
}

/// Body of `POST /rest/agile/1.0/issue/rank`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankRequest {
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_before_issue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_after_issue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_custom_field_id: Option<String>,
}

impl RankRequest {
    pub fn new(
        issues: Vec<String>,
        position: &RankPosition,
        rank_custom_field_id: Option<String>,
    ) -> Self {
        let (rank_before_issue, rank_after_issue) = match position {
            RankPosition::Before(key) => (Some(key.clone()), None),
            RankPosition::After(key) => (None, Some(key.clone())),
        };
        Self {
            issues,
            rank_before_issue,
            rank_after_issue,
            rank_custom_field_id,
        }
    }
}

/// A 204 reply has no body, which gouqi reports as a deserialization error
fn is_empty_reply(err: &gouqi::Error) -> bool {
    let message = err.to_string();
    message.contains("expected value") || message.contains("EOF while parsing")
}

impl JiraClient {
    /// Build a client for the call described by `ctx`
    pub fn for_context(ctx: &RequestContext) -> AtlassianMcpResult<Self> {
        let base_url = ctx.base_url().as_str().trim_end_matches('/').to_string();
        let client = Jira::new(&base_url, ctx.authorization.to_gouqi_credentials())?;

        Ok(Self {
            client,
            http: ctx.http_client()?,
            authorization: ctx.authorization.clone(),
            base_url,
            timeout: ctx.timeout,
            retry: ctx.retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Await a gouqi call under the call timeout
    async fn timed<T, F>(&self, what: &str, call: F) -> AtlassianMcpResult<T>
    where
        F: Future<Output = Result<T, gouqi::Error>>,
    {
        timeout(self.timeout, call)
            .await
            .map_err(|_| AtlassianMcpError::network(format!("Timeout {}", what)))?
            .map_err(AtlassianMcpError::from)
    }

    /// Read a JSON resource, retrying transient failures
    async fn read<T>(&self, api: &str, endpoint: &str, what: &str) -> AtlassianMcpResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        debug!("GET {} {}", api, endpoint);
        with_retry(&self.retry, what, || {
            self.timed(what, self.client.get::<T>(api, endpoint))
        })
        .await
    }

    /// Get the user the credential belongs to
    #[instrument(skip_all)]
    pub async fn get_current_user(&self) -> AtlassianMcpResult<UserInfo> {
        let me: MyselfResponse = self.read("api", "/myself", "getting current user").await?;

        let account_id = me.account_id.or(me.name).ok_or_else(|| {
            AtlassianMcpError::api(None, "Jira returned a user without an account id")
        })?;

        Ok(UserInfo {
            display_name: me.display_name.unwrap_or_else(|| account_id.clone()),
            account_id,
            email_address: me.email_address,
            active: me.active,
            time_zone: me.time_zone,
        })
    }

    /// Get an issue, optionally with its comments
    #[instrument(skip(self))]
    pub async fn get_issue(
        &self,
        issue_key: &str,
        include_comments: bool,
    ) -> AtlassianMcpResult<IssueDetails> {
        let endpoint = if include_comments {
            format!("/issue/{}?expand=renderedFields&fields=*all", issue_key)
        } else {
            format!("/issue/{}", issue_key)
        };

        let issue: Issue = self
            .read("api", &endpoint, &format!("getting issue {}", issue_key))
            .await?;

        let comments = include_comments.then(|| {
            issue
                .comments()
                .map(|c| c.comments.iter().map(convert_comment_info).collect())
                .unwrap_or_default()
        });

        Ok(IssueDetails {
            issue: convert_issue_info(&issue),
            comments,
        })
    }

    /// Search for issues using JQL
    #[instrument(skip(self))]
    pub async fn search_issues_jql(
        &self,
        jql: &str,
        start_at: u32,
        max_results: u32,
    ) -> AtlassianMcpResult<SearchResult> {
        let max_results = max_results.clamp(1, MAX_SEARCH_RESULTS);
        debug!(
            "Searching issues with JQL: '{}', start: {}, max: {}",
            jql, start_at, max_results
        );

        let options = SearchOptions::builder()
            .start_at(start_at as u64)
            .max_results(max_results as u64)
            .build();

        let raw = with_retry(&self.retry, "searching issues", || async {
            let search = self.client.search();
            self.timed("searching issues", search.list(jql, &options))
                .await
        })
        .await?;

        let issues: Vec<IssueInfo> = raw.issues.iter().map(convert_issue_info).collect();
        let is_last = raw
            .is_last_page
            .unwrap_or(raw.start_at + issues.len() as u64 >= raw.total);
        let result = SearchResult {
            is_last,
            issues,
            total: raw.total,
            start_at: raw.start_at,
            max_results: raw.max_results,
        };

        info!(
            "Found {} issues (from {} of {})",
            result.issues.len(),
            result.start_at,
            result.total
        );
        Ok(result)
    }

    /// List the transitions currently available on an issue
    #[instrument(skip(self))]
    pub async fn get_transitions(&self, issue_key: &str) -> AtlassianMcpResult<Vec<TransitionInfo>> {
        let endpoint = format!("/issue/{}/transitions", issue_key);
        let raw: TransitionsResponse = self
            .read("api", &endpoint, &format!("getting transitions of {}", issue_key))
            .await?;

        Ok(raw
            .transitions
            .into_iter()
            .map(|t| TransitionInfo {
                id: t.id,
                name: t.name,
                to_status: t.to.map(|s| s.name),
            })
            .collect())
    }

    /// Create an issue from a complete `fields` object
    #[instrument(skip(self, fields))]
    pub async fn create_issue(
        &self,
        fields: serde_json::Map<String, Value>,
    ) -> AtlassianMcpResult<CreatedIssue> {
        let body = serde_json::json!({ "fields": fields });
        let created: CreatedIssue = self
            .timed(
                "creating issue",
                self.client.post::<CreatedIssue, _>("api", "/issue", body),
            )
            .await?;

        info!("Created issue {}", created.key);
        Ok(created)
    }

    /// Overwrite the given fields of an issue
    #[instrument(skip(self, fields))]
    pub async fn update_issue(
        &self,
        issue_key: &str,
        fields: BTreeMap<String, Value>,
    ) -> AtlassianMcpResult<()> {
        let edit = EditIssue { fields };
        self.timed(
            &format!("updating issue {}", issue_key),
            self.client.issues().update(issue_key, edit),
        )
        .await?;

        info!("Updated issue {}", issue_key);
        Ok(())
    }

    /// Add a comment to an issue
    #[instrument(skip(self, body))]
    pub async fn add_comment(&self, issue_key: &str, body: &str) -> AtlassianMcpResult<CommentInfo> {
        let issues = self.client.issues();
        let comment = self
            .timed(
                &format!("adding comment to {}", issue_key),
                issues.comment(issue_key, AddComment::new(body)),
            )
            .await?;

        info!("Added comment to issue {}", issue_key);
        Ok(convert_comment_info(&comment))
    }

    /// Execute a workflow transition, optionally with a comment
    #[instrument(skip(self, comment))]
    pub async fn transition_issue(
        &self,
        issue_key: &str,
        transition_id: &str,
        comment: Option<&str>,
    ) -> AtlassianMcpResult<()> {
        let mut body = serde_json::json!({ "transition": { "id": transition_id } });
        if let Some(comment) = comment {
            body["update"] = serde_json::json!({
                "comment": [{ "add": { "body": comment } }]
            });
        }

        let endpoint = format!("/issue/{}/transitions", issue_key);
        let call = timeout(
            self.timeout,
            self.client.post::<Value, _>("api", &endpoint, body),
        )
        .await
        .map_err(|_| AtlassianMcpError::network(format!("Timeout transitioning {}", issue_key)))?;

        match call {
            Ok(_) => {}
            Err(e) if is_empty_reply(&e) => {
                debug!("Ignoring deserialization error (204 No Content)");
            }
            Err(e) => return Err(e.into()),
        }

        info!("Transitioned issue {} with transition {}", issue_key, transition_id);
        Ok(())
    }

    /// Link two issues
    #[instrument(skip(self, comment))]
    pub async fn link_issues(
        &self,
        link_type: &str,
        inward_issue: &str,
        outward_issue: &str,
        comment: Option<&str>,
    ) -> AtlassianMcpResult<()> {
        let mut input = CreateIssueLinkInput::new(link_type, inward_issue, outward_issue);
        if let Some(comment) = comment {
            input = input.with_comment(comment);
        }

        match timeout(self.timeout, self.client.issue_links().create(input))
            .await
            .map_err(|_| AtlassianMcpError::network("Timeout linking issues"))?
        {
            Ok(_) => {}
            Err(e) if is_empty_reply(&e) => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            "Linked {} to {} with '{}'",
            inward_issue, outward_issue, link_type
        );
        Ok(())
    }

    /// Rank issues before or after another issue
    ///
    /// A 204 reply is a full success. A 207 body listing successful and
    /// failed issues is a partial success. Any other 2xx body is returned
    /// as Jira sent it.
    #[instrument(skip(self, request))]
    pub async fn rank_issues(
        &self,
        request: &RankRequest,
        position: &RankPosition,
    ) -> AtlassianMcpResult<Value> {
        let url = format!("{}/rest/agile/1.0/issue/rank", self.base_url);
        let reply = with_retry(&self.retry, "ranking issues", || self.send_rank(&url, request))
            .await?;

        Ok(match reply {
            RankReply::Ranked => serde_json::json!({
                "success": true,
                "message": format!("Successfully ranked issues: {}", request.issues.join(", ")),
                "issues": request.issues,
                "rank_position": position.describe(),
            }),
            RankReply::Partial(body) => partial_rank_result(body, position),
            RankReply::Body(body) => body,
        })
    }

    async fn send_rank(&self, url: &str, request: &RankRequest) -> AtlassianMcpResult<RankReply> {
        let response = self
            .authorization
            .apply(self.http.post(url))
            .header(http::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Jira rank error ({status}): {error_text}");
            return Err(AtlassianMcpError::from_status(
                status.as_u16(),
                format!("Jira API error: {}", error_text),
            ));
        }

        let text = response.text().await?;
        match status.as_u16() {
            204 => Ok(RankReply::Ranked),
            207 => Ok(RankReply::Partial(parse_rank_body(&text)?)),
            _ if text.trim().is_empty() => Ok(RankReply::Ranked),
            _ => Ok(RankReply::Body(parse_rank_body(&text)?)),
        }
    }
}

enum RankReply {
    Ranked,
    Partial(Value),
    Body(Value),
}

fn parse_rank_body(text: &str) -> AtlassianMcpResult<Value> {
    serde_json::from_str(text)
        .map_err(|e| AtlassianMcpError::api(None, format!("Unexpected rank response: {}", e)))
}

fn partial_rank_result(mut body: Value, position: &RankPosition) -> Value {
    let count = |field: &str| {
        body.get(field)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    };
    let succeeded = count("successfulIssues");
    let failed = count("failedIssues");
    if failed == 0 {
        warn!("Rank returned 207 without failed issues");
    }

    if let Some(object) = body.as_object_mut() {
        object.insert("success".to_string(), Value::Bool(false));
        object.insert("partial_success".to_string(), Value::Bool(true));
        object.insert(
            "message".to_string(),
            Value::String(format!(
                "Partially successful: {} issues ranked, {} issues failed",
                succeeded, failed
            )),
        );
        object.insert(
            "rank_position".to_string(),
            Value::String(position.describe()),
        );
    }
    body
}

fn convert_issue_info(issue: &Issue) -> IssueInfo {
    IssueInfo {
        key: issue.key.clone(),
        id: issue.id.clone(),
        summary: issue.summary().unwrap_or_default(),
        description: issue.description(),
        issue_type: issue
            .issue_type()
            .map(|it| it.name.clone())
            .unwrap_or_default(),
        status: issue.status().map(|s| s.name.clone()).unwrap_or_default(),
        priority: issue.priority().map(|p| p.name.clone()),
        assignee: issue.assignee().map(|u| u.display_name.clone()),
        reporter: issue.reporter().map(|u| u.display_name.clone()),
        created: issue.created().map(|dt| dt.to_string()).unwrap_or_default(),
        updated: issue.updated().map(|dt| dt.to_string()).unwrap_or_default(),
        project_key: issue.project().map(|p| p.key.clone()).unwrap_or_default(),
        labels: issue.labels(),
    }
}

fn convert_comment_info(comment: &Comment) -> CommentInfo {
    CommentInfo {
        id: comment.id.clone(),
        author: comment
            .author
            .as_ref()
            .map(|u| u.display_name.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        body: comment.body.to_string(),
        created: comment.created.as_ref().map(|dt| dt.to_string()),
    }
}
