//! Confluence tool bodies

use crate::confluence_client::{ConfluenceClient, MAX_CONFLUENCE_LIMIT};
use crate::context::RequestContext;
use crate::dispatcher::{Dispatcher, ToolBody};
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::tools::catalog::{
    CONFLUENCE_ADD_LABEL, CONFLUENCE_CREATE_PAGE, CONFLUENCE_GET_COMMENTS,
    CONFLUENCE_GET_LABELS, CONFLUENCE_GET_PAGE, CONFLUENCE_SEARCH, CONFLUENCE_UPDATE_PAGE,
};
use crate::tools::{parse_params, require_non_empty};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Default number of search hits
pub const DEFAULT_CONFLUENCE_LIMIT: u32 = 10;

/// Parameters for confluence_search
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConfluenceSearchParams {
    /// CQL query or plain text.
    ///
    /// Plain text is wrapped into `siteSearch ~ "..."`.
    /// Examples:
    /// - "space = DEV AND type = page AND title ~ \"release\""
    /// - "onboarding checklist"
    pub query: String,

    /// Maximum results, 1 to 100 (default: 10)
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Parameters for confluence_get_page
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetPageParams {
    /// Numeric page id
    pub page_id: String,

    /// Include the storage-format body (default: true)
    #[serde(default)]
    pub include_body: Option<bool>,
}

/// Parameters for tools that only need a page id
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageIdParams {
    /// Numeric page id
    pub page_id: String,
}

/// Parameters for confluence_create_page
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreatePageParams {
    /// Key of the target space, e.g. "DEV"
    pub space_key: String,

    pub title: String,

    /// Page body in Confluence storage format (XHTML)
    pub content: String,

    /// Id of the parent page
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Parameters for confluence_update_page
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdatePageParams {
    /// Numeric page id
    pub page_id: String,

    /// New title; the current title is kept when omitted
    #[serde(default)]
    pub title: Option<String>,

    /// New body in storage format
    pub content: String,

    /// Message shown in the page history
    #[serde(default)]
    pub version_comment: Option<String>,
}

/// Parameters for confluence_add_label
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddLabelParams {
    /// Numeric page id
    pub page_id: String,

    /// Label name, lowercase without spaces, e.g. "release-notes"
    pub name: String,
}

/// Check that a page id is numeric
pub fn validate_page_id(page_id: &str) -> AtlassianMcpResult<()> {
    if !page_id.is_empty() && page_id.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AtlassianMcpError::invalid_param(
            "page_id",
            format!("'{}' is not a numeric page id", page_id),
        ))
    }
}

/// Turn free text into CQL, leaving queries that already look like CQL alone
pub fn to_cql(query: &str) -> String {
    let query = query.trim();
    let looks_like_cql = ["=", "~", " AND ", " OR ", " ORDER BY "]
        .iter()
        .any(|op| query.contains(op));
    if looks_like_cql {
        query.to_string()
    } else {
        let escaped = query.replace('\\', "\\\\").replace('"', "\\\"");
        format!("siteSearch ~ \"{}\"", escaped)
    }
}

fn validate_label(name: &str) -> AtlassianMcpResult<()> {
    require_non_empty("name", name)?;
    if name.chars().any(char::is_whitespace) {
        return Err(AtlassianMcpError::invalid_param(
            "name",
            "Labels cannot contain whitespace",
        ));
    }
    Ok(())
}

pub struct SearchTool;

#[async_trait]
impl ToolBody for SearchTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: ConfluenceSearchParams = parse_params(arguments)?;
        require_non_empty("query", &params.query)?;
        let limit = params
            .limit
            .unwrap_or(DEFAULT_CONFLUENCE_LIMIT)
            .clamp(1, MAX_CONFLUENCE_LIMIT);
        let cql = to_cql(&params.query);

        let results = ConfluenceClient::for_context(ctx)?.search(&cql, limit).await?;
        Ok(json!({
            "cql": cql,
            "count": results.len(),
            "results": results,
        }))
    }
}

pub struct GetPageTool;

#[async_trait]
impl ToolBody for GetPageTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: GetPageParams = parse_params(arguments)?;
        validate_page_id(&params.page_id)?;

        let page = ConfluenceClient::for_context(ctx)?
            .get_page(&params.page_id, params.include_body.unwrap_or(true))
            .await?;
        Ok(serde_json::to_value(page)?)
    }
}

pub struct GetCommentsTool;

#[async_trait]
impl ToolBody for GetCommentsTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: PageIdParams = parse_params(arguments)?;
        validate_page_id(&params.page_id)?;

        let comments = ConfluenceClient::for_context(ctx)?
            .get_comments(&params.page_id)
            .await?;
        Ok(json!({
            "page_id": params.page_id,
            "comments": comments,
        }))
    }
}

pub struct GetLabelsTool;

#[async_trait]
impl ToolBody for GetLabelsTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: PageIdParams = parse_params(arguments)?;
        validate_page_id(&params.page_id)?;

        let labels = ConfluenceClient::for_context(ctx)?
            .get_labels(&params.page_id)
            .await?;
        Ok(json!({
            "page_id": params.page_id,
            "labels": labels,
        }))
    }
}

pub struct CreatePageTool;

#[async_trait]
impl ToolBody for CreatePageTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: CreatePageParams = parse_params(arguments)?;
        require_non_empty("space_key", &params.space_key)?;
        require_non_empty("title", &params.title)?;
        if let Some(parent_id) = &params.parent_id {
            validate_page_id(parent_id)?;
        }

        let page = ConfluenceClient::for_context(ctx)?
            .create_page(
                &params.space_key,
                &params.title,
                &params.content,
                params.parent_id.as_deref(),
            )
            .await?;
        Ok(json!({ "success": true, "page": page }))
    }
}

pub struct UpdatePageTool;

#[async_trait]
impl ToolBody for UpdatePageTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: UpdatePageParams = parse_params(arguments)?;
        validate_page_id(&params.page_id)?;
        if let Some(title) = &params.title {
            require_non_empty("title", title)?;
        }

        let page = ConfluenceClient::for_context(ctx)?
            .update_page(
                &params.page_id,
                params.title.as_deref(),
                &params.content,
                params.version_comment.as_deref(),
            )
            .await?;
        Ok(json!({ "success": true, "page": page }))
    }
}

pub struct AddLabelTool;

#[async_trait]
impl ToolBody for AddLabelTool {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
        let params: AddLabelParams = parse_params(arguments)?;
        validate_page_id(&params.page_id)?;
        validate_label(&params.name)?;

        let labels = ConfluenceClient::for_context(ctx)?
            .add_label(&params.page_id, &params.name)
            .await?;
        Ok(json!({
            "success": true,
            "page_id": params.page_id,
            "labels": labels,
        }))
    }
}

/// Register every Confluence tool body
pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register(CONFLUENCE_SEARCH, Arc::new(SearchTool));
    dispatcher.register(CONFLUENCE_GET_PAGE, Arc::new(GetPageTool));
    dispatcher.register(CONFLUENCE_GET_COMMENTS, Arc::new(GetCommentsTool));
    dispatcher.register(CONFLUENCE_GET_LABELS, Arc::new(GetLabelsTool));
    dispatcher.register(CONFLUENCE_CREATE_PAGE, Arc::new(CreatePageTool));
    dispatcher.register(CONFLUENCE_UPDATE_PAGE, Arc::new(UpdatePageTool));
    dispatcher.register(CONFLUENCE_ADD_LABEL, Arc::new(AddLabelTool));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_becomes_site_search() {
        assert_eq!(to_cql("release notes"), "siteSearch ~ \"release notes\"");
        assert_eq!(to_cql("say \"hi\""), "siteSearch ~ \"say \\\"hi\\\"\"");
        assert_eq!(to_cql(r"C:\temp"), r#"siteSearch ~ "C:\\temp""#);
        assert_eq!(to_cql(r"trailing\"), r#"siteSearch ~ "trailing\\""#);
    }

    #[test]
    fn test_cql_is_passed_through() {
        let cql = "space = DEV AND type = page";
        assert_eq!(to_cql(cql), cql);
        assert_eq!(to_cql("title ~ \"x\""), "title ~ \"x\"");
    }

    #[test]
    fn test_page_id_validation() {
        assert!(validate_page_id("123456").is_ok());
        assert!(validate_page_id("").is_err());
        assert!(validate_page_id("12/../3").is_err());
    }

    #[test]
    fn test_label_validation() {
        assert!(validate_label("release-notes").is_ok());
        assert!(validate_label("two words").is_err());
        assert!(validate_label("  ").is_err());
    }
}
