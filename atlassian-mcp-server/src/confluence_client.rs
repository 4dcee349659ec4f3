//! Confluence REST client
//!
//! Talks to the REST v1 content API under the call's base URL, which is
//! either the configured site (`https://example.atlassian.net/wiki`) or the
//! gateway route (`https://api.atlassian.com/ex/confluence/<cloud>/wiki`).

use crate::auth::credentials::Authorization;
use crate::context::RequestContext;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::tools::retry::{with_retry, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

/// Largest page size the content API returns
pub const MAX_CONFLUENCE_LIMIT: u32 = 100;

/// Confluence client bound to one call
pub struct ConfluenceClient {
    http: reqwest::Client,
    base_url: String,
    authorization: Authorization,
    retry: RetryPolicy,
}

/// A page, blog post or comment in a listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentSummary {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub space_key: Option<String>,
    pub web_url: Option<String>,
}

/// A page with its storage-format body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageDetails {
    pub id: String,
    pub title: String,
    pub space_key: Option<String>,
    pub version: u64,
    pub body: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentDetails {
    pub id: String,
    pub author: Option<String>,
    pub body: Option<String>,
    pub created: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelInfo {
    pub id: Option<String>,
    pub name: String,
    pub prefix: Option<String>,
}

#[derive(Deserialize)]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Deserialize)]
struct RawContent {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "type", default)]
    content_type: String,
    #[serde(default)]
    space: Option<RawSpace>,
    #[serde(default)]
    version: Option<RawVersion>,
    #[serde(default)]
    body: Option<RawBody>,
    #[serde(rename = "_links", default)]
    links: Option<RawLinks>,
    #[serde(default)]
    history: Option<RawHistory>,
}

#[derive(Deserialize)]
struct RawSpace {
    key: String,
}

#[derive(Deserialize)]
struct RawVersion {
    number: u64,
}

#[derive(Deserialize)]
struct RawBody {
    #[serde(default)]
    storage: Option<RawStorage>,
}

#[derive(Deserialize)]
struct RawStorage {
    value: String,
}

#[derive(Deserialize)]
struct RawLinks {
    #[serde(default)]
    webui: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHistory {
    #[serde(default)]
    created_by: Option<RawUser>,
    #[serde(default)]
    created_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
    display_name: String,
}

#[derive(Deserialize)]
struct RawLabel {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    prefix: Option<String>,
}

impl RawContent {
    fn storage_body(&self) -> Option<String> {
        self.body
            .as_ref()
            .and_then(|b| b.storage.as_ref())
            .map(|s| s.value.clone())
    }

    fn webui(&self) -> Option<String> {
        self.links.as_ref().and_then(|l| l.webui.clone())
    }

    fn into_summary(self) -> ContentSummary {
        ContentSummary {
            web_url: self.webui(),
            space_key: self.space.map(|s| s.key),
            id: self.id,
            title: self.title,
            content_type: self.content_type,
        }
    }

    fn into_page(self) -> PageDetails {
        PageDetails {
            body: self.storage_body(),
            web_url: self.webui(),
            version: self.version.as_ref().map(|v| v.number).unwrap_or(1),
            space_key: self.space.map(|s| s.key),
            id: self.id,
            title: self.title,
        }
    }

    fn into_comment(self) -> CommentDetails {
        let body = self.storage_body();
        let (author, created) = match self.history {
            Some(history) => (
                history.created_by.map(|u| u.display_name),
                history.created_date,
            ),
            None => (None, None),
        };
        CommentDetails {
            id: self.id,
            author,
            body,
            created,
        }
    }
}

/// Storage-format body object
fn storage(value: &str) -> Value {
    json!({ "storage": { "value": value, "representation": "storage" } })
}

impl ConfluenceClient {
    /// Build a client for the call described by `ctx`
    pub fn for_context(ctx: &RequestContext) -> AtlassianMcpResult<Self> {
        Ok(Self {
            http: ctx.http_client()?,
            base_url: ctx.base_url().as_str().trim_end_matches('/').to_string(),
            authorization: ctx.authorization.clone(),
            retry: ctx.retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request and decode a successful JSON reply
    async fn send(&self, request: reqwest::RequestBuilder) -> AtlassianMcpResult<Value> {
        let response = self
            .authorization
            .apply(request)
            .header(http::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                error!("Confluence request failed: {e}");
                AtlassianMcpError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Confluence API error ({status}): {error_text}");
            return Err(AtlassianMcpError::from_status(
                status.as_u16(),
                format!("Confluence API error: {}", error_text),
            ));
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        Ok(response.json::<Value>().await?)
    }

    /// GET with retries
    async fn get(&self, path: &str, query: &[(&str, String)]) -> AtlassianMcpResult<Value> {
        let url = self.url(path);
        debug!("GET {}", url);
        with_retry(&self.retry, &format!("GET {}", path), || {
            self.send(self.http.get(&url).query(query))
        })
        .await
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> AtlassianMcpResult<T> {
        serde_json::from_value(value).map_err(|e| {
            AtlassianMcpError::api(None, format!("Unexpected Confluence response: {}", e))
        })
    }

    /// Search content with CQL
    #[instrument(skip(self))]
    pub async fn search(&self, cql: &str, limit: u32) -> AtlassianMcpResult<Vec<ContentSummary>> {
        let limit = limit.clamp(1, MAX_CONFLUENCE_LIMIT);
        let raw = self
            .get(
                "content/search",
                &[
                    ("cql", cql.to_string()),
                    ("limit", limit.to_string()),
                    ("expand", "space".to_string()),
                ],
            )
            .await?;

        let page: Paged<RawContent> = Self::decode(raw)?;
        let results: Vec<ContentSummary> = page
            .results
            .into_iter()
            .map(RawContent::into_summary)
            .collect();

        info!("Confluence search returned {} results", results.len());
        Ok(results)
    }

    /// Get a page, optionally with its body
    #[instrument(skip(self))]
    pub async fn get_page(&self, page_id: &str, include_body: bool) -> AtlassianMcpResult<PageDetails> {
        let expand = if include_body {
            "space,version,body.storage"
        } else {
            "space,version"
        };
        let raw = self
            .get(
                &format!("content/{}", page_id),
                &[("expand", expand.to_string())],
            )
            .await?;
        Ok(Self::decode::<RawContent>(raw)?.into_page())
    }

    /// List the comments of a page
    #[instrument(skip(self))]
    pub async fn get_comments(&self, page_id: &str) -> AtlassianMcpResult<Vec<CommentDetails>> {
        let raw = self
            .get(
                &format!("content/{}/child/comment", page_id),
                &[
                    ("expand", "body.storage,history".to_string()),
                    ("depth", "all".to_string()),
                ],
            )
            .await?;
        let page: Paged<RawContent> = Self::decode(raw)?;
        Ok(page.results.into_iter().map(RawContent::into_comment).collect())
    }

    /// List the labels of a page
    #[instrument(skip(self))]
    pub async fn get_labels(&self, page_id: &str) -> AtlassianMcpResult<Vec<LabelInfo>> {
        let raw = self.get(&format!("content/{}/label", page_id), &[]).await?;
        let page: Paged<RawLabel> = Self::decode(raw)?;
        Ok(page
            .results
            .into_iter()
            .map(|l| LabelInfo {
                id: l.id,
                name: l.name,
                prefix: l.prefix,
            })
            .collect())
    }

    /// Create a page in a space
    #[instrument(skip(self, body))]
    pub async fn create_page(
        &self,
        space_key: &str,
        title: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> AtlassianMcpResult<PageDetails> {
        let mut payload = json!({
            "type": "page",
            "title": title,
            "space": { "key": space_key },
            "body": storage(body),
        });
        if let Some(parent_id) = parent_id {
            payload["ancestors"] = json!([{ "id": parent_id }]);
        }

        let raw = self
            .send(self.http.post(self.url("content")).json(&payload))
            .await?;
        let page = Self::decode::<RawContent>(raw)?.into_page();
        info!("Created Confluence page {} in space {}", page.id, space_key);
        Ok(page)
    }

    /// Replace the body (and optionally the title) of a page
    ///
    /// Reads the current version first and writes `version + 1`.
    #[instrument(skip(self, body, version_comment))]
    pub async fn update_page(
        &self,
        page_id: &str,
        title: Option<&str>,
        body: &str,
        version_comment: Option<&str>,
    ) -> AtlassianMcpResult<PageDetails> {
        let current = self.get_page(page_id, false).await?;
        let next_version = current.version + 1;

        let mut version = json!({ "number": next_version });
        if let Some(message) = version_comment {
            version["message"] = json!(message);
        }

        let payload = json!({
            "id": page_id,
            "type": "page",
            "title": title.unwrap_or(&current.title),
            "body": storage(body),
            "version": version,
        });

        let raw = self
            .send(
                self.http
                    .put(self.url(&format!("content/{}", page_id)))
                    .json(&payload),
            )
            .await?;
        let page = Self::decode::<RawContent>(raw)?.into_page();
        info!("Updated Confluence page {} to version {}", page_id, page.version);
        Ok(page)
    }

    /// Add a global label to a page
    #[instrument(skip(self))]
    pub async fn add_label(&self, page_id: &str, name: &str) -> AtlassianMcpResult<Vec<LabelInfo>> {
        let payload = json!([{ "prefix": "global", "name": name }]);
        self.send(
            self.http
                .post(self.url(&format!("content/{}/label", page_id)))
                .json(&payload),
        )
        .await?;
        self.get_labels(page_id).await
    }
}
