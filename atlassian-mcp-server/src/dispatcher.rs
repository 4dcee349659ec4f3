//! Tool call dispatch
//!
//! Every call runs the same stages: gate, authenticate, route, execute. A
//! call that fails the gate never resolves credentials or touches the
//! network. Tool bodies only ever see a finished [`RequestContext`].

use crate::auth::credentials::AuthMethod;
use crate::auth::headers::RequestAuthHeaders;
use crate::context::{RequestContext, RequestContextBuilder};
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::tools::gate::{ToolAvailability, ToolAvailabilitySnapshot};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Implementation of one tool
#[async_trait]
pub trait ToolBody: Send + Sync {
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value>;
}

/// One inbound tool call
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
    pub headers: RequestAuthHeaders,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            headers: RequestAuthHeaders::none(),
        }
    }

    pub fn with_headers(mut self, headers: RequestAuthHeaders) -> Self {
        self.headers = headers;
        self
    }
}

/// Stages of a call, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStage {
    Received,
    Gated,
    Authenticated,
    Routed,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug)]
struct CallTrace {
    stage: CallStage,
    method: Option<AuthMethod>,
}

/// Routes tool calls through the per-call pipeline
pub struct Dispatcher {
    snapshot: ToolAvailabilitySnapshot,
    builder: RequestContextBuilder,
    bodies: HashMap<&'static str, Arc<dyn ToolBody>>,
}

impl Dispatcher {
    pub fn new(snapshot: ToolAvailabilitySnapshot, builder: RequestContextBuilder) -> Self {
        Self {
            snapshot,
            builder,
            bodies: HashMap::new(),
        }
    }

    /// Register the implementation of a catalog tool
    pub fn register(&mut self, name: &'static str, body: Arc<dyn ToolBody>) {
        if self.bodies.insert(name, body).is_some() {
            warn!("Replacing implementation of tool {}", name);
        }
    }

    pub fn snapshot(&self) -> &ToolAvailabilitySnapshot {
        &self.snapshot
    }

    pub fn builder(&self) -> &RequestContextBuilder {
        &self.builder
    }

    /// Tools currently advertised to clients
    pub fn list_tools(&self) -> Vec<ToolAvailability> {
        self.snapshot.visible_tools()
    }

    /// Run one tool call to completion
    pub async fn dispatch(&self, invocation: ToolInvocation) -> AtlassianMcpResult<Value> {
        let started = Instant::now();
        let mut trace = CallTrace {
            stage: CallStage::Received,
            method: None,
        };

        let result = self.run(&invocation, &mut trace).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let service = self
            .snapshot
            .descriptor(&invocation.tool_name)
            .map(|tool| tool.service.as_str())
            .unwrap_or("-");
        let method = trace.method.map(|m| m.as_str()).unwrap_or("-");

        match &result {
            Ok(_) => info!(
                tool = invocation.tool_name.as_str(),
                service,
                method,
                outcome = "ok",
                elapsed_ms,
                "Tool call completed"
            ),
            Err(e) => warn!(
                tool = invocation.tool_name.as_str(),
                service,
                method,
                stage = ?trace.stage,
                outcome = e.kind().as_str(),
                elapsed_ms,
                "Tool call failed: {}",
                e
            ),
        }

        result
    }

    async fn run(
        &self,
        invocation: &ToolInvocation,
        trace: &mut CallTrace,
    ) -> AtlassianMcpResult<Value> {
        let tool = *self.snapshot.ensure_callable(&invocation.tool_name)?;
        trace.stage = CallStage::Gated;

        let body = self.bodies.get(tool.name).cloned().ok_or_else(|| {
            AtlassianMcpError::internal(format!("No implementation registered for {}", tool.name))
        })?;

        let credential = self
            .builder
            .authenticate(tool.service, &invocation.headers)
            .await?;
        trace.method = Some(credential.method);
        trace.stage = CallStage::Authenticated;

        let site = self
            .builder
            .route(tool.service, &credential, &invocation.headers)?;
        trace.stage = CallStage::Routed;

        let ctx = self.builder.assemble(tool, credential, site);
        trace.stage = CallStage::Executing;
        debug!(tool = tool.name, base_url = %ctx.base_url(), "Executing tool body");

        let outcome = AssertUnwindSafe(body.execute(&ctx, invocation.arguments.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                trace.stage = CallStage::Completed;
                Ok(value)
            }
            Ok(Err(e)) => {
                trace.stage = CallStage::Failed;
                Err(e)
            }
            Err(panic) => {
                trace.stage = CallStage::Failed;
                let message = panic_message(panic.as_ref());
                error!(tool = tool.name, "Tool body panicked: {}", message);
                Err(AtlassianMcpError::internal(format!(
                    "{} failed unexpectedly: {}",
                    tool.name, message
                )))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerAuthConfig, ServiceConfig};
    use crate::error::ErrorKind;
    use crate::tools::catalog::{JIRA_CREATE_ISSUE, JIRA_GET_ISSUE, TOOL_CATALOG};
    use crate::tools::gate;
    use secrecy::SecretString;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolBody for Echo {
        async fn execute(&self, ctx: &RequestContext, arguments: Value) -> AtlassianMcpResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "method": ctx.method.as_str(), "arguments": arguments }))
        }
    }

    struct Panics;

    #[async_trait]
    impl ToolBody for Panics {
        async fn execute(&self, _: &RequestContext, _: Value) -> AtlassianMcpResult<Value> {
            panic!("boom");
        }
    }

    fn config(read_only: bool) -> Arc<ServerAuthConfig> {
        let mut jira = ServiceConfig::new(Url::parse("https://jira.corp.example").unwrap());
        jira.personal_token = Some(SecretString::from("server-pat".to_string()));
        Arc::new(ServerAuthConfig {
            jira: Some(jira),
            read_only,
            ..Default::default()
        })
    }

    fn dispatcher(config: Arc<ServerAuthConfig>) -> Dispatcher {
        let snapshot = gate::snapshot(&config, TOOL_CATALOG);
        let builder = RequestContextBuilder::new(config, None).unwrap();
        Dispatcher::new(snapshot, builder)
    }

    #[tokio::test]
    async fn test_successful_call_reaches_body() {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let mut dispatcher = dispatcher(config(false));
        dispatcher.register(JIRA_GET_ISSUE, echo.clone());

        let value = dispatcher
            .dispatch(ToolInvocation::new(JIRA_GET_ISSUE, json!({"issue_key": "PROJ-1"})))
            .await
            .unwrap();

        assert_eq!(value["method"], "personal_access_token");
        assert_eq!(value["arguments"]["issue_key"], "PROJ-1");
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blocked_tool_never_reaches_body() {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let mut dispatcher = dispatcher(config(true));
        dispatcher.register(JIRA_CREATE_ISSUE, echo.clone());

        let err = dispatcher
            .dispatch(ToolInvocation::new(JIRA_CREATE_ISSUE, json!({})))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ToolUnavailable);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_body_is_contained() {
        let mut dispatcher = dispatcher(config(false));
        dispatcher.register(JIRA_GET_ISSUE, Arc::new(Panics));

        let err = dispatcher
            .dispatch(ToolInvocation::new(JIRA_GET_ISSUE, json!({})))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_unregistered_body_is_internal_error() {
        let dispatcher = dispatcher(config(false));
        let err = dispatcher
            .dispatch(ToolInvocation::new(JIRA_GET_ISSUE, json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_request_header_overrides_server_credential() {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let mut dispatcher = dispatcher(config(false));
        dispatcher.register(JIRA_GET_ISSUE, echo);

        let invocation = ToolInvocation::new(JIRA_GET_ISSUE, json!({}))
            .with_headers(RequestAuthHeaders::bearer("caller-token"));
        let value = dispatcher.dispatch(invocation).await.unwrap();
        assert_eq!(value["method"], "request_bearer");

        let value = dispatcher
            .dispatch(ToolInvocation::new(JIRA_GET_ISSUE, json!({})))
            .await
            .unwrap();
        assert_eq!(value["method"], "personal_access_token");
    }
}
