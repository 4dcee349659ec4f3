//! Tool availability gate
//!
//! Computes which catalog tools are advertised and which may be invoked,
//! as a pure function of the server configuration.

use crate::config::ServerAuthConfig;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::tools::catalog::ToolDescriptor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Why a tool is hidden from listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenReason {
    ServiceNotConfigured,
    Disabled,
    NotEnabled,
}

/// Why a visible tool cannot be invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    ReadOnlyMode,
}

/// Availability of one tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ToolStatus {
    Callable,
    Blocked(BlockedReason),
    Hidden(HiddenReason),
}

impl ToolStatus {
    pub fn is_visible(&self) -> bool {
        !matches!(self, ToolStatus::Hidden(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, ToolStatus::Callable)
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolStatus::Callable => f.write_str("callable"),
            ToolStatus::Blocked(BlockedReason::ReadOnlyMode) => {
                f.write_str("blocked: server is in read-only mode")
            }
            ToolStatus::Hidden(HiddenReason::ServiceNotConfigured) => {
                f.write_str("hidden: the owning service is not configured")
            }
            ToolStatus::Hidden(HiddenReason::Disabled) => {
                f.write_str("hidden: listed in DISABLED_TOOLS")
            }
            ToolStatus::Hidden(HiddenReason::NotEnabled) => {
                f.write_str("hidden: not listed in ENABLED_TOOLS")
            }
        }
    }
}

/// One row of a snapshot, as returned to MCP clients
#[derive(Debug, Clone, Serialize)]
pub struct ToolAvailability {
    #[serde(flatten)]
    pub descriptor: ToolDescriptor,
    pub callable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<BlockedReason>,
}

/// Availability of every catalog tool at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolAvailabilitySnapshot {
    entries: BTreeMap<&'static str, (ToolDescriptor, ToolStatus)>,
}

/// Compute the availability snapshot for a catalog
pub fn snapshot(config: &ServerAuthConfig, catalog: &[ToolDescriptor]) -> ToolAvailabilitySnapshot {
    let entries = catalog
        .iter()
        .map(|tool| (tool.name, (*tool, evaluate(config, tool))))
        .collect();

    ToolAvailabilitySnapshot { entries }
}

/// Apply the availability rules to a single tool
fn evaluate(config: &ServerAuthConfig, tool: &ToolDescriptor) -> ToolStatus {
    if config.service(tool.service).is_none() {
        return ToolStatus::Hidden(HiddenReason::ServiceNotConfigured);
    }

    // The allow-list is authoritative when present
    match &config.enabled_tools {
        Some(enabled) if !enabled.contains(tool.name) => {
            return ToolStatus::Hidden(HiddenReason::NotEnabled)
        }
        Some(_) => {}
        None if config.disabled_tools.contains(tool.name) => {
            return ToolStatus::Hidden(HiddenReason::Disabled)
        }
        None => {}
    }

    if config.read_only && tool.is_mutating() {
        return ToolStatus::Blocked(BlockedReason::ReadOnlyMode);
    }

    ToolStatus::Callable
}

impl ToolAvailabilitySnapshot {
    /// Status of a tool, `None` for names outside the catalog
    pub fn status(&self, name: &str) -> Option<ToolStatus> {
        self.entries.get(name).map(|(_, status)| *status)
    }

    /// Descriptor of a tool, if it is in the catalog
    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.entries.get(name).map(|(descriptor, _)| descriptor)
    }

    /// Tools that appear in listings, in name order
    pub fn visible_tools(&self) -> Vec<ToolAvailability> {
        self.entries
            .values()
            .filter(|(_, status)| status.is_visible())
            .map(|(descriptor, status)| ToolAvailability {
                descriptor: *descriptor,
                callable: status.is_callable(),
                blocked_reason: match status {
                    ToolStatus::Blocked(reason) => Some(*reason),
                    _ => None,
                },
            })
            .collect()
    }

    /// Number of tools that may currently be invoked
    pub fn callable_count(&self) -> usize {
        self.entries
            .values()
            .filter(|(_, status)| status.is_callable())
            .count()
    }

    /// Check that a tool may be invoked, returning its descriptor
    pub fn ensure_callable(&self, name: &str) -> AtlassianMcpResult<&ToolDescriptor> {
        match self.entries.get(name) {
            None => Err(AtlassianMcpError::tool_unavailable(
                name,
                "unknown tool",
            )),
            Some((descriptor, ToolStatus::Callable)) => Ok(descriptor),
            Some((_, status)) => Err(AtlassianMcpError::tool_unavailable(
                name,
                status.to_string(),
            )),
        }
    }
}
