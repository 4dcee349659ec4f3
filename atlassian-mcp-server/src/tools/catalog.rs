//! Static catalog of tool descriptors
//!
//! Every tool the server can expose is listed here once, with the service
//! that owns it and whether it mutates remote state. The catalog is never
//! modified at runtime; availability is computed from it by the gate.

use serde::Serialize;
use std::fmt;

/// Atlassian product a tool talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Jira,
    Confluence,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Jira => "jira",
            Service::Confluence => "confluence",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only classification of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Write,
}

/// Static metadata for one callable tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub service: Service,
    pub access: Access,
    /// Capability tag used for grouping in listings
    pub capability: &'static str,
}

impl ToolDescriptor {
    const fn new(
        name: &'static str,
        service: Service,
        access: Access,
        capability: &'static str,
    ) -> Self {
        Self {
            name,
            service,
            access,
            capability,
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.access == Access::Write
    }
}

pub const JIRA_GET_USER_PROFILE: &str = "jira_get_user_profile";
pub const JIRA_GET_ISSUE: &str = "jira_get_issue";
pub const JIRA_SEARCH: &str = "jira_search";
pub const JIRA_GET_TRANSITIONS: &str = "jira_get_transitions";
pub const JIRA_CREATE_ISSUE: &str = "jira_create_issue";
pub const JIRA_UPDATE_ISSUE: &str = "jira_update_issue";
pub const JIRA_ADD_COMMENT: &str = "jira_add_comment";
pub const JIRA_TRANSITION_ISSUE: &str = "jira_transition_issue";
pub const JIRA_LINK_ISSUES: &str = "jira_link_issues";
pub const JIRA_RANK_ISSUES: &str = "jira_rank_issues";
pub const CONFLUENCE_SEARCH: &str = "confluence_search";
pub const CONFLUENCE_GET_PAGE: &str = "confluence_get_page";
pub const CONFLUENCE_GET_COMMENTS: &str = "confluence_get_comments";
pub const CONFLUENCE_GET_LABELS: &str = "confluence_get_labels";
pub const CONFLUENCE_CREATE_PAGE: &str = "confluence_create_page";
pub const CONFLUENCE_UPDATE_PAGE: &str = "confluence_update_page";
pub const CONFLUENCE_ADD_LABEL: &str = "confluence_add_label";

/// All tools known to the server
pub static TOOL_CATALOG: &[ToolDescriptor] = &[
    ToolDescriptor::new(JIRA_GET_USER_PROFILE, Service::Jira, Access::Read, "users"),
    ToolDescriptor::new(JIRA_GET_ISSUE, Service::Jira, Access::Read, "issues"),
    ToolDescriptor::new(JIRA_SEARCH, Service::Jira, Access::Read, "search"),
    ToolDescriptor::new(JIRA_GET_TRANSITIONS, Service::Jira, Access::Read, "workflow"),
    ToolDescriptor::new(JIRA_CREATE_ISSUE, Service::Jira, Access::Write, "issues"),
    ToolDescriptor::new(JIRA_UPDATE_ISSUE, Service::Jira, Access::Write, "issues"),
    ToolDescriptor::new(JIRA_ADD_COMMENT, Service::Jira, Access::Write, "comments"),
    ToolDescriptor::new(JIRA_TRANSITION_ISSUE, Service::Jira, Access::Write, "workflow"),
    ToolDescriptor::new(JIRA_LINK_ISSUES, Service::Jira, Access::Write, "links"),
    ToolDescriptor::new(JIRA_RANK_ISSUES, Service::Jira, Access::Write, "agile"),
    ToolDescriptor::new(CONFLUENCE_SEARCH, Service::Confluence, Access::Read, "search"),
    ToolDescriptor::new(CONFLUENCE_GET_PAGE, Service::Confluence, Access::Read, "pages"),
    ToolDescriptor::new(CONFLUENCE_GET_COMMENTS, Service::Confluence, Access::Read, "comments"),
    ToolDescriptor::new(CONFLUENCE_GET_LABELS, Service::Confluence, Access::Read, "labels"),
    ToolDescriptor::new(CONFLUENCE_CREATE_PAGE, Service::Confluence, Access::Write, "pages"),
    ToolDescriptor::new(CONFLUENCE_UPDATE_PAGE, Service::Confluence, Access::Write, "pages"),
    ToolDescriptor::new(CONFLUENCE_ADD_LABEL, Service::Confluence, Access::Write, "labels"),
];

/// Look up a descriptor by tool name
pub fn find(name: &str) -> Option<&'static ToolDescriptor> {
    TOOL_CATALOG.iter().find(|tool| tool.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_names_are_unique() {
        let names: HashSet<_> = TOOL_CATALOG.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), TOOL_CATALOG.len());
    }

    #[test]
    fn test_names_are_prefixed_by_service() {
        for tool in TOOL_CATALOG {
            assert!(
                tool.name.starts_with(&format!("{}_", tool.service)),
                "{} should start with its service name",
                tool.name
            );
        }
    }

    #[test]
    fn test_find() {
        let tool = find(JIRA_CREATE_ISSUE).unwrap();
        assert_eq!(tool.service, Service::Jira);
        assert!(tool.is_mutating());
        assert!(!find(JIRA_GET_ISSUE).unwrap().is_mutating());
        assert!(find("jira_delete_everything").is_none());
    }
}
