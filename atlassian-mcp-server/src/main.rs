//! Atlassian MCP Server - Jira and Confluence tools via MCP

use atlassian_mcp_server::backend::GatedBackend;
use atlassian_mcp_server::AtlassianMcpServer;
use pulseengine_mcp_server::McpServerBuilder;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configure logging for STDIO transport
    AtlassianMcpServer::configure_stdio_logging();

    info!("Starting Atlassian MCP Server...");

    let atlassian_server = match AtlassianMcpServer::new().await {
        Ok(server) => {
            info!("Atlassian MCP Server created successfully");
            server
        }
        Err(e) => {
            error!("Failed to create Atlassian MCP Server: {}", e);
            eprintln!("❌ Failed to start Atlassian MCP Server: {}", e);
            eprintln!("\nPlease check:");
            eprintln!("  - JIRA_URL and/or CONFLUENCE_URL are set");
            eprintln!("  - Credentials are configured (JIRA_PERSONAL_TOKEN, JIRA_USERNAME + JIRA_API_TOKEN,");
            eprintln!("    the CONFLUENCE_ equivalents, or ATLASSIAN_OAUTH_CLIENT_ID + ATLASSIAN_OAUTH_CLIENT_SECRET)");
            eprintln!("  - ENABLED_TOOLS / DISABLED_TOOLS only name known tools");
            eprintln!("\nFor help, see the README.md file.");
            std::process::exit(1);
        }
    };

    info!("Starting MCP server with STDIO transport...");

    let mut server = GatedBackend::new(atlassian_server).serve_stdio().await?;

    info!("🚀 Atlassian MCP Server is running and ready to serve requests");

    server.run().await?;

    Ok(())
}
