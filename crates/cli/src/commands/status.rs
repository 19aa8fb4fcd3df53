//! `tether status` — bring up the autostart servers and report on
//! every configured one.

use tether_mcp_client::{ConnectionStatus, McpManager};

/// Start the autostart servers, print one line per configured server,
/// then stop everything again.
pub async fn run(manager: &McpManager) -> anyhow::Result<()> {
    if manager.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    manager.start_autostart().await;

    let mut entries: Vec<_> = manager.status_map().into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (id, server) in &entries {
        let tag = match &server.status {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnected => "stopped",
            ConnectionStatus::Error { .. } => "error",
        };
        let flags = if server.autostart { "autostart" } else { "manual" };
        let detail = match &server.status {
            ConnectionStatus::Connected => format!("{} tool(s)", server.tool_count),
            ConnectionStatus::Error { message } => message.clone(),
            _ => "not started".into(),
        };
        println!("  [{tag:<9}] {id}: {detail} ({flags})");
    }

    manager.shutdown().await;
    Ok(())
}
