//! `tether tools` — list discovered tools with server attribution.

use tether_mcp_client::McpManager;

/// Start either the named server or the autostart set, print every
/// discovered tool as `server:tool  description`, then shut down.
pub async fn run(manager: &McpManager, server: Option<&str>) -> anyhow::Result<()> {
    match server {
        Some(id) => {
            if let Err(e) = manager.start(id).await {
                manager.shutdown().await;
                anyhow::bail!("starting {id}: {e}");
            }
        }
        None => manager.start_autostart().await,
    }

    let mut tools = manager.all_tools();
    tools.sort_by(|a, b| {
        (a.server_id.as_str(), a.tool.name.as_str()).cmp(&(b.server_id.as_str(), b.tool.name.as_str()))
    });

    if tools.is_empty() {
        println!("No tools discovered.");
    }
    for entry in &tools {
        // First description line only; schemas and full text are for
        // machine consumers.
        let summary = entry.tool.description.lines().next().unwrap_or("");
        if summary.is_empty() {
            println!("{}:{}", entry.server_id, entry.tool.name);
        } else {
            println!("{}:{}  {summary}", entry.server_id, entry.tool.name);
        }
    }

    manager.shutdown().await;
    Ok(())
}
