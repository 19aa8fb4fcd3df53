//! `tether call` — invoke a single tool and print its content.

use tether_mcp_client::{McpManager, ToolCallResult};

/// Start the target server, call the tool, print the result.
///
/// Text content goes to stdout verbatim. Binary content (images,
/// resources) is summarized on stderr rather than dumped. Exits with
/// status 2 when the server flags the result as a tool-level error.
pub async fn run(
    manager: &McpManager,
    server: &str,
    tool: &str,
    args: &str,
) -> anyhow::Result<()> {
    let arguments: serde_json::Value = serde_json::from_str(args)
        .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {e}"))?;

    if let Err(e) = manager.start(server).await {
        manager.shutdown().await;
        anyhow::bail!("starting {server}: {e}");
    }

    let outcome = manager.call_tool(server, tool, arguments).await;
    manager.shutdown().await;

    let result = outcome.map_err(|e| anyhow::anyhow!("calling {server}:{tool}: {e}"))?;
    print_result(&result);
    if result.is_error {
        std::process::exit(2);
    }
    Ok(())
}

fn print_result(result: &ToolCallResult) {
    for item in &result.content {
        if item.content_type == "text" {
            println!("{}", item.text);
        } else {
            let size = item.data.as_deref().map_or(0, str::len);
            let mime = item.mime_type.as_deref().unwrap_or("unknown");
            eprintln!("[{} content, {size} base64 bytes, {mime}]", item.content_type);
        }
    }
}
