use clap::{Parser, Subcommand};

use tether_domain::config::McpConfig;

/// Tether — MCP server launcher and tool aggregator.
#[derive(Debug, Parser)]
#[command(name = "tether", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the autostart servers and print per-server status.
    Status,
    /// List tools discovered across servers.
    Tools {
        /// Only start and query this server.
        #[arg(long)]
        server: Option<String>,
    },
    /// Start a server, invoke one of its tools, and print the result.
    Call {
        /// Server id from the config file.
        server: String,
        /// Tool name as reported by `tether tools`.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any issues.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `TETHER_CONFIG`
/// (or `tether.toml` by default).  Returns the parsed [`McpConfig`] and
/// the path that was used.
///
/// Shared by every subcommand so the logic lives in one place.
pub fn load_config() -> anyhow::Result<(McpConfig, String)> {
    let config_path = std::env::var("TETHER_CONFIG").unwrap_or_else(|_| "tether.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        McpConfig::default()
    };

    Ok((config, config_path))
}
