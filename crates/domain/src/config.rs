//! Configuration types for Tether.
//!
//! These structs deserialize the `tether.toml` config file (or a JSON
//! equivalent handed over by an embedding application). Parsing the
//! file is the host's job; this module only defines the shape, the
//! defaults, and the validation rules. The client and manager logic
//! that consumes these types lives in `tether-mcp-client`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// Identity and defaults the client advertises to servers.
    #[serde(default)]
    pub client: ClientSettings,

    /// List of MCP server definitions.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// Client-side identity and request defaults.
///
/// `name` and `version` are sent to servers in the `initialize`
/// handshake as `clientInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "d_client_name")]
    pub name: String,

    #[serde(default = "d_client_version")]
    pub version: String,

    /// Default per-request timeout in milliseconds. Individual servers
    /// can override this with their own `request_timeout_ms`.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: d_client_name(),
            version: d_client_version(),
            request_timeout_ms: d_request_timeout_ms(),
        }
    }
}

fn d_client_name() -> String {
    "tether".into()
}

fn d_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn d_request_timeout_ms() -> u64 {
    30_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-server config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for a single MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique identifier for this server. Used to route tool calls and
    /// to attribute aggregated tools to their origin.
    pub id: String,

    /// Optional human-readable name for display. Falls back to `id`.
    #[serde(default)]
    pub name: Option<String>,

    /// The command to spawn (e.g. `"npx"`).
    #[serde(default)]
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables merged over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the spawned process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Transport type (`"stdio"` or `"sse"`).
    #[serde(default)]
    pub transport: TransportKind,

    /// Optional URL for SSE transport.
    #[serde(default)]
    pub url: Option<String>,

    /// Whether the manager connects this server on startup.
    #[serde(default = "d_autostart")]
    pub autostart: bool,

    /// Per-server request timeout override in milliseconds.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl ServerConfig {
    /// Display name for logs and UIs: the configured `name`, or the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

fn d_autostart() -> bool {
    true
}

/// Transport kind for connecting to an MCP server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl McpConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. Warnings are
    /// advisory; errors mean the affected server (or the whole config)
    /// cannot work as written.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.client.name.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "client.name".into(),
                message: "client name must not be empty".into(),
            });
        }

        if self.client.request_timeout_ms == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "client.request_timeout_ms".into(),
                message: "timeout must be greater than 0".into(),
            });
        }

        if self.servers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "servers".into(),
                message: "no MCP servers configured".into(),
            });
        }

        let mut seen_ids = std::collections::HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            if server.id.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("servers[{i}].id"),
                    message: "server id must not be empty".into(),
                });
            } else if !seen_ids.insert(server.id.as_str()) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("servers[{i}].id"),
                    message: format!("duplicate server id \"{}\"", server.id),
                });
            }

            match server.transport {
                TransportKind::Stdio => {
                    if server.command.is_empty() {
                        issues.push(ConfigIssue {
                            severity: ConfigSeverity::Error,
                            field: format!("servers[{i}].command"),
                            message: "command must not be empty for stdio transport".into(),
                        });
                    }
                }
                TransportKind::Sse => {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Warning,
                        field: format!("servers[{i}].transport"),
                        message: "sse transport is not yet implemented".into(),
                    });
                    if server.url.is_none() {
                        issues.push(ConfigIssue {
                            severity: ConfigSeverity::Error,
                            field: format!("servers[{i}].url"),
                            message: "url must be set for sse transport".into(),
                        });
                    }
                }
            }

            if server.request_timeout_ms == Some(0) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("servers[{i}].request_timeout_ms"),
                    message: "timeout must be greater than 0".into(),
                });
            }
        }

        issues
    }
}
