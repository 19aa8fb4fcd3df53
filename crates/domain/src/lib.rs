//! `tether-domain` — shared configuration types for Tether.
//!
//! This crate defines the config file shape (`McpConfig` and friends)
//! and the validation rules over it. It deliberately contains no I/O:
//! hosts decide where the config comes from and hand the parsed struct
//! to `tether-mcp-client`.

pub mod config;

pub use config::{
    ClientSettings, ConfigIssue, ConfigSeverity, McpConfig, ServerConfig, TransportKind,
};
