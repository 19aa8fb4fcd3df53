//! `tether config` — validate and inspect the resolved configuration.

use tether_domain::config::{ConfigSeverity, McpConfig};

/// Check the loaded config for problems and report them.
///
/// Returns `false` when any error-severity issue is present so the
/// caller can exit nonzero. Warnings alone still pass.
pub fn validate(config: &McpConfig, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!(
            "Config OK: {} server(s) defined ({config_path})",
            config.servers.len()
        );
        return true;
    }

    let mut errors = 0usize;
    let mut warnings = 0usize;
    for issue in &issues {
        println!("{issue}");
        match issue.severity {
            ConfigSeverity::Error => errors += 1,
            ConfigSeverity::Warning => warnings += 1,
        }
    }
    println!("\n{errors} error(s), {warnings} warning(s) in {config_path}");

    errors == 0
}

/// Print the resolved config (defaults applied) as TOML.
pub fn show(config: &McpConfig) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => print!("{rendered}"),
        Err(e) => {
            eprintln!("Failed to render config: {e}");
            std::process::exit(1);
        }
    }
}
