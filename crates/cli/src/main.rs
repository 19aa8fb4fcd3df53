mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};
use tether_mcp_client::McpManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Status => {
            init_cli_tracing();
            let manager = load_manager()?;
            commands::status::run(&manager).await
        }
        Command::Tools { server } => {
            init_cli_tracing();
            let manager = load_manager()?;
            commands::tools::run(&manager, server.as_deref()).await
        }
        Command::Call { server, tool, args } => {
            init_cli_tracing();
            let manager = load_manager()?;
            commands::call::run(&manager, &server, &tool, &args).await
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = cli::load_config()?;
            if !commands::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _config_path) = cli::load_config()?;
            commands::config::show(&config);
            Ok(())
        }
        Command::Version => {
            println!("tether {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Build a manager from the config file without starting anything.
fn load_manager() -> anyhow::Result<McpManager> {
    let (config, config_path) = cli::load_config()?;
    tracing::debug!(
        config = %config_path,
        servers = config.servers.len(),
        "loaded configuration"
    );
    Ok(McpManager::from_config(&config))
}

/// Initialize compact stderr-only tracing for one-shot commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
