//! operator - template MCP server
//!
//! Subcommands:
//! - `operator serve` - Run the MCP server (Streamable HTTP on `/mcp`)
//! - `operator config` - Print the effective configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use switchconf::{ConfigSources, SwitchConfig};

use operator::{greeter, serve, telemetry};

#[derive(Parser)]
#[command(name = "operator")]
#[command(about = "Template MCP server with session routing")]
#[command(version)]
struct Cli {
    /// Config file to use instead of ./switchboard.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// HTTP port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// OTLP gRPC endpoint for OpenTelemetry (e.g., "localhost:4317")
        #[arg(long)]
        otlp_endpoint: Option<String>,

        /// Disable the event store (dropped SSE streams cannot resume)
        #[arg(long)]
        no_resume: bool,

        /// Pause before each multi-greet notification, in milliseconds
        #[arg(long, default_value_t = greeter::DEFAULT_MULTI_GREET_DELAY.as_millis() as u64)]
        multi_greet_delay_ms: u64,
    },

    /// Print the effective configuration and where it came from
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = SwitchConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            print_config(&config, &sources)?;
        }
        Commands::Serve {
            host,
            port,
            otlp_endpoint,
            no_resume,
            multi_greet_delay_ms,
        } => {
            if let Some(host) = host {
                config.bind.host = host;
            }
            if let Some(port) = port {
                config.bind.port = port;
            }
            if let Some(endpoint) = otlp_endpoint {
                config.telemetry.otlp_endpoint = Some(endpoint);
            }
            if no_resume {
                config.sessions.resumable = false;
            }

            let telemetry = telemetry::init(&config.telemetry)?;
            telemetry::install_panic_hook();

            for file in &sources.files {
                tracing::info!(file = %file.display(), "Loaded config file");
            }

            let engine = greeter::engine(Duration::from_millis(multi_greet_delay_ms));
            let result = serve::run(config, engine).await;
            if let Err(ref e) = result {
                tracing::error!(error = ?e, "Server failed");
            }

            telemetry.shutdown();
            result?;
        }
    }

    Ok(())
}

fn print_config(config: &SwitchConfig, sources: &ConfigSources) -> Result<()> {
    if sources.files.is_empty() {
        println!("# No config files found, using defaults");
    }
    for file in &sources.files {
        println!("# Loaded: {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("# Env override: {}", var);
    }
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_multi_greet_delay_defaults_to_greeter_constant() {
        let cli = Cli::try_parse_from(["operator", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { multi_greet_delay_ms, .. } => {
                assert_eq!(Duration::from_millis(multi_greet_delay_ms), greeter::DEFAULT_MULTI_GREET_DELAY);
            }
            Commands::Config => panic!("parsed the wrong subcommand"),
        }

        let cli = Cli::try_parse_from(["operator", "serve", "--multi-greet-delay-ms", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { multi_greet_delay_ms: 5, .. }));
    }
}
