//! revit-mcp: MCP server for AI-assisted Revit model queries
//!
//! Listens on `127.0.0.1:MCP_PORT`, routes chat requests to the LLM, and
//! fetches model data from the Revit RPC handler on `REVIT_PORT`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use revit_mcp::config;
use revit_mcp::mcp::{AppConfig, McpServer};

/// MCP server for AI-assisted Revit model queries.
///
/// Port arguments override the settings file, which overrides the built-in
/// defaults (9876 and 9877).
#[derive(Parser, Debug)]
#[command(name = "revit-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(value_name = "MCP_PORT")]
    mcp_port: Option<u16>,

    /// Port of the Revit RPC handler
    #[arg(value_name = "REVIT_PORT")]
    revit_port: Option<u16>,

    /// Path to settings file
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Default LLM model
    #[arg(long)]
    model: Option<String>,

    /// LLM API key (overrides the settings file)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the LLM API
    #[arg(long, value_name = "URL")]
    llm_url: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace; default: log_level setting)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "info" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, settings_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match settings_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        },
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Merges CLI arguments over the stored settings.
fn resolve_config(args: &Args, settings: &config::Settings) -> AppConfig {
    let mut app = AppConfig::from_settings(settings);
    if let Some(port) = args.mcp_port {
        app.mcp_port = port;
    }
    if let Some(port) = args.revit_port {
        app.revit_port = port;
    }
    if let Some(model) = &args.model {
        app.model.clone_from(model);
    }
    if let Some(key) = args.api_key.as_ref().filter(|k| !k.is_empty()) {
        app.api_key.clone_from(key);
    }
    app.llm_base_url.clone_from(&args.llm_url);
    app
}

/// Entry point for the revit-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    let settings = config::load_settings(args.settings.as_deref());

    let log_level = get_log_level(args.verbose, args.quiet, &settings.log_level);
    init_tracing(log_level);

    // Display GPL license notice (required by GPLv3 Section 5d)
    eprintln!(
        "revit-mcp {}  Copyright (C) 2026  RevitMCP Contributors",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("This program comes with ABSOLUTELY NO WARRANTY.");
    eprintln!("This is free software, licensed under GPL-3.0-or-later.");
    eprintln!("Source: {}", env!("CARGO_PKG_REPOSITORY"));
    eprintln!();

    let app = resolve_config(&args, &settings);
    if app.mcp_port == 0 || app.revit_port == 0 || app.mcp_port == app.revit_port {
        error!(
            mcp_port = app.mcp_port,
            revit_port = app.revit_port,
            "MCP_PORT and REVIT_PORT must be distinct non-zero ports"
        );
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mcp_port = app.mcp_port,
        revit_port = app.revit_port,
        model = %app.model,
        api_key = %config::mask_secret(&app.api_key),
        "Starting revit-mcp server"
    );
    if app.api_key.is_empty() {
        tracing::warn!("No API key configured; chat requests will fail until one is set");
    }

    let server = match McpServer::new(app) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to create server");
            return ExitCode::FAILURE;
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    match runtime.block_on(server.run()) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn positional_ports_override_settings() {
        let args = Args::parse_from(["revit-mcp", "8000", "8001"]);
        let app = resolve_config(&args, &config::Settings::default());
        assert_eq!(app.mcp_port, 8000);
        assert_eq!(app.revit_port, 8001);
    }

    #[test]
    fn settings_fill_missing_arguments() {
        let args = Args::parse_from(["revit-mcp", "--model", "claude-opus"]);
        let settings = config::Settings {
            revit_port: 9999,
            ..config::Settings::default()
        };
        let app = resolve_config(&args, &settings);
        assert_eq!(app.mcp_port, config::DEFAULT_MCP_PORT);
        assert_eq!(app.revit_port, 9999);
        assert_eq!(app.model, "claude-opus");
    }

    #[test]
    fn log_level_selection() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "bogus"), Level::INFO);
        assert_eq!(get_log_level(1, false, "warn"), Level::DEBUG);
        assert_eq!(get_log_level(2, false, "error"), Level::TRACE);
        assert_eq!(get_log_level(3, false, "error"), Level::TRACE);
    }
}
