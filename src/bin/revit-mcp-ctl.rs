//! revit-mcp-ctl: connector for the revit-mcp server
//!
//! Starts, stops and probes the server process, sends chat queries to it,
//! and edits the settings file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use revit_mcp::config::{self, Settings, SettingsStore};
use revit_mcp::connector::{
    ConnectorEvents, ExecutableLauncher, HandleRecord, HealthState, McpClient, ProcessManager,
    Registry, StartOutcome, StopOutcome,
};
use revit_mcp::error::{McpError, ProcessError};
use revit_mcp::mcp::protocol::GenerateResponse;
use revit_mcp::mcp::GenerateRequest;

/// Connector for the revit-mcp server.
#[derive(Parser, Debug)]
#[command(name = "revit-mcp-ctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to settings file
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server (no-op if it is already running)
    Start {
        /// Port to listen on (default: from settings)
        #[arg(long)]
        port: Option<u16>,
        /// Port of the Revit RPC handler (default: from settings)
        #[arg(long)]
        revit_port: Option<u16>,
        /// Server executable (default: revit-mcp next to this program)
        #[arg(long, value_name = "PATH")]
        server: Option<PathBuf>,
    },
    /// Stop the server
    Stop {
        /// Port of the server (default: from settings)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show whether the server is running
    Status {
        /// Port of the server (default: from settings)
        #[arg(long, conflicts_with = "all")]
        port: Option<u16>,
        /// Show every server recorded in the registry
        #[arg(long)]
        all: bool,
    },
    /// Start the server if auto-start is enabled and it is not running
    Ensure,
    /// Ask a question about the open Revit model
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
        /// Model override
        #[arg(long)]
        model: Option<String>,
    },
    /// List the server's tools and resources
    Resources,
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the effective settings (API key masked)
    Show,
    /// Change settings, e.g. `set mcp_port=8000 auto_start=false`
    Set {
        /// KEY=VALUE pairs; values are parsed as JSON, falling back to text
        /// (api_key, model and log_level are always text)
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
    /// Print the settings file path
    Path,
}

/// Logs connector events.
struct LogEvents;

impl ConnectorEvents for LogEvents {
    fn on_status_changed(&self, port: u16, state: HealthState) {
        tracing::info!(port, %state, "Server status changed");
    }

    fn on_query_result(&self, result: Result<&GenerateResponse, &McpError>) {
        match result {
            Ok(response) => {
                tracing::debug!(id = %response.id, model = %response.model, "Query answered");
            }
            Err(e) => tracing::debug!(kind = e.kind(), "Query failed"),
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Settings whose values are taken verbatim, even if they look like JSON.
const TEXT_KEYS: [&str; 3] = ["api_key", "model", "log_level"];

/// Parses `KEY=VALUE` pairs into a JSON object.
///
/// Values are read as JSON (`8000`, `false`, `"x"`), and anything that is
/// not valid JSON is taken as a plain string. Values of [`TEXT_KEYS`] are
/// never parsed.
fn parse_pairs(pairs: &[String]) -> Result<Value, String> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{pair}'"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("missing key in '{pair}'"));
        }
        let value = if TEXT_KEYS.contains(&key) {
            Value::String(raw.to_string())
        } else {
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };
        map.insert(key.to_string(), value);
    }
    Ok(Value::Object(map))
}

fn open_store(path: Option<PathBuf>) -> Option<SettingsStore> {
    path.map(SettingsStore::new)
        .or_else(SettingsStore::open_default)
}

fn process_manager(server: Option<PathBuf>) -> Result<ProcessManager, ProcessError> {
    let launcher = match server {
        Some(path) => {
            let launcher = ExecutableLauncher::new(path);
            match config::default_log_path() {
                Some(log) => launcher.with_log_file(log),
                None => launcher,
            }
        }
        None => ExecutableLauncher::locate()?,
    };
    tracing::debug!(executable = %launcher.executable().display(), "Using server executable");

    let mut manager = ProcessManager::new(Arc::new(launcher)).with_events(Arc::new(LogEvents));
    if let Some(registry) = Registry::open_default() {
        manager = manager.with_registry(registry);
    }
    Ok(manager)
}

/// One line of `status` output.
fn describe(record: &HandleRecord, state: HealthState) -> String {
    match record.pid {
        Some(pid) => format!("port {}: {state} (pid {pid})", record.port),
        None => format!("port {}: {state}", record.port),
    }
}

fn report_process_error(error: &ProcessError) {
    eprintln!("Error: {error}");
    match error {
        ProcessError::ExecutableNotFound { .. } => {
            eprintln!("Install revit-mcp next to revit-mcp-ctl, or pass --server <PATH>.");
        }
        ProcessError::PortInUse { port } => {
            eprintln!(
                "Close the program using port {port} or choose another one with `revit-mcp-ctl settings set mcp_port=<PORT>`."
            );
        }
        ProcessError::Unresponsive { .. } => {
            if let Some(log) = config::default_log_path() {
                eprintln!("Check the server log at {}.", log.display());
            }
        }
        _ => {}
    }
}

fn report_query_error(error: &McpError) {
    eprintln!("Error: {}: {error}", error.kind());
    if error.is_connection() {
        eprintln!("Is the server running? Try `revit-mcp-ctl start`, and make sure Revit is open with the RevitMCP extension loaded.");
    }
}

async fn run(command: Command, store: &SettingsStore) -> ExitCode {
    let settings: Settings = store.load();
    match command {
        Command::Start {
            port,
            revit_port,
            server,
        } => {
            let port = port.unwrap_or(settings.mcp_port);
            let revit_port = revit_port.unwrap_or(settings.revit_port);
            let manager = match process_manager(server) {
                Ok(manager) => manager,
                Err(e) => {
                    report_process_error(&e);
                    return ExitCode::FAILURE;
                }
            };
            match manager.start(port, revit_port).await {
                Ok(StartOutcome::Started) => println!("Server started on port {port}"),
                Ok(StartOutcome::AlreadyRunning) => println!("Server already running on port {port}"),
                Ok(StartOutcome::Adopted) => println!("Found a running server on port {port}"),
                Err(e) => {
                    report_process_error(&e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Command::Stop { port } => {
            let port = port.unwrap_or(settings.mcp_port);
            let manager = match process_manager(None) {
                Ok(manager) => manager,
                Err(e) => {
                    report_process_error(&e);
                    return ExitCode::FAILURE;
                }
            };
            match manager.stop(port).await {
                Ok(StopOutcome::NotRunning) => println!("No server recorded on port {port}"),
                Ok(StopOutcome::Graceful) => println!("Server on port {port} stopped"),
                Ok(StopOutcome::Forced) => println!("Server on port {port} terminated"),
                Err(e) => {
                    report_process_error(&e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Command::Status { port, all } => {
            let manager = match process_manager(None) {
                Ok(manager) => manager,
                Err(e) => {
                    report_process_error(&e);
                    return ExitCode::FAILURE;
                }
            };
            if all {
                let records = manager.handles().await;
                if records.is_empty() {
                    println!("No servers recorded");
                }
                for record in records {
                    let state = manager.status(record.port).await;
                    println!("{}", describe(&record, state));
                }
                return ExitCode::SUCCESS;
            }

            let port = port.unwrap_or(settings.mcp_port);
            let state = manager.status(port).await;
            match manager.handle(port).await {
                Some(record) => println!("{}", describe(&record, state)),
                None => println!("port {port}: {state}"),
            }
            if state != HealthState::Running {
                return ExitCode::FAILURE;
            }
        }
        Command::Ensure => {
            let manager = match process_manager(None) {
                Ok(manager) => manager,
                Err(e) => {
                    report_process_error(&e);
                    return ExitCode::FAILURE;
                }
            };
            match manager.ensure_running(&settings).await {
                Ok(true) => println!("Server running on port {}", settings.mcp_port),
                Ok(false) => {
                    println!("Server not running (auto_start is off)");
                    return ExitCode::FAILURE;
                }
                Err(e) => {
                    report_process_error(&e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Command::Ask { prompt, model } => {
            let client = match McpClient::new(settings.mcp_port) {
                Ok(client) => client.with_events(Arc::new(LogEvents)),
                Err(e) => {
                    report_query_error(&e);
                    return ExitCode::FAILURE;
                }
            };
            let mut request = GenerateRequest::from_prompt(prompt.join(" "));
            request.model = model;
            match client.generate(&request).await {
                Ok(response) => println!("{}", response.content),
                Err(e) => {
                    report_query_error(&e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Command::Resources => {
            let resources = match McpClient::new(settings.mcp_port) {
                Ok(client) => client.resources().await,
                Err(e) => Err(e),
            };
            match resources {
                Ok(resources) => {
                    for r in resources {
                        let kind = serde_json::to_value(r.kind)
                            .ok()
                            .and_then(|v| v.as_str().map(str::to_string))
                            .unwrap_or_default();
                        println!("{kind:<9} {:<32} {}", r.name, r.description);
                    }
                }
                Err(e) => {
                    report_query_error(&e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Command::Settings { action } => return run_settings(&action, store),
    }
    ExitCode::SUCCESS
}

fn run_settings(action: &SettingsAction, store: &SettingsStore) -> ExitCode {
    match action {
        SettingsAction::Show => {
            let mut shown = store.load();
            shown.api_key = shown.masked_api_key();
            match serde_json::to_string_pretty(&shown) {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        SettingsAction::Set { pairs } => {
            let partial = match parse_pairs(pairs) {
                Ok(partial) => partial,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            match store.save(partial) {
                Ok(_) => println!("Saved {}", store.path().display()),
                Err(e) => {
                    let error = McpError::from(e);
                    eprintln!("Error: {}: {error}", error.kind());
                    return ExitCode::FAILURE;
                }
            }
        }
        SettingsAction::Path => println!("{}", store.path().display()),
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let Some(store) = open_store(cli.settings.clone()) else {
        eprintln!("Error: no home directory found; pass --settings <FILE>");
        return ExitCode::FAILURE;
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    runtime.block_on(run(cli.command, &store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn pairs_parse_json_then_text() {
        let value = parse_pairs(&[
            "mcp_port=8000".to_string(),
            "auto_start=false".to_string(),
            "model=claude-opus".to_string(),
            "api_key=sk=with=equals".to_string(),
        ])
        .unwrap();
        assert_eq!(value["mcp_port"], 8000);
        assert_eq!(value["auto_start"], false);
        assert_eq!(value["model"], "claude-opus");
        assert_eq!(value["api_key"], "sk=with=equals");
    }

    #[test]
    fn text_settings_are_never_parsed() {
        let value = parse_pairs(&[
            "api_key=123456".to_string(),
            "model=3.5".to_string(),
            "log_level=null".to_string(),
            "revit_port=9877".to_string(),
        ])
        .unwrap();
        assert_eq!(value["api_key"], "123456");
        assert_eq!(value["model"], "3.5");
        assert_eq!(value["log_level"], "null");
        assert_eq!(value["revit_port"], 9877);
    }

    #[test]
    fn status_all_conflicts_with_port() {
        let cli = Cli::parse_from(["revit-mcp-ctl", "status", "--all"]);
        assert!(matches!(cli.command, Command::Status { port: None, all: true }));
        assert!(Cli::try_parse_from(["revit-mcp-ctl", "status", "--all", "--port", "8000"]).is_err());
    }

    #[test]
    fn status_lines_show_pid_when_known() {
        let mut record = HandleRecord {
            port: 8000,
            companion_port: 9877,
            pid: Some(4242),
            started_at: 0,
            state: HealthState::Running,
        };
        assert_eq!(
            describe(&record, HealthState::Running),
            format!("port 8000: {} (pid 4242)", HealthState::Running)
        );
        record.pid = None;
        assert_eq!(
            describe(&record, HealthState::Crashed),
            format!("port 8000: {}", HealthState::Crashed)
        );
    }

    #[test]
    fn pairs_require_equals() {
        assert!(parse_pairs(&["mcp_port".to_string()]).is_err());
        assert!(parse_pairs(&["=1".to_string()]).is_err());
    }

    #[test]
    fn ask_joins_words() {
        let cli = Cli::parse_from(["revit-mcp-ctl", "ask", "list", "all", "walls"]);
        let Command::Ask { prompt, .. } = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(prompt.join(" "), "list all walls");
    }
}
