//! Steward CLI - headless driver for the tool-execution core.
//!
//! `steward run` reads one JSON `ToolCall` per line on stdin and writes one
//! JSON result per line on stdout. Logs go to stderr so stdout stays a clean
//! result stream.
//!
//! ```text
//! stdin (NDJSON ToolCall) -> ToolInvoker::invoke -> stdout (NDJSON result)
//!                                 |
//!                                 v
//!                 ToolEvent bus -> responder (prompt / fixed decision)
//! ```

mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use steward_config::ConfigSettings;
use steward_tools::host::{
    HostServices, InMemoryEditors, RecordingSettings, StaticDiagnostics, StaticProject,
};
use steward_tools::{ShellTerminal, ToolInvoker, UiScheduler, builtin_registry};
use steward_types::{Diagnostic, ToolCall};

use crate::prompt::{DecideMode, spawn_responder};

#[derive(Debug, Parser)]
#[command(name = "steward", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the tool manifest (function-calling definitions) as JSON
    Tools,
    /// Execute NDJSON tool calls from stdin
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Active project root; relative tool paths resolve against it
    #[arg(long)]
    project: Option<PathBuf>,
    /// Config file (defaults to ~/.steward/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON array of diagnostics served to the error tools
    #[arg(long)]
    diagnostics: Option<PathBuf>,
    /// How permission requests are answered
    #[arg(long, value_enum, default_value_t = DecideMode::Ask)]
    decide: DecideMode,
    /// What happens to open edit sessions at end of input
    #[arg(long, value_enum, default_value_t = FinishMode::Keep)]
    finish: FinishMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FinishMode {
    Keep,
    Accept,
    Undo,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ConfigSettings> {
    let config = match path {
        Some(path) => ConfigSettings::load_from(path)?,
        None => ConfigSettings::load()?,
    };
    Ok(config)
}

fn load_diagnostics(path: Option<&PathBuf>) -> Result<Vec<Diagnostic>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read diagnostics {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse diagnostics {}", path.display()))
}

fn print_manifest() -> Result<()> {
    let registry = builtin_registry()?;
    println!("{}", serde_json::to_string_pretty(&registry.definitions())?);
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let settings = load_config(args.config.as_ref())?.into_tool_settings();
    let diagnostics = load_diagnostics(args.diagnostics.as_ref())?;

    let host = HostServices {
        editors: Arc::new(InMemoryEditors::new()),
        project: Arc::new(StaticProject::new(args.project.clone())),
        diagnostics: Arc::new(StaticDiagnostics::new(diagnostics)),
        terminal: Arc::new(ShellTerminal::new(settings.terminal.shell.clone())),
        settings: Arc::new(RecordingSettings::new()),
    };
    let scheduler = Arc::new(UiScheduler::start().context("failed to start UI scheduler")?);
    let invoker = ToolInvoker::new(builtin_registry()?, host, settings, scheduler);
    let responder = spawn_responder(invoker.subscribe(), args.decide);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<ToolCall>(&line) {
            Ok(call) => handle_call(&invoker, &call).await,
            Err(e) => json!({ "error": format!("invalid tool call: {e}") }),
        };
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    match args.finish {
        FinishMode::Keep => {
            let open = invoker.files().sessions();
            for session in &open {
                tracing::info!(
                    path = %session.path().display(),
                    edits = session.edit_count(),
                    "edit session left open"
                );
            }
        }
        FinishMode::Accept => {
            let accepted = invoker.files().accept_all().await;
            tracing::info!(accepted, "accepted edit sessions");
        }
        FinishMode::Undo => {
            let undone = invoker.files().undo_all().await;
            tracing::info!(undone, "undid edit sessions");
        }
    }

    drop(invoker);
    responder.abort();
    Ok(())
}

async fn handle_call(invoker: &ToolInvoker, call: &ToolCall) -> Value {
    match invoker.invoke(call).await {
        Ok(result) => json!({ "id": call.id, "name": call.name, "result": result }),
        Err(e) => {
            tracing::warn!(tool = %call.name, error = %e, "tool call rejected");
            json!({ "id": call.id, "name": call.name, "error": e.to_string() })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Tools => print_manifest(),
        Commands::Run(args) => run(args).await,
    }
}
