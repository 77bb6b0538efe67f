//! Tether CLI: drive local MCP tool servers from the terminal.

mod command;
mod prompt;
mod render;
mod style;

use anyhow::{Result, bail};
use clap::Parser;
use command::Command;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tether_config::{CliOverrides, TetherConfig};
use tether_mcp::{Invoker, Launcher, Registry, StdioLauncher};

#[derive(Parser)]
#[command(name = "tether", version, about = "Interactive client for MCP tool servers")]
struct Cli {
    /// Path to a config file (TOML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run one command and exit (e.g. -c 'tools echo')
    #[arg(short, long)]
    command: Option<String>,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    call_timeout_ms: Option<u64>,

    /// Connect to every configured server at startup
    #[arg(long)]
    connect_all: bool,

    /// Run tool calls without asking for confirmation
    #[arg(short, long)]
    yes: bool,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

/// What the loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Failed,
    Exit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = TetherConfig::load(CliOverrides {
        config_path: cli.config,
        call_timeout_ms: cli.call_timeout_ms,
        confirm_calls: cli.yes.then_some(false),
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    if config.mcp.servers.is_empty() {
        let searched: Vec<String> = config
            .searched
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        bail!(
            "No MCP servers configured. Looked in: {}",
            searched.join(", ")
        );
    }
    if let Some(source) = &config.source {
        tracing::info!("Using config {}", source.display());
    }

    let launcher: Arc<dyn Launcher> = Arc::new(StdioLauncher::default());
    let invoker = Invoker::new(Registry::from_config(&config.mcp, launcher, config.session));

    if cli.connect_all {
        connect_all(&invoker).await;
    }

    let outcome = match &cli.command {
        Some(line) => run_once(&invoker, line, config.confirm_calls).await,
        None => repl(&invoker, config.confirm_calls).await,
    };

    for failure in invoker.shutdown().await {
        eprintln!("{}", render::failure(&failure));
    }
    outcome
}

async fn connect_all(invoker: &Invoker) {
    let names: Vec<String> = invoker
        .list_servers()
        .await
        .into_iter()
        .map(|s| s.name)
        .collect();
    eprintln!("{}", style::info(&format!("Found {} servers in configuration.", names.len())));
    for name in names {
        execute(invoker, Command::Connect(name), false).await;
    }
}

async fn run_once(invoker: &Invoker, line: &str, confirm: bool) -> Result<()> {
    let command = Command::parse(line).map_err(|e| anyhow::anyhow!(e))?;
    match execute(invoker, command, confirm).await {
        Flow::Failed => bail!("command failed: {line}"),
        Flow::Continue | Flow::Exit => Ok(()),
    }
}

async fn repl(invoker: &Invoker, confirm: bool) -> Result<()> {
    let stdin = io::stdin();

    eprintln!("{}", render::banner());
    eprintln!("tether v{}", env!("CARGO_PKG_VERSION"));

    loop {
        eprint!("\n{}", style::prompt());
        io::stderr().flush()?;

        let mut input = String::new();
        let bytes_read = stdin.lock().read_line(&mut input)?;
        if bytes_read == 0 {
            eprintln!();
            break;
        }

        let command = match Command::parse(&input) {
            Ok(command) => command,
            Err(message) => {
                eprintln!("{}", style::warning(&message));
                continue;
            }
        };

        if execute(invoker, command, confirm).await == Flow::Exit {
            eprintln!("{}", style::info("Exiting..."));
            break;
        }
    }

    Ok(())
}

async fn execute(invoker: &Invoker, command: Command, confirm: bool) -> Flow {
    match command {
        Command::Empty => Flow::Continue,
        Command::Exit => Flow::Exit,
        Command::Help => {
            eprintln!("{}", render::help());
            Flow::Continue
        }
        Command::Servers => {
            println!("{}", render::servers(&invoker.list_servers().await));
            Flow::Continue
        }
        Command::Connect(server) => {
            eprintln!("{}", style::info(&format!("Connecting to {server} MCP server...")));
            let connected = match invoker.connect(&server).await {
                Ok(info) => invoker
                    .list_tools(&server)
                    .await
                    .map(|tools| (info, tools.len())),
                Err(failure) => Err(failure),
            };
            report(connected.map(|(info, count)| render::connected(&server, &info, count)))
        }
        Command::Tools(server) => report(
            invoker
                .list_tools(&server)
                .await
                .map(|tools| render::tools(&server, &tools)),
        ),
        Command::Info { server, tool } => match tool {
            Some(tool) => report(
                invoker
                    .describe_tool(&server, &tool)
                    .await
                    .map(|tool| render::tool_details(&tool)),
            ),
            None => report(invoker.list_tools(&server).await.map(|tools| {
                tools
                    .iter()
                    .map(render::tool_details)
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })),
        },
        Command::Resources(server) => report(
            invoker
                .list_resources(&server)
                .await
                .map(|resources| render::resources(&server, &resources)),
        ),
        Command::Refresh(server) => report(
            invoker
                .refresh_tools(&server)
                .await
                .map(|tools| render::tools(&server, &tools)),
        ),
        Command::Disconnect(server) => report(
            invoker
                .disconnect(&server)
                .await
                .map(|()| style::success(&format!("Disconnected from {server}"))),
        ),
        Command::Call {
            server,
            tool,
            arguments,
        } => call(invoker, &server, &tool, arguments, confirm).await,
    }
}

async fn call(
    invoker: &Invoker,
    server: &str,
    tool: &str,
    arguments: Option<serde_json::Value>,
    confirm: bool,
) -> Flow {
    let arguments = match arguments {
        Some(arguments) => arguments,
        None => {
            let descriptor = match invoker.describe_tool(server, tool).await {
                Ok(descriptor) => descriptor,
                Err(failure) => return report(Err(failure)),
            };
            match prompt::prompt_arguments(&descriptor).await {
                Ok(Some(arguments)) => arguments,
                Ok(None) => {
                    eprintln!("{}", style::warning("Tool call cancelled."));
                    return Flow::Continue;
                }
                Err(message) => {
                    eprintln!("{}", style::error(&message));
                    eprintln!("{}", style::warning("Tool call aborted."));
                    return Flow::Failed;
                }
            }
        }
    };

    if confirm {
        eprintln!("{}", style::info("Arguments:"));
        eprintln!("{}", render::pretty(&arguments));
        if !prompt::confirm_call(tool, &arguments).await {
            eprintln!("{}", style::warning("Tool execution cancelled."));
            return Flow::Continue;
        }
    }

    let started = Instant::now();
    let result = invoker.call_tool(server, tool, arguments).await;
    let elapsed = started.elapsed().as_secs_f64();

    println!("{}", render::call_result(tool, &result, elapsed));
    if result.is_success() {
        Flow::Continue
    } else {
        Flow::Failed
    }
}

/// Print a rendered success to stdout or a failure to stderr.
fn report(outcome: tether_types::Outcome<String>) -> Flow {
    match outcome {
        Ok(text) => {
            println!("{text}");
            Flow::Continue
        }
        Err(failure) => {
            eprintln!("{}", render::failure(&failure));
            Flow::Failed
        }
    }
}
