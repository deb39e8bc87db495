mod config;
mod error;

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use planner::{Outcome, ParsedEvent};
use runtime::ToolLayer;
use tracing_subscriber::EnvFilter;

use error::{Error, Result};

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Run planner commands against local and remote tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (TOML or JSON). Defaults to $TOOLBRIDGE_CONFIG, then ./toolbridge.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every available tool
    Tools,
    /// Parse planner output and execute its commands
    Run {
        /// File with planner output; stdin when omitted
        file: Option<PathBuf>,
        /// Print events as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse planner output without executing anything
    Check {
        /// File with planner output; stdin when omitted
        file: Option<PathBuf>,
    },
    /// Execute one tool with positional arguments
    Call {
        /// Tool name
        name: String,
        /// Arguments, in the order of the tool's parameters
        args: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Tools => with_layer(config, cmd_tools),
        Commands::Run { file, json } => {
            let mut events = planner::parse(&read_input(file.as_deref())?)?;
            with_layer(config, |layer| cmd_run(layer, &mut events, json))
        }
        Commands::Check { file } => cmd_check(&read_input(file.as_deref())?),
        Commands::Call { name, args } => with_layer(config, |layer| cmd_call(layer, &name, &args)),
    }
}

/// Start a layer, run `f`, and stop the layer whatever `f` returned.
fn with_layer<F>(config: Option<&Path>, f: F) -> Result<()>
where
    F: FnOnce(&ToolLayer) -> Result<()>,
{
    let config = config::load(config)?;
    let layer = ToolLayer::new();
    let result = layer.start(config).map_err(Error::from).and_then(|()| f(&layer));
    layer.shutdown();
    result
}

fn cmd_tools(layer: &ToolLayer) -> Result<()> {
    for tool in layer.list_tools() {
        println!("{}: {}", tool.name, tool.description);
    }
    Ok(())
}

fn cmd_run(layer: &ToolLayer, events: &mut [ParsedEvent], json: bool) -> Result<()> {
    let dispatched = planner::dispatch(layer, events);

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
    } else {
        for event in events.iter().filter(|e| e.result.is_some()) {
            print_event(event);
        }
    }

    match dispatched? {
        Outcome::Completed { .. } => Ok(()),
        Outcome::Halted { line, message } => Err(Error::Halted { line, message }),
    }
}

fn cmd_check(input: &str) -> Result<()> {
    for event in planner::parse(input)? {
        println!("{:>4}  {event}", event.line_number);
    }
    Ok(())
}

fn cmd_call(layer: &ToolLayer, name: &str, args: &[String]) -> Result<()> {
    let args = layer.bind(name, args)?;
    let result = layer.execute(name, args)?;
    println!("{}", planner::render_result(&result));
    Ok(())
}

fn print_event(event: &ParsedEvent) {
    println!("[line {}] {event}", event.line_number);
    if let Some(result) = &event.result {
        for line in planner::render_result(result).lines() {
            println!("    {line}");
        }
    }
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut input = String::new();
            io::stdin().read_to_string(&mut input)?;
            Ok(input)
        }
    }
}
