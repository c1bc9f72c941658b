mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, cmd_build, cmd_graph, cmd_info, cmd_plan, cmd_test};
use output::{OutputFormat, print_error};

/// Exit code for errors raised before any action runs.
const CONFIG_ERROR: u8 = 2;

/// kiln - hermetic multi-language build graph engine
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  /// Workspace file or directory (default: nearest kiln.toml)
  #[arg(short = 'C', long, global = true)]
  workspace: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build targets and their dependencies
  Build(BuildArgs),

  /// Build and run test targets
  Test(BuildArgs),

  /// Show the actions a build would run
  Plan(BuildArgs),

  /// Show the target graph
  Graph {
    /// Targets to show (default: all)
    targets: Vec<String>,

    /// Print the whole graph as Graphviz dot
    #[arg(long)]
    dot: bool,
  },

  /// Display host and workspace information
  Info,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let workspace = cli.workspace.as_deref();
  let verbose = cli.verbose > 0;

  let result = match &cli.command {
    Commands::Build(args) => cmd_build(workspace, args, cli.output, verbose),
    Commands::Test(args) => cmd_test(workspace, args, cli.output, verbose),
    Commands::Plan(args) => cmd_plan(workspace, args, cli.output),
    Commands::Graph { targets, dot } => cmd_graph(workspace, targets, *dot, cli.output),
    Commands::Info => cmd_info(workspace, cli.output),
  };

  match result {
    Ok(code) => ExitCode::from(code),
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::from(CONFIG_ERROR)
    }
  }
}

fn init_tracing(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
