//! vmagent CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

/// vmagent - game server VM host agent
#[derive(Parser, Debug)]
#[command(name = "vmagent")]
#[command(about = "Game server VM host agent")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent.
    Serve(cli::serve::ServeCmd),

    /// Print the persisted state with secrets removed.
    State(cli::state::StateCmd),

    /// Validate an assignment document.
    Validate(cli::validate::ValidateCmd),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to info
    init_logging(cli.log_json);

    tracing::debug!(version = vmagent::VERSION, "starting vmagent");

    let result = match cli.command {
        Commands::Serve(cmd) => cmd.run(),
        Commands::State(cmd) => cmd.run(),
        Commands::Validate(cmd) => cmd.run(),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vmagent=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
