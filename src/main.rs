// ABOUTME: Entry point for the sshplex CLI application.
// ABOUTME: Parses arguments and dispatches to the shell and exec handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use sshplex::error::Result;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Shell { connect } => {
            let profile = commands::resolve_profile(&connect)?;
            commands::shell_command(&profile)
        }
        Commands::Exec { connect, command } => {
            let profile = commands::resolve_profile(&connect)?;
            commands::exec_command(&profile, &command)
        }
    }
}
