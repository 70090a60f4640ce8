// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the shell and exec subcommands and their connection arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sshplex")]
#[command(about = "Blocking SSH client with multiplexed channels")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open an interactive shell on the remote host
    Shell {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Run a command on the remote host and exit with its status
    Exec {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Destination as [user@]host[:port]; defaults to the profile's host
    #[arg(short, long)]
    pub destination: Option<String>,

    /// Connection profile (default: sshplex.yml in the current directory)
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Remote port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Remote user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Preferred cipher; repeat to list several in order
    #[arg(long = "cipher")]
    pub ciphers: Vec<String>,

    /// Terminal type requested for the pseudo-terminal
    #[arg(long)]
    pub term: Option<String>,

    /// Connection timeout, e.g. "10s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Private key file to authenticate with
    #[arg(short, long)]
    pub identity: Option<PathBuf>,

    /// Keepalive interval, e.g. "30s"; "0s" disables keepalives
    #[arg(long, value_parser = humantime::parse_duration)]
    pub keepalive: Option<Duration>,
}
