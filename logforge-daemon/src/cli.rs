//! CLI argument definitions for logforge-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// logforge event processing daemon.
///
/// Reads JSON lines from stdin, runs them through the configured
/// processing program and writes the results to stdout.
#[derive(Parser, Debug)]
#[command(name = "logforge-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logforge.toml configuration file.
    #[arg(short, long, default_value = "/etc/logforge/logforge.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and compile the program, then exit.
    #[arg(long)]
    pub validate: bool,

    /// Print the script equivalent of every legacy `actions` list and exit.
    #[arg(long)]
    pub upgrade_legacy: bool,
}
