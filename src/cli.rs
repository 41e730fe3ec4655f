//! Command-line interface.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "taskqd")]
#[command(about = "Distributed task queue with lease-based coordination")]
#[command(version)]
pub struct Cli {
    /// Path to config file (YAML)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Database file path (overrides config)
    #[arg(short, long)]
    pub database: Option<String>,

    /// API port (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Worker identity for lease ownership (overrides config)
    #[arg(short, long)]
    pub worker_id: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output: 0/off = disabled, 1/stdout, 2/stderr, or a file path
    #[arg(long, default_value = "2")]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the queue server (default)
    Serve,
}
