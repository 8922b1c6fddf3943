//! Clap derive structures for the `edgeward` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// edgeward -- keeps a router's network configuration in line with its
/// control plane
#[derive(Debug, Parser)]
#[command(
    name = "edgeward",
    version,
    about = "Network configuration agent for managed edge devices",
    long_about = "Long-running agent that receives desired network configuration\n\
        (routes, NAT, firewall, VPN, dynamic DNS) from a control plane and\n\
        converges the device to it, or only reports what it would change\n\
        while in shadow mode.",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Command>,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (default: /etc/edgeward/agent.toml, else the
    /// per-user config directory)
    #[arg(long, short = 'c', env = "EDGEWARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, env = "EDGEWARD_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "EDGEWARD_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the agent until SIGINT or SIGTERM
    Run,

    /// Load and validate the configuration, then print it with secrets masked
    #[command(alias = "check")]
    CheckConfig,

    /// Show what a desired-state file would change on this device, without
    /// changing anything
    Plan(PlanArgs),
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Desired-state document (JSON, or YAML with a .yaml/.yml extension)
    pub file: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "json")]
    pub output: OutputFormat,
}
