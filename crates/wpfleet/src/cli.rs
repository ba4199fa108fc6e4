//! Clap derive structures for the `wpfleet` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// wpfleet -- run and manage WordPress site fleets
#[derive(Debug, Parser)]
#[command(
    name = "wpfleet",
    version,
    about = "Run and manage WordPress site fleets",
    long_about = "Provision WordPress sites as Docker Compose projects and manage their lifecycle.\n\n\
        `wpfleet serve` runs the backend; `wpfleet sites ...` talks to one.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "WPFLEET_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Backend URL (overrides api_base_url / WPFLEET_API_BASE_URL)
    #[arg(long, short = 'u', global = true)]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Request timeout in seconds (overrides client.timeout_secs)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage sites on a running backend
    #[command(alias = "s")]
    Sites(SitesArgs),

    /// Run the backend
    Serve(ServeArgs),

    /// Inspect or create the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Sites ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SitesArgs {
    #[command(subcommand)]
    pub command: SitesCommand,
}

/// Block until the command's outcome is known.
#[derive(Debug, Args)]
pub struct WaitArgs {
    /// Wait until the site settles
    #[arg(long, short = 'w')]
    pub wait: bool,

    /// Give up waiting after this long (e.g. "90s", "5m")
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    pub wait_timeout: Duration,
}

#[derive(Debug, Subcommand)]
pub enum SitesCommand {
    /// List all sites
    #[command(alias = "ls")]
    List,

    /// Show one site
    Get {
        /// Site ID (e.g. s1)
        id: String,
    },

    /// Create a site; provisioning starts in the background
    Create {
        /// Site name
        #[arg(long)]
        name: String,

        /// Site description
        #[arg(long)]
        description: String,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Start a site
    Start {
        /// Site ID
        id: String,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Stop a running site
    Stop {
        /// Site ID
        id: String,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Delete a stopped site and its data
    #[command(alias = "rm")]
    Delete {
        /// Site ID
        id: String,
    },

    /// Follow site changes until interrupted
    Watch,
}

// ── Serve ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address (overrides server.listen_addr)
    #[arg(long, short = 'l')]
    pub listen: Option<String>,

    /// Data directory (overrides server.data_dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Provisioner (overrides server.provisioner)
    #[arg(long)]
    pub provisioner: Option<ProvisionerArg>,

    /// Host name used in site URLs (overrides server.public_host)
    #[arg(long)]
    pub public_host: Option<String>,

    /// Do not start sites right after creation
    #[arg(long)]
    pub no_auto_start: bool,

    /// Log line format on stderr
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Also write JSON logs to a daily-rotated file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProvisionerArg {
    /// docker compose on this host
    Compose,
    /// In-process simulation, no containers
    Simulated,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration (file + environment)
    Show,

    /// Print the config file location
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
