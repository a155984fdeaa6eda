//! Clap derive structures for the `modcfg` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// modcfg -- read, edit and watch Deckhouse module configuration
#[derive(Debug, Parser)]
#[command(
    name = "modcfg",
    version,
    about = "Manage Deckhouse module configuration from the command line",
    long_about = "Reads and updates the deckhouse ModuleConfig through the cluster UI backend.\n\n\
        Values are served from a local cache that is invalidated by the backend's\n\
        GroupResourceChannel, so `watch` reflects changes made elsewhere.",
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
    /// Configuration profile to use
    #[arg(long, short = 'p', env = "MODCFG_PROFILE", global = true)]
    pub profile: Option<String>,

    /// UI backend URL (overrides profile)
    #[arg(long, short = 's', env = "MODCFG_SERVER", global = true)]
    pub server: Option<String>,

    /// Bearer token
    #[arg(long, env = "MODCFG_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "MODCFG_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "MODCFG_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "MODCFG_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output Enum ──────────────────────────────────────────────────────

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

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch and show a module config
    Get(GetArgs),

    /// Show or change deckhouse settings
    #[command(alias = "s")]
    Settings(SettingsArgs),

    /// Follow changes pushed by the backend
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Shared Target Arguments ──────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// ModuleConfig name
    #[arg(long, short = 'n', default_value = "deckhouse")]
    pub name: String,
}

// ── Get ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

// ── Settings ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Show current settings
    Show(TargetArgs),

    /// Change settings and save
    Set(SettingsSetArgs),
}

#[derive(Debug, Args)]
pub struct SettingsSetArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Release channel (e.g. Alpha, Beta, EarlyAccess, Stable, RockSolid)
    #[arg(long)]
    pub release_channel: Option<String>,

    /// Log level (Debug, Info, Error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Module bundle (Default, Minimal, Managed)
    #[arg(long)]
    pub bundle: Option<String>,

    /// Update mode (Auto, Manual)
    #[arg(long)]
    pub release_mode: Option<String>,

    /// Disruptive update approval (Auto, Manual)
    #[arg(long)]
    pub disruption_approval_mode: Option<String>,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Exit after this many refreshes
    #[arg(long)]
    pub count: Option<usize>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the resolved configuration (secrets masked)
    Show,

    /// Print the configuration file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
