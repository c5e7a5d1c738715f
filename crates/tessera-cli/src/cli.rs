use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Tessera operator tools: configuration, circuit breakers, audit archive",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Inspect configuration files
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Inspect or reset shared circuit breaker state
    #[command(subcommand)]
    Breaker(BreakerCommand),
    /// Check the write-once audit archive
    #[command(subcommand)]
    Archive(ArchiveCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Load, apply environment overrides, and validate a config file
    Check(ConfigCheckArgs),
}

#[derive(Args)]
pub struct ConfigCheckArgs {
    pub path: PathBuf,
}

#[derive(Subcommand)]
pub enum BreakerCommand {
    /// Show every breaker with stored state
    Status(BreakerStatusArgs),
    /// Close a breaker and clear its counters
    Reset(BreakerResetArgs),
}

#[derive(Args)]
pub struct BreakerStatusArgs {
    #[arg(long)]
    pub state_dir: PathBuf,
}

#[derive(Args)]
pub struct BreakerResetArgs {
    pub name: String,
    #[arg(long)]
    pub state_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum ArchiveCommand {
    /// Recompute the hash of every archived event
    Verify(ArchiveVerifyArgs),
}

#[derive(Args)]
pub struct ArchiveVerifyArgs {
    #[arg(long)]
    pub archive_dir: PathBuf,
    /// Only this UTC day (YYYY-MM-DD)
    #[arg(long)]
    pub date: Option<NaiveDate>,
}
