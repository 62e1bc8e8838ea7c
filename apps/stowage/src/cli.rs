//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stowage_sync::Direction;

#[derive(Debug, Parser)]
#[command(name = "stowage", version)]
#[command(about = "Sync a local directory with an S3 bucket by content fingerprint")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file
    #[arg(long, global = true, env = "STOWAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Transfer files whose remote copy cannot be verified
    #[arg(long, global = true)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Upload local files that differ from the bucket
    Push,
    /// Download remote objects that differ from the local tree
    Pull,
}

impl Command {
    pub fn direction(self) -> Direction {
        match self {
            Command::Push => Direction::Push,
            Command::Pull => Direction::Pull,
        }
    }
}
