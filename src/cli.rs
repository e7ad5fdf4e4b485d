use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "rocketchat2matrix")]
#[command(about = "Migrate a Rocket.Chat export into a Matrix homeserver")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file path
    #[arg(long, short = 'c', global = true, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Register users and record their room memberships
    Users,
    /// Create rooms and direct message rooms
    Rooms,
    /// Send messages into migrated rooms
    Messages {
        /// Message export to read instead of the configured one
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Publish m.direct account data for every migrated user
    DirectMessages,
    /// Mark the last message of every thread as read
    MarkRead {
        /// Message export to read instead of the configured one
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Add e-mail addresses and e-mail notification pushers
    Notifications,
    /// Run every phase in order
    All,
}
