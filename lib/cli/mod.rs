use crate::build_info;
use crate::commands::{RegisterArgs, ServeArgs};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Incremental release/tag loader for GitHub repositories",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume repository work messages until SIGTERM/SIGINT
    Serve(ServeArgs),
    /// Register a repository by its GitHub link and enqueue its first sync
    Register(RegisterArgs),
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
