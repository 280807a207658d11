use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "resolver-server",
    about = "Resolves catalog ids to playable streams through embed providers",
    version
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all logging except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to bind, overriding the configuration
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, overriding the configuration
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Resolve one title and print the result as JSON
    Resolve {
        /// Catalog id, e.g. 550
        id: String,

        /// movie or tv
        #[arg(short = 't', long = "type", default_value = "movie")]
        media_type: String,

        #[arg(short, long)]
        season: Option<u32>,

        #[arg(short, long)]
        episode: Option<u32>,

        /// Try only this provider
        #[arg(long)]
        provider: Option<String>,

        /// Catalog the id belongs to
        #[arg(long)]
        id_system: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Show,
    /// Print where the configuration file is looked up
    Path,
}
