pub mod config;
pub mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "zapscribe")]
#[command(author, version, about = "WhatsApp voice note transcription bot")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "ZAPSCRIBE_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the bridge and start transcribing voice notes
    Run,

    /// Configuration management
    Config(config::ConfigArgs),
}
