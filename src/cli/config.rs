use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::fs;

use crate::config::Config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default config file to the standard location
    Init,
}

pub async fn run(args: ConfigArgs, config_path: Option<&str>) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            let config = Config::load(config_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigCommands::Init => {
            let path = Config::default_path()?;
            if path.exists() {
                anyhow::bail!("Config file already exists at {}", path.display());
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let rendered = toml::to_string_pretty(&Config::default())?;
            fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}
