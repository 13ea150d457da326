use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use qapilot::config::Config;
use tokio::fs;

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration, environment overrides included
    Show,

    /// Validate the configuration file
    Validate,

    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            match ctx.loaded_from() {
                Some(path) => println!("Current configuration ({}):", path.display()),
                None => println!("Current configuration (defaults):"),
            }
            println!("{}", serde_yaml::to_string(ctx.config())?);
        }
        ConfigAction::Validate => {
            ctx.config().validate()?;
            match ctx.loaded_from() {
                Some(path) => println!("Configuration file {} is valid", path.display()),
                None => println!("No configuration file found; defaults are valid"),
            }
        }
        ConfigAction::Init { force } => {
            let path = ctx.config_path();
            if !force && fs::try_exists(&path).await.unwrap_or(false) {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let serialized = serde_yaml::to_string(&Config::default())?;
            fs::write(&path, serialized)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Default configuration written to {}", path.display());
        }
    }

    Ok(())
}
