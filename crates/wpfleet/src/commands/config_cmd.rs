//! Config command handlers.

use std::path::{Path, PathBuf};

use wpfleet_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

fn target_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(config::config_path)
}

fn render(cfg: &Config, format: &OutputFormat) -> Result<String, CliError> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(cfg)
            .map_err(|e| CliError::Io(std::io::Error::other(e)))?,
        OutputFormat::JsonCompact => {
            serde_json::to_string(cfg).map_err(|e| CliError::Io(std::io::Error::other(e)))?
        }
        OutputFormat::Yaml => {
            serde_yaml::to_string(cfg).map_err(|e| CliError::Io(std::io::Error::other(e)))?
        }
        OutputFormat::Table | OutputFormat::Plain => config::to_toml(cfg)?,
    };
    Ok(rendered)
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match &args.command {
        ConfigCommand::Show => {
            let cfg = config::load_config(global.config.as_deref())?;
            output::print_output(render(&cfg, &global.output)?.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&target_path(global).display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = target_path(global);
            init(&path, *force)?;
            if !global.quiet {
                eprintln!("Wrote default configuration to {}", path.display());
            }
            Ok(())
        }
    }
}

fn init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::ConfigExists {
            path: path.display().to_string(),
        });
    }
    config::save_config(&Config::default(), path)?;
    Ok(())
}
