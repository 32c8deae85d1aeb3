//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use labsync_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str =
    "data_dir, server_host, server_port, secure, reconnect_delay_ms, error_grace_ms, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "server_host": config.server_host,
                    "server_port": config.server_port,
                    "secure": config.secure,
                    "reconnect_delay_ms": config.reconnect_delay_ms,
                    "error_grace_ms": config.error_grace_ms,
                    "log_file": config.log_file,
                    "server_url": config.server_url(),
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:           {}", config.data_dir.display());
            println!(
                "  server_host:        {}",
                config.server_host.as_deref().unwrap_or("(not set)")
            );
            println!("  server_port:        {}", config.server_port);
            println!("  secure:             {}", config.secure);
            println!("  reconnect_delay_ms: {}", config.reconnect_delay_ms);
            println!("  error_grace_ms:     {}", config.error_grace_ms);
            println!(
                "  log_file:           {}",
                config.log_path().display()
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Apply one `key = value` assignment
fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";

    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "server_host" => {
            config.server_host = if unset { None } else { Some(value.to_string()) };
        }
        "server_port" => {
            config.server_port = value
                .parse()
                .context("Invalid value for server_port. Use a port number (1-65535).")?;
        }
        "secure" => {
            config.secure = value
                .parse()
                .context("Invalid value for secure. Use 'true' or 'false'.")?;
        }
        "reconnect_delay_ms" => {
            config.reconnect_delay_ms = value
                .parse()
                .context("Invalid value for reconnect_delay_ms. Use milliseconds.")?;
        }
        "error_grace_ms" => {
            config.error_grace_ms = value
                .parse()
                .context("Invalid value for error_grace_ms. Use milliseconds.")?;
        }
        "log_file" => {
            config.log_file = if unset { None } else { Some(value.into()) };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply_setting(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
