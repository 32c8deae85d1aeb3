//! Status command handler

use anyhow::Result;

use labsync_core::{Config, FileSessionStore, SessionStore};

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let session_id = FileSessionStore::from_config(config).load();
    let server = config.server_url();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server": server,
                    "session_id": (!session_id.is_empty()).then(|| session_id.as_str()),
                    "reconnect_delay_ms": config.reconnect_delay_ms,
                    "error_grace_ms": config.error_grace_ms,
                    "data_dir": config.data_dir,
                })
            );
        }
        OutputFormat::Quiet => {
            if let Some(url) = &server {
                println!("{}", url);
            }
        }
        OutputFormat::Human => {
            println!("labsync Status");
            println!("==============");
            println!();
            println!("Server:");
            println!(
                "  Address:   {}",
                server.as_deref().unwrap_or("(not set, asked on run)")
            );
            println!("  Reconnect: every {}ms", config.reconnect_delay_ms);
            println!();
            println!("Session:");
            if session_id.is_empty() {
                println!("  ID: (none yet)");
            } else {
                println!("  ID: {}", session_id);
            }
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
        }
    }

    Ok(())
}
