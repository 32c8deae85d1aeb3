//! Session command handlers

use anyhow::{anyhow, Result};

use labsync_core::{Config, FileSessionStore, SessionId, StorageError};

use crate::output::{Output, OutputFormat};

/// Show the stored session id
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let store = FileSessionStore::from_config(config);
    let id = store
        .try_load()
        .map_err(|e| storage_failure(e, "Failed to read session file"))?
        .unwrap_or_else(SessionId::empty);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "session_id": (!id.is_empty()).then(|| id.as_str()),
                    "path": store.path(),
                })
            );
        }
        OutputFormat::Quiet => {
            if !id.is_empty() {
                println!("{}", id);
            }
        }
        OutputFormat::Human => {
            if id.is_empty() {
                println!("No session yet. The server assigns one on first connect.");
            } else {
                println!("Session id: {}", id);
            }
            println!("Stored in:  {}", store.path().display());
        }
    }

    Ok(())
}

/// Forget the stored session id
///
/// The next connection starts as a new participant.
pub fn reset(config: &Config, output: &Output) -> Result<()> {
    let mut store = FileSessionStore::from_config(config);
    store
        .clear()
        .map_err(|e| storage_failure(e, "Failed to remove session file"))?;
    output.success("Session reset");
    Ok(())
}

/// Attach the recovery hint, when there is one, to a storage failure
pub fn storage_failure(err: StorageError, action: &str) -> anyhow::Error {
    match err.recovery_suggestion() {
        Some(hint) => anyhow!("{}: {}\n{}", action, err, hint),
        None => anyhow::Error::new(err).context(action.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labsync_core::SessionStore;
    use tempfile::TempDir;

    #[test]
    fn test_reset_clears_stored_session() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let mut store = FileSessionStore::from_config(&config);
        store.save(&SessionId::new("abc")).unwrap();

        reset(&config, &Output::new(OutputFormat::Quiet)).unwrap();
        assert!(FileSessionStore::from_config(&config).load().is_empty());
    }

    #[test]
    fn test_show_corrupt_session_suggests_reset() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        std::fs::write(config.session_path(), "{ not json").unwrap();

        let err = show(&config, &Output::new(OutputFormat::Quiet)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Failed to read session file"));
        assert!(message.contains("labsync session reset"));

        // Reset recovers
        reset(&config, &Output::new(OutputFormat::Quiet)).unwrap();
        show(&config, &Output::new(OutputFormat::Quiet)).unwrap();
    }
}
