//! Run command handler
//!
//! Connects to the experiment server and stays connected until EOF on stdin
//! or Ctrl-C. Every state publication is printed; each stdin line is a
//! choice, given either as its 1-based number or as the option text.

use std::io::Write;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use labsync_core::sync::{SyncHandle, SyncTaskConfig, SyncTaskEvent};
use labsync_core::{
    apply, derive_render_list, spawn_sync_task, ChoiceSet, Config, ContentItem, ExperimentState,
    FileSessionStore, Phase, SyncError,
};

use crate::output::Output;

/// Resolve the server address from flags and configuration
pub fn resolve_address(
    config: &Config,
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<String> {
    if let Some(url) = url {
        return Ok(url);
    }

    let port = port.unwrap_or(config.server_port);
    match host.or_else(|| config.server_host.clone()) {
        Some(host) => Ok(labsync_core::config::server_url(&host, port, config.secure)),
        None => prompt_host().map(|host| labsync_core::config::server_url(&host, port, config.secure)),
    }
}

/// Ask for the server host when running interactively
fn prompt_host() -> Result<String> {
    if !atty::is(atty::Stream::Stdin) {
        bail!(
            "No server configured. Pass --host or --url, or set one with:\n  \
             labsync config set server_host <ip>"
        );
    }

    print!("Experiment server IP: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let host = input.trim();
    if host.is_empty() {
        bail!("No server address entered");
    }
    Ok(host.to_string())
}

/// Map a line of input to an option
///
/// Numbers in range pick by position; anything else is taken as option text
/// and validated by the core.
pub fn resolve_choice(input: &str, choices: &ChoiceSet) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(n) = input.parse::<usize>() {
        if let Some(option) = n.checked_sub(1).and_then(|i| choices.options.get(i)) {
            return Some(option.clone());
        }
    }
    Some(input.to_string())
}

/// Connect and participate until EOF or Ctrl-C
pub async fn run(config: &Config, address: String, output: &Output) -> Result<()> {
    let sessions = FileSessionStore::from_config(config);
    let task_config = SyncTaskConfig {
        address: None,
        ..SyncTaskConfig::from_config(config)
    };

    let mut handle = spawn_sync_task(task_config, sessions);
    handle
        .connect(address.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", address))?;
    output.message(&format!("Connecting to {} (Ctrl-D or Ctrl-C to quit)", address));
    info!("Running against {}", address);

    let result = participate(&mut handle, output).await;
    handle.teardown().await;
    result
}

async fn participate(handle: &mut SyncHandle, output: &Output) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interactive = output.should_prompt() && atty::is(atty::Stream::Stdin);

    let mut list: Vec<ContentItem> = Vec::new();
    let mut state: Option<ExperimentState> = None;

    loop {
        tokio::select! {
            event = handle.next_event() => {
                let Some(event) = event else {
                    bail!("Sync task stopped unexpectedly");
                };

                match event {
                    SyncTaskEvent::Updated { state: next, script } => {
                        list = apply(&list, &script).unwrap_or_else(|e| {
                            warn!("Edit script did not fit, rebuilding: {}", e);
                            derive_render_list(&next)
                        });
                        output.print_update(&next, &script, &list);
                        if interactive && next.phase == Phase::Running && !next.options.is_empty() {
                            print_prompt();
                        }
                        state = Some(next);
                    }
                    SyncTaskEvent::StatusChanged(status) => output.print_status(status),
                    SyncTaskEvent::SessionAssigned(id) => {
                        output.message(&format!("Session id: {}", id));
                    }
                    SyncTaskEvent::Error(message) => output.error(&message),
                }
            }

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("stdin closed");
                    return Ok(());
                };

                let Some(current) = state.as_ref() else {
                    output.error("Nothing to choose from yet");
                    continue;
                };
                let Some(choice) = resolve_choice(&line, &current.options) else {
                    continue;
                };

                match handle.submit(choice.clone()).await {
                    Ok(()) => output.success(&format!("Submitted \"{}\"", choice)),
                    Err(e) => {
                        output.error(&submit_failure(&e));
                        if interactive && matches!(e, SyncError::InvalidChoice { .. }) {
                            print_prompt();
                        }
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}

/// Text shown when a submission is refused
fn submit_failure(err: &SyncError) -> String {
    match err {
        SyncError::InvalidChoice { choice } => format!("\"{}\" is not one of the options", choice),
        e if e.is_retryable() => format!("{}; try again once reconnected", e),
        e => e.to_string(),
    }
}

fn print_prompt() {
    print!("> ");
    // Prompt only; a failed flush just delays it
    let _ = std::io::stdout().flush();
}
