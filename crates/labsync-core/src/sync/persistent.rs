//! Persistent sync task
//!
//! Runs a [`SyncCore`] on its own tokio task. The task is the only place the
//! core is touched: commands arrive over a channel, transport events over
//! another, and the reconnect timer is a `sleep_until` on the core's next
//! deadline. Results go back as [`SyncTaskEvent`]s, and the connection state
//! is mirrored into a `watch` channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use super::client::{CoreEvent, SyncCore};
use super::connection::{ConnectionManager, ConnectionState, Transport};
use super::transport::WsTransport;
use crate::config::{Config, DEFAULT_ERROR_GRACE_MS, DEFAULT_RECONNECT_DELAY_MS};
use crate::diff::EditScript;
use crate::error::SyncError;
use crate::identity::SessionStore;
use crate::models::{ExperimentState, SessionId};

/// Commands sent to the sync task
#[derive(Debug)]
pub enum SyncCommand {
    /// Connect (or re-arm after teardown) to an address
    Connect {
        address: String,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    /// Submit a decision for the current round
    Submit {
        choice: String,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    /// Close the connection and stop reconnecting
    Teardown,
}

/// Events emitted by the sync task
#[derive(Debug, Clone)]
pub enum SyncTaskEvent {
    /// Connection state changed
    StatusChanged(ConnectionState),
    /// Server assigned a session id
    SessionAssigned(SessionId),
    /// A new state was published
    Updated {
        state: ExperimentState,
        script: EditScript,
    },
    /// Transport or storage error, with a recovery hint when there is one
    Error(String),
}

/// Configuration for the sync task
#[derive(Debug, Clone)]
pub struct SyncTaskConfig {
    /// Address to connect to at startup, if any
    pub address: Option<String>,
    pub reconnect_delay: Duration,
    pub error_grace: Duration,
}

impl Default for SyncTaskConfig {
    fn default() -> Self {
        Self {
            address: None,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            error_grace: Duration::from_millis(DEFAULT_ERROR_GRACE_MS),
        }
    }
}

impl SyncTaskConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            address: config.server_url(),
            reconnect_delay: config.reconnect_delay(),
            error_grace: config.error_grace(),
        }
    }
}

/// Handle to control the sync task
///
/// Dropping the handle tears the connection down and ends the task.
pub struct SyncHandle {
    /// Send commands to the sync task
    pub command_tx: mpsc::Sender<SyncCommand>,
    /// Receive events from the sync task
    pub event_rx: mpsc::Receiver<SyncTaskEvent>,
    /// Watch connection state
    pub status_rx: watch::Receiver<ConnectionState>,
}

impl SyncHandle {
    pub fn status(&self) -> ConnectionState {
        *self.status_rx.borrow()
    }

    pub async fn connect(&self, address: impl Into<String>) -> Result<(), SyncError> {
        let (reply, response) = oneshot::channel();
        self.request(
            SyncCommand::Connect {
                address: address.into(),
                reply,
            },
            response,
        )
        .await
    }

    /// Submit a choice; resolves once the frame is handed to the transport
    pub async fn submit(&self, choice: impl Into<String>) -> Result<(), SyncError> {
        let (reply, response) = oneshot::channel();
        self.request(
            SyncCommand::Submit {
                choice: choice.into(),
                reply,
            },
            response,
        )
        .await
    }

    pub async fn teardown(&self) {
        // A closed channel means the task is already gone
        let _ = self.command_tx.send(SyncCommand::Teardown).await;
    }

    /// Next event, `None` once the task has exited
    pub async fn next_event(&mut self) -> Option<SyncTaskEvent> {
        self.event_rx.recv().await
    }

    async fn request(
        &self,
        command: SyncCommand,
        response: oneshot::Receiver<Result<(), SyncError>>,
    ) -> Result<(), SyncError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| task_gone())?;
        response.await.map_err(|_| task_gone())?
    }
}

fn task_gone() -> SyncError {
    SyncError::TransportFault("sync task has exited".to_string())
}

/// Spawn the sync task
///
/// Connects right away when `config.address` is set. The task keeps
/// reconnecting until it receives [`SyncCommand::Teardown`] or the handle is
/// dropped.
pub fn spawn_sync_task<S>(config: SyncTaskConfig, sessions: S) -> SyncHandle
where
    S: SessionStore + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);

    tokio::spawn(sync_task_loop(
        config, sessions, command_rx, event_tx, status_tx,
    ));

    SyncHandle {
        command_tx,
        event_rx,
        status_rx,
    }
}

async fn sync_task_loop<S: SessionStore>(
    config: SyncTaskConfig,
    sessions: S,
    mut command_rx: mpsc::Receiver<SyncCommand>,
    event_tx: mpsc::Sender<SyncTaskEvent>,
    status_tx: watch::Sender<ConnectionState>,
) {
    let (transport, mut transport_rx) = WsTransport::channel();
    let connection =
        ConnectionManager::with_delays(transport, config.reconnect_delay, config.error_grace);
    let mut core = SyncCore::new(connection, sessions);

    if let Some(address) = &config.address {
        if let Err(e) = core.connect(address) {
            let _ = event_tx.send(SyncTaskEvent::Error(describe_error(&e))).await;
        }
    }

    let mut mirror = StatusMirror::default();
    let events = mirror.changes(&core, &status_tx);
    emit_all(events, &event_tx).await;

    loop {
        let deadline = core.next_deadline();

        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SyncCommand::Connect { address, reply }) => {
                        let _ = reply.send(core.connect(&address));
                    }
                    Some(SyncCommand::Submit { choice, reply }) => {
                        let _ = reply.send(core.submit_decision(&choice));
                    }
                    Some(SyncCommand::Teardown) => core.teardown(),
                    None => {
                        // Every handle is gone
                        core.teardown();
                        let events = mirror.changes(&core, &status_tx);
                        emit_all(events, &event_tx).await;
                        break;
                    }
                }
            }

            Some(event) = transport_rx.recv() => {
                let events = match core.handle_event(event, Instant::now()) {
                    Some(update) => task_events(&core, update),
                    None => Vec::new(),
                };
                emit_all(events, &event_tx).await;
            }

            _ = wait_until(deadline) => {
                core.poll_timers(Instant::now());
            }
        }

        let events = mirror.changes(&core, &status_tx);
        emit_all(events, &event_tx).await;
    }

    info!("Sync task stopped");
}

fn task_events<T: Transport, S: SessionStore>(
    core: &SyncCore<T, S>,
    update: CoreEvent,
) -> Vec<SyncTaskEvent> {
    match update {
        CoreEvent::Connected => Vec::new(),
        CoreEvent::SessionAssigned(id) => {
            let mut events = vec![SyncTaskEvent::SessionAssigned(id)];
            if let Some(e) = core.save_error() {
                events.push(SyncTaskEvent::Error(describe_error(e)));
            }
            events
        }
        CoreEvent::StateReplaced(script) => core
            .state()
            .map(|state| SyncTaskEvent::Updated {
                state: state.clone(),
                script,
            })
            .into_iter()
            .collect(),
    }
}

/// Error text for the event stream, with the recovery hint appended
fn describe_error(e: &SyncError) -> String {
    match e.recovery_suggestion() {
        Some(hint) => format!("{} {}", e, hint),
        None => e.to_string(),
    }
}

/// Sleep until the deadline, or forever when there is none
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Last state and error reported, so each change is emitted once
#[derive(Default)]
struct StatusMirror {
    state: Option<ConnectionState>,
    error: Option<String>,
}

impl StatusMirror {
    /// Events for whatever changed since the last call
    fn changes<S: SessionStore>(
        &mut self,
        core: &SyncCore<WsTransport, S>,
        status_tx: &watch::Sender<ConnectionState>,
    ) -> Vec<SyncTaskEvent> {
        let mut events = Vec::new();

        let error = core.connection().last_error().map(str::to_string);
        if let Some(message) = &error {
            if self.error.as_ref() != Some(message) {
                events.push(SyncTaskEvent::Error(message.clone()));
            }
        }
        self.error = error;

        let state = core.connection_state();
        if self.state != Some(state) {
            debug!("Connection state: {:?}", state);
            self.state = Some(state);
            let _ = status_tx.send(state);
            events.push(SyncTaskEvent::StatusChanged(state));
        }

        events
    }
}

async fn emit_all(events: Vec<SyncTaskEvent>, event_tx: &mpsc::Sender<SyncTaskEvent>) {
    for event in events {
        let _ = event_tx.send(event).await;
    }
}
