//! Sync core
//!
//! `SyncCore` is the explicit owner of one connection, one state store and
//! one session store. It turns transport events into handshakes, identity
//! updates and state publications. All of its methods run on the owner's
//! task; nothing here blocks or spawns.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::connection::{ConnectionManager, ConnectionSignal, ConnectionState, Transport, TransportEvent};
use super::message::{route, Envelope, Inbound};
use crate::diff::EditScript;
use crate::error::SyncError;
use crate::identity::SessionStore;
use crate::models::{ExperimentState, SessionId};
use crate::store::{StateObserver, StateStore, SubscriptionId};

/// What happened while handling a transport event
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// Connection opened and the handshake went out
    Connected,
    /// The server assigned a (new) session id
    SessionAssigned(SessionId),
    /// A new state was stored and published
    StateReplaced(EditScript),
}

/// Owns connection, state and identity for one client
pub struct SyncCore<T, S> {
    connection: ConnectionManager<T>,
    store: StateStore,
    sessions: S,
    session_id: SessionId,
    /// Set while the adopted id has not reached the session store
    save_error: Option<SyncError>,
}

impl<T: Transport, S: SessionStore> SyncCore<T, S> {
    /// Create a core, loading the stored session id
    pub fn new(connection: ConnectionManager<T>, sessions: S) -> Self {
        let session_id = sessions.load();
        if session_id.is_empty() {
            info!("No stored session, the server will assign one");
        } else {
            debug!("Loaded session {}", session_id);
        }

        Self {
            connection,
            store: StateStore::new(),
            sessions,
            session_id,
            save_error: None,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn state(&self) -> Option<&ExperimentState> {
        self.store.state()
    }

    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    /// Why the current session id is not yet durable, if it isn't
    pub fn save_error(&self) -> Option<&SyncError> {
        self.save_error.as_ref()
    }

    pub fn connect(&mut self, address: &str) -> Result<(), SyncError> {
        self.connection.connect(address)
    }

    pub fn teardown(&mut self) {
        self.connection.teardown();
    }

    pub fn poll_timers(&mut self, now: Instant) {
        self.connection.poll_timers(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.connection.next_deadline()
    }

    pub fn subscribe(&mut self, observer: impl StateObserver + 'static) -> SubscriptionId {
        self.store.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Submit a choice for the current round
    pub fn submit_decision(&mut self, choice: &str) -> Result<(), SyncError> {
        self.store
            .submit_decision(choice, &self.session_id, &mut self.connection)
    }

    /// Handle one transport event
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Option<CoreEvent> {
        match self.connection.handle_event(event, now)? {
            ConnectionSignal::Opened => {
                if self.save_error.is_some() {
                    self.persist_session();
                }
                let handshake = Envelope::connect(&self.session_id);
                if let Err(e) = self.connection.send(&handshake) {
                    warn!("Failed to send handshake: {}", e);
                    return None;
                }
                Some(CoreEvent::Connected)
            }
            ConnectionSignal::Frame(raw) => match self.handle_frame(&raw) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Dropping frame: {}", e);
                    None
                }
            },
        }
    }

    /// Decode and route one inbound frame
    ///
    /// A frame that fails to decode changes nothing.
    pub fn handle_frame(&mut self, raw: &str) -> Result<Option<CoreEvent>, SyncError> {
        let inbound = route(&Envelope::decode(raw)?)?;

        let event = match inbound {
            Inbound::SessionAssigned(id) => {
                if id == self.session_id {
                    return Ok(None);
                }
                // Adopt even if the write fails so this connection keeps
                // working; the save is retried on the next open
                info!("Session assigned: {}", id);
                self.session_id = id.clone();
                self.persist_session();
                CoreEvent::SessionAssigned(id)
            }
            Inbound::StateUpdated(state) => CoreEvent::StateReplaced(self.store.replace(state)),
        };
        Ok(Some(event))
    }

    fn persist_session(&mut self) {
        match self.try_persist_session() {
            Ok(()) => self.save_error = None,
            Err(e) => {
                warn!("Failed to persist session id {}: {}", self.session_id, e);
                self.save_error = Some(e);
            }
        }
    }

    fn try_persist_session(&mut self) -> Result<(), SyncError> {
        self.sessions.save(&self.session_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::diff::EditOp;
    use crate::identity::MemorySessionStore;
    use crate::models::{ContentItem, Phase};
    use crate::render::ENDED_HEADING;
    use crate::storage::{StorageError, StorageResult};
    use crate::sync::message::DecodeError;
    use crate::sync::connection::tests::RecordingTransport;
    use crate::sync::connection::TransportEventKind;

    const ADDR: &str = "ws://10.0.0.2:8000/ws";

    const RUNNING: &str = r#"{"cmd":"UPDATE_STATE","data":"{\"infos\":[{\"hint\":\"round\",\"value\":\"3/6\"}],\"images\":[],\"options\":{\"options\":[\"north\",\"south\"]},\"expStatus\":\"RUNNING\"}"}"#;

    const ENDED: &str = r#"{"cmd":"UPDATE_STATE","data":"{\"infos\":[],\"images\":[],\"options\":{\"options\":[]},\"expStatus\":\"END\"}"}"#;

    type TestCore = SyncCore<RecordingTransport, MemorySessionStore>;

    fn core(stored: &str) -> TestCore {
        let connection = ConnectionManager::new(RecordingTransport::default());
        SyncCore::new(connection, MemorySessionStore::with_id(stored))
    }

    /// Session store whose first `failures` writes are refused
    #[derive(Debug, Default)]
    struct FlakySessionStore {
        id: SessionId,
        failures: usize,
        attempts: usize,
    }

    impl SessionStore for FlakySessionStore {
        fn load(&self) -> SessionId {
            self.id.clone()
        }

        fn save(&mut self, id: &SessionId) -> StorageResult<()> {
            self.attempts += 1;
            if self.failures > 0 {
                self.failures -= 1;
                return Err(StorageError::from_io(
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                    "/data/session.json".into(),
                ));
            }
            self.id = id.clone();
            Ok(())
        }
    }

    /// Drive the core to `Open`, returning the generation in use
    fn open<S: SessionStore>(core: &mut SyncCore<RecordingTransport, S>, now: Instant) -> u64 {
        core.connect(ADDR).unwrap();
        let generation = core.connection().transport().opened.last().unwrap().1;
        let event = TransportEvent::new(generation, TransportEventKind::Opened);
        assert_eq!(core.handle_event(event, now), Some(CoreEvent::Connected));
        generation
    }

    fn frame<S: SessionStore>(
        core: &mut SyncCore<RecordingTransport, S>,
        generation: u64,
        raw: &str,
    ) -> Option<CoreEvent> {
        let event = TransportEvent::new(generation, TransportEventKind::Message(raw.to_string()));
        core.handle_event(event, Instant::now())
    }

    #[test]
    fn test_handshake_carries_stored_session() {
        let mut core = core("abc-123");
        open(&mut core, Instant::now());

        assert_eq!(
            core.connection().transport().sent,
            vec![r#"{"cmd":"CONNECT","data":"abc-123"}"#.to_string()]
        );
    }

    #[test]
    fn test_fresh_install_handshake_is_empty() {
        let mut core = core("");
        open(&mut core, Instant::now());

        assert_eq!(
            core.connection().transport().sent,
            vec![r#"{"cmd":"CONNECT","data":""}"#.to_string()]
        );
    }

    #[test]
    fn test_server_assigned_session_is_saved_and_used() {
        let mut core = core("");
        let t0 = Instant::now();
        let generation = open(&mut core, t0);

        let event = frame(&mut core, generation, r#"{"cmd":"CONNECT","data":"srv-7"}"#);
        assert_eq!(event, Some(CoreEvent::SessionAssigned(SessionId::new("srv-7"))));
        assert_eq!(core.sessions().load(), SessionId::new("srv-7"));
        assert_eq!(core.sessions().save_count(), 1);

        // Drop and reconnect: the new handshake carries the assigned id
        let closed = TransportEvent::new(generation, TransportEventKind::Closed);
        core.handle_event(closed, t0);
        core.poll_timers(t0 + std::time::Duration::from_millis(2000));
        let generation = core.connection().transport().opened.last().unwrap().1;
        core.handle_event(TransportEvent::new(generation, TransportEventKind::Opened), t0);

        assert_eq!(
            core.connection().transport().sent.last(),
            Some(&r#"{"cmd":"CONNECT","data":"srv-7"}"#.to_string())
        );
    }

    #[test]
    fn test_failed_session_save_is_retried_on_next_open() {
        let connection = ConnectionManager::new(RecordingTransport::default());
        let sessions = FlakySessionStore {
            failures: 1,
            ..FlakySessionStore::default()
        };
        let mut core = SyncCore::new(connection, sessions);
        let t0 = Instant::now();
        let generation = open(&mut core, t0);

        let event = frame(&mut core, generation, r#"{"cmd":"CONNECT","data":"srv-7"}"#);
        assert_eq!(event, Some(CoreEvent::SessionAssigned(SessionId::new("srv-7"))));
        assert_eq!(core.session_id(), &SessionId::new("srv-7"));
        assert!(matches!(
            core.save_error(),
            Some(SyncError::Storage(StorageError::PermissionDenied { .. }))
        ));
        assert!(core.sessions().load().is_empty());

        core.handle_event(TransportEvent::new(generation, TransportEventKind::Closed), t0);
        core.poll_timers(t0 + std::time::Duration::from_millis(2000));
        let generation = core.connection().transport().opened.last().unwrap().1;
        core.handle_event(TransportEvent::new(generation, TransportEventKind::Opened), t0);

        assert!(core.save_error().is_none());
        assert_eq!(core.sessions().load(), SessionId::new("srv-7"));
        assert_eq!(core.sessions().attempts, 2);
        assert_eq!(
            core.connection().transport().sent.last(),
            Some(&r#"{"cmd":"CONNECT","data":"srv-7"}"#.to_string())
        );
    }

    #[test]
    fn test_handle_frame_reports_decode_errors() {
        let mut core = core("abc");

        assert!(matches!(
            core.handle_frame("{not json"),
            Err(SyncError::Decode(DecodeError::Malformed(_)))
        ));
        assert!(matches!(
            core.handle_frame(""),
            Err(SyncError::Decode(DecodeError::Empty))
        ));
        assert!(matches!(
            core.handle_frame(r#"{"cmd":"NOPE","data":null}"#),
            Err(SyncError::Decode(DecodeError::UnknownCommand(_)))
        ));
        assert!(core.state().is_none());
    }

    #[test]
    fn test_same_session_is_not_saved_again() {
        let mut core = core("abc");
        let generation = open(&mut core, Instant::now());

        assert_eq!(frame(&mut core, generation, r#"{"cmd":"CONNECT","data":"abc"}"#), None);
        assert_eq!(frame(&mut core, generation, r#"{"cmd":"CONNECT","data":""}"#), None);
        assert_eq!(core.sessions().save_count(), 0);
        assert_eq!(core.session_id(), &SessionId::new("abc"));
    }

    #[test]
    fn test_ended_state_publishes_single_heading() {
        let mut core = core("abc");
        let generation = open(&mut core, Instant::now());

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);
        core.subscribe(move |state: &ExperimentState, script: &EditScript| {
            sink.lock().unwrap().push((state.phase, script.clone()));
        });

        frame(&mut core, generation, RUNNING);
        let event = frame(&mut core, generation, ENDED);

        assert!(matches!(event, Some(CoreEvent::StateReplaced(_))));
        assert_eq!(
            core.store().render_list(),
            &[ContentItem::heading(ENDED_HEADING)]
        );

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 2);
        let (phase, script) = &published[1];
        assert_eq!(*phase, Phase::Ended);
        assert!(script
            .iter()
            .any(|op| matches!(op, EditOp::Remove { .. })));
    }

    #[test]
    fn test_malformed_frame_changes_nothing() {
        let mut core = core("abc");
        let generation = open(&mut core, Instant::now());
        frame(&mut core, generation, RUNNING);

        let published = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&published);
        core.subscribe(move |_: &ExperimentState, _: &EditScript| {
            *counter.lock().unwrap() += 1;
        });
        let before = core.store().render_list().to_vec();

        for raw in [
            "{not json",
            "",
            r#"{"cmd":"UPDATE_STATE","data":"{\"infos\": 7}"}"#,
            r#"{"cmd":"SUBMIT_DECISION","data":"{}"}"#,
            r#"{"cmd":"NOPE","data":null}"#,
        ] {
            assert_eq!(frame(&mut core, generation, raw), None, "frame {:?}", raw);
        }

        assert_eq!(*published.lock().unwrap(), 0);
        assert_eq!(core.store().render_list(), before.as_slice());
        assert_eq!(core.state().map(|s| s.phase), Some(Phase::Running));
    }

    #[test]
    fn test_submit_sends_decision() {
        let mut core = core("abc");
        let generation = open(&mut core, Instant::now());
        frame(&mut core, generation, RUNNING);

        core.submit_decision("north").unwrap();

        assert_eq!(
            core.connection().transport().sent.last(),
            Some(
                &r#"{"cmd":"SUBMIT_DECISION","data":"{\"uuid\":\"abc\",\"decision\":\"north\"}"}"#
                    .to_string()
            )
        );
    }

    #[test]
    fn test_invalid_choice_issues_no_send() {
        let mut core = core("abc");
        let generation = open(&mut core, Instant::now());
        frame(&mut core, generation, RUNNING);
        let sent_before = core.connection().transport().sent.len();

        assert!(matches!(
            core.submit_decision("east"),
            Err(SyncError::InvalidChoice { .. })
        ));
        assert_eq!(core.connection().transport().sent.len(), sent_before);
    }

    #[test]
    fn test_submit_while_disconnected() {
        let mut core = core("abc");
        let generation = open(&mut core, Instant::now());
        frame(&mut core, generation, RUNNING);

        core.handle_event(
            TransportEvent::new(generation, TransportEventKind::Closed),
            Instant::now(),
        );
        assert!(matches!(
            core.submit_decision("north"),
            Err(SyncError::NotConnected)
        ));
    }
}
