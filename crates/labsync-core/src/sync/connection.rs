//! Connection lifecycle
//!
//! Owns one logical connection to the experiment server and its state
//! machine:
//!
//! ```text
//! Disconnected -> Connecting -> Open -> (Closing | Faulted) -> Reconnecting -> Connecting -> ...
//! ```
//!
//! The manager never blocks and never sleeps. Transport callbacks arrive as
//! [`TransportEvent`]s through [`ConnectionManager::handle_event`], and the
//! owner drives timers by calling [`ConnectionManager::poll_timers`] at
//! [`ConnectionManager::next_deadline`]. Every close schedules a reconnect
//! after a fixed delay; only [`ConnectionManager::teardown`] stops that.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::message::Envelope;
use crate::config::{DEFAULT_ERROR_GRACE_MS, DEFAULT_RECONNECT_DELAY_MS};
use crate::error::SyncError;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, not trying
    Disconnected,
    /// Transport is being opened
    Connecting,
    /// Connected and able to send
    Open,
    /// Local close in progress
    Closing,
    /// Transport reported an error, waiting for it to close
    Faulted,
    /// Waiting out the reconnect delay
    Reconnecting,
}

/// Capability interface over a concrete transport
///
/// Implementations must not block: `open` starts connecting in the
/// background and reports the outcome as [`TransportEvent`]s tagged with the
/// given generation.
pub trait Transport {
    fn open(&mut self, address: &str, generation: u64);
    fn send(&mut self, frame: String) -> Result<(), SyncError>;
    fn close(&mut self);
}

/// Transport callback, marshaled onto the owning task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Generation passed to the `open` call this event belongs to
    pub generation: u64,
    pub kind: TransportEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Opened,
    Message(String),
    Closed,
    Error(String),
}

impl TransportEvent {
    pub fn new(generation: u64, kind: TransportEventKind) -> Self {
        Self { generation, kind }
    }
}

/// What the owner has to act on after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// Connection is open; the handshake must be sent now
    Opened,
    /// A text frame arrived
    Frame(String),
}

/// Owns the transport and the reconnect policy
pub struct ConnectionManager<T> {
    transport: T,
    state: ConnectionState,
    address: Option<String>,
    generation: u64,
    reconnect_delay: Duration,
    error_grace: Duration,
    reconnect_at: Option<Instant>,
    fault_deadline: Option<Instant>,
    last_error: Option<String>,
    attempts: u64,
    torn_down: bool,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T) -> Self {
        Self::with_delays(
            transport,
            Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            Duration::from_millis(DEFAULT_ERROR_GRACE_MS),
        )
    }

    pub fn with_delays(transport: T, reconnect_delay: Duration, error_grace: Duration) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            address: None,
            generation: 0,
            reconnect_delay,
            error_grace,
            reconnect_at: None,
            fault_deadline: None,
            last_error: None,
            attempts: 0,
            torn_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Last address passed to `connect`
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Most recent transport error, kept until the next successful open
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Connection attempts since the last successful open
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start connecting to `address`
    ///
    /// No-op while already connecting or open. While a reconnect is pending
    /// the timer is cancelled and the attempt starts immediately.
    pub fn connect(&mut self, address: &str) -> Result<(), SyncError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(SyncError::InvalidAddress(address.to_string()));
        }

        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                debug!("connect({}) ignored, already {:?}", address, self.state);
            }
            // The pending close drives the reconnect to the new address
            ConnectionState::Faulted | ConnectionState::Closing => {
                self.torn_down = false;
                self.address = Some(address.to_string());
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                self.torn_down = false;
                self.address = Some(address.to_string());
                self.open_transport();
            }
        }
        Ok(())
    }

    /// Send an envelope over the open connection
    pub fn send(&mut self, envelope: &Envelope) -> Result<(), SyncError> {
        if self.state != ConnectionState::Open {
            return Err(SyncError::NotConnected);
        }
        let frame = envelope.encode();
        debug!("Sending {}", envelope.command());
        self.transport.send(frame)
    }

    /// Apply a transport callback
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Option<ConnectionSignal> {
        if event.generation != self.generation {
            debug!(
                "Dropping {:?} from stale connection #{}",
                event.kind, event.generation
            );
            return None;
        }

        match event.kind {
            TransportEventKind::Opened => {
                if self.state != ConnectionState::Connecting {
                    return None;
                }
                info!(
                    "Connected to {}",
                    self.address.as_deref().unwrap_or_default()
                );
                self.state = ConnectionState::Open;
                self.attempts = 0;
                self.last_error = None;
                Some(ConnectionSignal::Opened)
            }
            TransportEventKind::Message(text) => match self.state {
                ConnectionState::Open | ConnectionState::Faulted => {
                    Some(ConnectionSignal::Frame(text))
                }
                _ => None,
            },
            TransportEventKind::Error(message) => {
                warn!("Transport error: {}", message);
                self.last_error = Some(message);
                if matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::Open
                ) {
                    // The transport should follow up with a close
                    self.state = ConnectionState::Faulted;
                    self.fault_deadline = Some(now + self.error_grace);
                }
                None
            }
            TransportEventKind::Closed => {
                self.on_closed(now);
                None
            }
        }
    }

    /// Fire due timers
    pub fn poll_timers(&mut self, now: Instant) {
        if self.state == ConnectionState::Faulted
            && self.fault_deadline.is_some_and(|deadline| now >= deadline)
        {
            warn!("No close after transport error, forcing close");
            self.state = ConnectionState::Closing;
            self.transport.close();
            // Any close the old socket still emits is now stale
            self.generation += 1;
            self.on_closed(now);
        }

        if self.state == ConnectionState::Reconnecting
            && self.reconnect_at.is_some_and(|at| now >= at)
        {
            info!(
                "Reconnecting to {} (attempt {})",
                self.address.as_deref().unwrap_or_default(),
                self.attempts + 1
            );
            self.open_transport();
        }
    }

    /// Earliest instant at which `poll_timers` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.reconnect_at, self.fault_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Stop for good: cancel the reconnect timer and close the transport
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.reconnect_at = None;
        self.fault_deadline = None;

        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Faulted
        ) {
            self.state = ConnectionState::Closing;
            self.transport.close();
        }

        self.generation += 1;
        self.state = ConnectionState::Disconnected;
        info!("Connection torn down");
    }

    fn open_transport(&mut self) {
        let Some(address) = self.address.clone() else {
            return;
        };

        self.generation += 1;
        self.attempts += 1;
        self.reconnect_at = None;
        self.fault_deadline = None;
        self.state = ConnectionState::Connecting;

        debug!("Opening connection #{} to {}", self.generation, address);
        self.transport.open(&address, self.generation);
    }

    fn on_closed(&mut self, now: Instant) {
        self.fault_deadline = None;

        if self.torn_down || self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            return;
        }

        info!(
            "Connection closed, reconnecting in {}ms",
            self.reconnect_delay.as_millis()
        );
        self.state = ConnectionState::Reconnecting;
        self.reconnect_at = Some(now + self.reconnect_delay);
    }
}

impl<T: Transport> super::EnvelopeSink for ConnectionManager<T> {
    fn send_envelope(&mut self, envelope: Envelope) -> Result<(), SyncError> {
        self.send(&envelope)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::SessionId;

    /// Transport that records every call
    #[derive(Debug, Default)]
    pub(crate) struct RecordingTransport {
        pub opened: Vec<(String, u64)>,
        pub sent: Vec<String>,
        pub closes: usize,
        pub fail_sends: bool,
    }

    impl Transport for RecordingTransport {
        fn open(&mut self, address: &str, generation: u64) {
            self.opened.push((address.to_string(), generation));
        }

        fn send(&mut self, frame: String) -> Result<(), SyncError> {
            if self.fail_sends {
                return Err(SyncError::TransportFault("socket gone".to_string()));
            }
            self.sent.push(frame);
            Ok(())
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    const ADDR: &str = "ws://10.0.0.2:8000/ws";

    fn manager() -> ConnectionManager<RecordingTransport> {
        ConnectionManager::new(RecordingTransport::default())
    }

    fn event(manager: &ConnectionManager<RecordingTransport>, kind: TransportEventKind) -> TransportEvent {
        TransportEvent::new(manager.generation, kind)
    }

    fn open_manager(now: Instant) -> ConnectionManager<RecordingTransport> {
        let mut manager = manager();
        manager.connect(ADDR).unwrap();
        let opened = event(&manager, TransportEventKind::Opened);
        assert_eq!(manager.handle_event(opened, now), Some(ConnectionSignal::Opened));
        manager
    }

    #[test]
    fn test_initial_state() {
        let manager = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.next_deadline().is_none());
    }

    #[test]
    fn test_connect_requires_address() {
        let mut manager = manager();
        assert!(matches!(
            manager.connect("  "),
            Err(SyncError::InvalidAddress(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.transport().opened.is_empty());
    }

    #[test]
    fn test_connect_opens_transport_once() {
        let mut manager = manager();
        manager.connect(ADDR).unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        // Already connecting: no second open
        manager.connect(ADDR).unwrap();
        assert_eq!(manager.transport().opened, vec![(ADDR.to_string(), 1)]);
    }

    #[test]
    fn test_connect_while_open_keeps_reconnect_address() {
        let t0 = Instant::now();
        let mut manager = open_manager(t0);

        manager.connect("ws://10.0.0.9:8000/ws").unwrap();
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.address(), Some(ADDR));

        let closed = event(&manager, TransportEventKind::Closed);
        manager.handle_event(closed, t0);
        manager.poll_timers(t0 + Duration::from_millis(2000));
        assert_eq!(
            manager.transport().opened.last(),
            Some(&(ADDR.to_string(), 2))
        );
    }

    #[test]
    fn test_open_event_opens() {
        let manager = open_manager(Instant::now());
        assert!(manager.is_open());
        assert_eq!(manager.attempts(), 0);
    }

    #[test]
    fn test_send_requires_open() {
        let mut manager = manager();
        let envelope = Envelope::connect(&SessionId::new("abc"));
        assert!(matches!(
            manager.send(&envelope),
            Err(SyncError::NotConnected)
        ));

        manager.connect(ADDR).unwrap();
        assert!(matches!(
            manager.send(&envelope),
            Err(SyncError::NotConnected)
        ));
        assert!(manager.transport().sent.is_empty());
    }

    #[test]
    fn test_send_when_open() {
        let mut manager = open_manager(Instant::now());
        manager
            .send(&Envelope::connect(&SessionId::new("abc")))
            .unwrap();
        assert_eq!(
            manager.transport().sent,
            vec![r#"{"cmd":"CONNECT","data":"abc"}"#.to_string()]
        );
    }

    #[test]
    fn test_send_surfaces_transport_fault() {
        let mut manager = open_manager(Instant::now());
        manager.transport.fail_sends = true;
        assert!(matches!(
            manager.send(&Envelope::connect(&SessionId::empty())),
            Err(SyncError::TransportFault(_))
        ));
    }

    #[test]
    fn test_close_schedules_reconnect_after_fixed_delay() {
        let t0 = Instant::now();
        let mut manager = open_manager(t0);

        let closed = event(&manager, TransportEventKind::Closed);
        manager.handle_event(closed, t0);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(manager.next_deadline(), Some(t0 + Duration::from_millis(2000)));

        manager.poll_timers(t0 + Duration::from_millis(1999));
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(manager.transport().opened.len(), 1);

        manager.poll_timers(t0 + Duration::from_millis(2000));
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(
            manager.transport().opened.last(),
            Some(&(ADDR.to_string(), 2))
        );
    }

    #[test]
    fn test_delay_is_constant_across_failures() {
        let mut now = Instant::now();
        let mut manager = manager();
        manager.connect(ADDR).unwrap();

        for attempt in 1..=4 {
            let closed = event(&manager, TransportEventKind::Closed);
            manager.handle_event(closed, now);
            assert_eq!(
                manager.next_deadline(),
                Some(now + Duration::from_millis(2000)),
                "attempt {}",
                attempt
            );
            now += Duration::from_millis(2000);
            manager.poll_timers(now);
            assert_eq!(manager.state(), ConnectionState::Connecting);
        }

        assert_eq!(manager.transport().opened.len(), 5);
        assert_eq!(manager.attempts(), 5);
    }

    #[test]
    fn test_error_then_close_reconnects_once() {
        let t0 = Instant::now();
        let mut manager = open_manager(t0);

        let error = event(&manager, TransportEventKind::Error("reset by peer".into()));
        manager.handle_event(error, t0);
        assert_eq!(manager.state(), ConnectionState::Faulted);
        assert_eq!(manager.last_error(), Some("reset by peer"));

        let closed = event(&manager, TransportEventKind::Closed);
        manager.handle_event(closed, t0);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(manager.next_deadline(), Some(t0 + Duration::from_millis(2000)));
    }

    #[test]
    fn test_silent_error_forces_close_after_grace() {
        let t0 = Instant::now();
        let mut manager = open_manager(t0);
        let stale_generation = manager.generation;

        let error = event(&manager, TransportEventKind::Error("timeout".into()));
        manager.handle_event(error, t0);

        manager.poll_timers(t0 + Duration::from_millis(4999));
        assert_eq!(manager.state(), ConnectionState::Faulted);

        let grace_end = t0 + Duration::from_millis(5000);
        manager.poll_timers(grace_end);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(manager.transport().closes, 1);

        // The late close from the abandoned socket changes nothing
        manager.handle_event(
            TransportEvent::new(stale_generation, TransportEventKind::Closed),
            grace_end,
        );
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(
            manager.next_deadline(),
            Some(grace_end + Duration::from_millis(2000))
        );

        manager.poll_timers(grace_end + Duration::from_millis(2000));
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_failed_connect_goes_through_reconnect_path() {
        let t0 = Instant::now();
        let mut manager = manager();
        manager.connect(ADDR).unwrap();

        let error = event(&manager, TransportEventKind::Error("connection refused".into()));
        manager.handle_event(error, t0);
        let closed = event(&manager, TransportEventKind::Closed);
        manager.handle_event(closed, t0);

        assert_eq!(manager.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_teardown_cancels_reconnect() {
        let t0 = Instant::now();
        let mut manager = open_manager(t0);
        let closed = event(&manager, TransportEventKind::Closed);
        manager.handle_event(closed, t0);

        manager.teardown();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.next_deadline().is_none());

        manager.poll_timers(t0 + Duration::from_secs(60));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.transport().opened.len(), 1);
    }

    #[test]
    fn test_teardown_of_open_connection_suppresses_reconnect() {
        let t0 = Instant::now();
        let mut manager = open_manager(t0);
        let generation = manager.generation;

        manager.teardown();
        assert_eq!(manager.transport().closes, 1);

        // The close caused by teardown must not schedule a reconnect
        manager.handle_event(
            TransportEvent::new(generation, TransportEventKind::Closed),
            t0,
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.next_deadline().is_none());
    }

    #[test]
    fn test_connect_after_teardown_rearms() {
        let mut manager = open_manager(Instant::now());
        manager.teardown();

        manager.connect(ADDR).unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(manager.transport().opened.len(), 2);
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let t0 = Instant::now();
        let mut manager = open_manager(t0);

        let stale = TransportEvent::new(0, TransportEventKind::Message("old".into()));
        assert_eq!(manager.handle_event(stale, t0), None);

        let fresh = event(&manager, TransportEventKind::Message("new".into()));
        assert_eq!(
            manager.handle_event(fresh, t0),
            Some(ConnectionSignal::Frame("new".into()))
        );
    }
}
