//! WebSocket transport
//!
//! Each `open` spawns a tokio task that owns one socket. The task reports
//! back over an unbounded channel so the owner can handle every event on its
//! own task; outbound frames travel the other way over a per-connection
//! channel. Dropping that channel's sender closes the socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::connection::{Transport, TransportEvent, TransportEventKind};
use crate::error::SyncError;

/// How long the TCP and WebSocket handshake may take
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Transport`] over `tokio-tungstenite`
///
/// Must be used from within a tokio runtime.
pub struct WsTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            outbound: None,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Create a transport together with the receiver for its events
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (Self::new(events_tx), events_rx)
    }
}

impl Transport for WsTransport {
    fn open(&mut self, address: &str, generation: u64) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        // Replacing the sender closes any previous socket
        self.outbound = Some(outbound_tx);

        tokio::spawn(run_socket(
            address.to_string(),
            generation,
            self.connect_timeout,
            outbound_rx,
            self.events.clone(),
        ));
    }

    fn send(&mut self, frame: String) -> Result<(), SyncError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| SyncError::TransportFault("no socket".to_string()))?;
        outbound
            .send(frame)
            .map_err(|_| SyncError::TransportFault("socket task has exited".to_string()))
    }

    fn close(&mut self) {
        self.outbound = None;
    }
}

/// Report a connect that never got as far as `Opened`
fn fail(events: &mpsc::UnboundedSender<TransportEvent>, generation: u64, message: String) {
    emit(events, generation, TransportEventKind::Error(message));
    emit(events, generation, TransportEventKind::Closed);
}

fn emit(events: &mpsc::UnboundedSender<TransportEvent>, generation: u64, kind: TransportEventKind) {
    // The owner may already be gone; nothing to report to then
    let _ = events.send(TransportEvent::new(generation, kind));
}

/// Socket task: connect, then pump frames both ways until either side closes
async fn run_socket(
    address: String,
    generation: u64,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let ws_stream = match timeout(connect_timeout, connect_async(address.as_str())).await {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            fail(&events, generation, e.to_string());
            return;
        }
        Err(_) => {
            let message = format!("connection timed out after {}ms", connect_timeout.as_millis());
            fail(&events, generation, message);
            return;
        }
    };

    emit(&events, generation, TransportEventKind::Opened);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            emit(&events, generation, TransportEventKind::Error(e.to_string()));
                            break;
                        }
                    }
                    None => {
                        debug!("Closing socket #{}", generation);
                        write.close().await.ok();
                        break;
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        emit(&events, generation, TransportEventKind::Message(text));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        emit(&events, generation, TransportEventKind::Error(e.to_string()));
                        break;
                    }
                    // Binary, ping and pong frames carry nothing for us
                    _ => {}
                }
            }
        }
    }

    emit(&events, generation, TransportEventKind::Closed);
}
