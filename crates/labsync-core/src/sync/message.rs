//! Protocol message types
//!
//! Every frame is a JSON envelope `{"cmd": "<COMMAND>", "data": <string|null>}`.
//! The payload is itself serialized data whose shape depends on the command.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Decision, ExperimentState, SessionId};

/// Commands understood by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Handshake; payload is the session id
    Connect,
    /// Server pushes a new experiment state
    UpdateState,
    /// Client submits a decision (client to server only)
    SubmitDecision,
}

impl CommandKind {
    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Connect => "CONNECT",
            CommandKind::UpdateState => "UPDATE_STATE",
            CommandKind::SubmitDecision => "SUBMIT_DECISION",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(CommandKind::Connect),
            // Older servers spell these differently
            "UPDATE_STATE" | "UPDATE_EXPERIMENT_INFO" => Ok(CommandKind::UpdateState),
            "SUBMIT_DECISION" | "SUBMIT_DESITION" => Ok(CommandKind::SubmitDecision),
            other => Err(DecodeError::UnknownCommand(other.to_string())),
        }
    }
}

/// Errors decoding an inbound frame or its payload
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("{0} is not expected from the server")]
    UnexpectedCommand(CommandKind),

    #[error("{0} requires a payload")]
    MissingPayload(CommandKind),

    #[error("invalid {command} payload: {source}")]
    InvalidPayload {
        command: CommandKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Outer command + payload wrapper for every frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    command: CommandKind,
    payload: Option<String>,
}

/// Wire layout used for encoding; field order is fixed
#[derive(Serialize)]
struct WireEnvelope<'a> {
    cmd: &'static str,
    data: Option<&'a str>,
}

/// Wire layout used for decoding
#[derive(Deserialize)]
struct RawEnvelope {
    cmd: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl Envelope {
    pub fn new(command: CommandKind, payload: Option<String>) -> Self {
        Self { command, payload }
    }

    /// Handshake carrying the current session id (empty on a fresh install)
    pub fn connect(session_id: &SessionId) -> Self {
        Self::new(CommandKind::Connect, Some(session_id.as_str().to_string()))
    }

    /// State push, as the server sends it
    pub fn update_state(state: &ExperimentState) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            CommandKind::UpdateState,
            Some(serde_json::to_string(state)?),
        ))
    }

    pub fn submit_decision(decision: &Decision) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            CommandKind::SubmitDecision,
            Some(serde_json::to_string(decision)?),
        ))
    }

    pub fn command(&self) -> CommandKind {
        self.command
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Encode to the wire format
    ///
    /// Pure and deterministic: identical envelopes encode to identical bytes.
    pub fn encode(&self) -> String {
        let wire = WireEnvelope {
            cmd: self.command.as_str(),
            data: self.payload.as_deref(),
        };
        // A struct of a &str and an Option<&str> always serializes
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Decode a raw text frame
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        if raw.trim().is_empty() {
            return Err(DecodeError::Empty);
        }

        let wire: RawEnvelope = serde_json::from_str(raw).map_err(DecodeError::Malformed)?;
        let command: CommandKind = wire.cmd.parse()?;
        let payload = match wire.data {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            // Some servers embed the payload object instead of a string
            Some(other) => Some(other.to_string()),
        };

        Ok(Self { command, payload })
    }
}

/// A decoded, validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Server (re)assigned our session id
    SessionAssigned(SessionId),
    /// Server pushed a new experiment state
    StateUpdated(ExperimentState),
}

/// Validate an envelope's payload against its command
pub fn route(envelope: &Envelope) -> Result<Inbound, DecodeError> {
    match envelope.command() {
        CommandKind::Connect => match envelope.payload() {
            Some(id) if !id.is_empty() => Ok(Inbound::SessionAssigned(SessionId::new(id))),
            _ => Err(DecodeError::MissingPayload(CommandKind::Connect)),
        },
        CommandKind::UpdateState => {
            let payload = envelope
                .payload()
                .ok_or(DecodeError::MissingPayload(CommandKind::UpdateState))?;
            let state = serde_json::from_str(payload).map_err(|source| {
                DecodeError::InvalidPayload {
                    command: CommandKind::UpdateState,
                    source,
                }
            })?;
            Ok(Inbound::StateUpdated(state))
        }
        CommandKind::SubmitDecision => {
            Err(DecodeError::UnexpectedCommand(CommandKind::SubmitDecision))
        }
    }
}
