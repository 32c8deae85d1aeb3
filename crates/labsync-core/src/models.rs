//! Data models for labsync
//!
//! Defines the experiment state pushed by the server and the typed content
//! items the client derives from it.
//!
//! Field names on the wire follow the experiment server's schema
//! (`infos`, `imageUrl`, `expStatus`); the descriptive names are accepted
//! as aliases when decoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Client identity, assigned by the server on handshake
///
/// Empty until the server assigns one on the first connection of a fresh
/// install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A labelled value shown to the participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub hint: String,
    pub value: String,
}

impl Field {
    pub fn new(hint: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            hint: hint.into(),
            value: value.into(),
        }
    }
}

/// Reference to an image served by the experiment server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    #[serde(rename = "imageUrl", alias = "url")]
    pub url: String,
}

impl ImageRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// The options a participant may choose from in the current round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceSet {
    #[serde(default)]
    pub options: Vec<String>,
}

impl ChoiceSet {
    pub fn new<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, choice: &str) -> bool {
        self.options.iter().any(|option| option == choice)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// Experiment lifecycle as reported by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// A round is in progress and accepts decisions
    #[default]
    Running,
    /// Waiting for other participants or for the next round
    Pending,
    /// The experiment is over
    #[serde(rename = "END", alias = "ENDED")]
    Ended,
}

/// Authoritative experiment state pushed by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentState {
    /// Public fields, possibly interleaved with group sentinels
    #[serde(rename = "infos", alias = "items", default)]
    pub items: Vec<Field>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub options: ChoiceSet,
    #[serde(rename = "expStatus", alias = "phase", default)]
    pub phase: Phase,
}

impl ExperimentState {
    /// State with no content in the given phase
    pub fn with_phase(phase: Phase) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }
}

/// A single renderable block of the on-screen list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Heading {
        text: String,
    },
    Field(Field),
    FieldGroup {
        title: String,
        fields: Vec<Field>,
        /// Index into [`crate::render::GROUP_PALETTE`]
        color_index: usize,
    },
    Image(ImageRef),
    Choices(ChoiceSet),
    Spacer {
        width: u32,
        height: u32,
    },
}

/// Union tag of a [`ContentItem`], used for identity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    Heading,
    Field,
    FieldGroup,
    Image,
    Choices,
    Spacer,
}

impl ContentItem {
    pub fn heading(text: impl Into<String>) -> Self {
        ContentItem::Heading { text: text.into() }
    }

    pub fn field(hint: impl Into<String>, value: impl Into<String>) -> Self {
        ContentItem::Field(Field::new(hint, value))
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            ContentItem::Heading { .. } => ItemKind::Heading,
            ContentItem::Field(_) => ItemKind::Field,
            ContentItem::FieldGroup { .. } => ItemKind::FieldGroup,
            ContentItem::Image(_) => ItemKind::Image,
            ContentItem::Choices(_) => ItemKind::Choices,
            ContentItem::Spacer { .. } => ItemKind::Spacer,
        }
    }

    /// Whether two items describe the same on-screen slot
    ///
    /// Identity is decided by tag alone; content is compared separately.
    pub fn same_identity(&self, other: &ContentItem) -> bool {
        self.kind() == other.kind()
    }
}

/// A participant's choice for the current round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "uuid")]
    pub session_id: SessionId,
    #[serde(rename = "decision")]
    pub choice: String,
}

impl Decision {
    /// Build a decision, rejecting an empty choice
    pub fn new(session_id: SessionId, choice: impl Into<String>) -> Result<Self, SyncError> {
        let choice = choice.into();
        if choice.is_empty() {
            return Err(SyncError::InvalidChoice { choice });
        }
        Ok(Self { session_id, choice })
    }
}
