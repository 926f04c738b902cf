//! Memory records and replicated memory events.
//!
//! [`MemoryRecord`] is the stored shape the CRDT layer merges into:
//! entity-like content overlaid with merge metadata. [`MemoryEvent`] is
//! the replicated proposal arriving from another replica. Side-channel
//! data (tags, extracted entities, the vector clock) lives inside the
//! record's `metadata` map because different memory types carry
//! different extras; the typed accessors below are the supported way in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Metadata key holding the tag list.
pub(crate) const META_TAGS: &str = "tags";
/// Metadata key holding extracted entity references.
pub(crate) const META_ENTITIES: &str = "entities";
/// Metadata key holding the encoded vector clock.
pub(crate) const META_VECTOR_CLOCK: &str = "vector_clock";

/// Unique identifier for a memory record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a memory ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new unique memory ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("mem_{}", Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Classification of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A specific experienced event.
    #[default]
    Episodic,
    /// A general fact or concept.
    Semantic,
    /// A how-to or learned procedure.
    Procedural,
    /// Short-lived task context.
    Working,
}

impl MemoryType {
    /// Returns the memory type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Working => "working",
        }
    }

    /// Parses a memory type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "episodic" => Some(Self::Episodic),
            "semantic" => Some(Self::Semantic),
            "procedural" => Some(Self::Procedural),
            "working" => Some(Self::Working),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored memory: canonical content plus merge metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier.
    pub id: MemoryId,
    /// Owning user.
    #[serde(default)]
    pub user_id: String,
    /// Originating session.
    #[serde(default)]
    pub session_id: String,
    /// The canonical observed text.
    pub content: String,
    /// Embedding vector; may be empty.
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Importance in [0, 1].
    pub importance: f64,
    /// Memory classification.
    #[serde(default)]
    pub memory_type: MemoryType,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Last access timestamp.
    pub last_access: DateTime<Utc>,
    /// Open-ended metadata; carries "tags", "entities", "vector_clock"
    /// by convention.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryRecord {
    /// Creates a new memory record with a generated id.
    ///
    /// Importance is clamped into [0, 1].
    #[must_use]
    pub fn new(content: impl Into<String>, memory_type: MemoryType, importance: f64) -> Self {
        let now = Utc::now();
        Self {
            id: MemoryId::generate(),
            user_id: String::new(),
            session_id: String::new(),
            content: content.into(),
            embedding: Vec::new(),
            importance: importance.clamp(0.0, 1.0),
            memory_type,
            created_at: now,
            updated_at: now,
            last_access: now,
            metadata: HashMap::new(),
        }
    }

    /// Builds the local record a first-seen event materializes into.
    ///
    /// The record adopts the event's content, embedding, importance, and
    /// timestamp; tags, entities, and the vector clock are folded into
    /// `metadata`. The type defaults to episodic: replicated events are
    /// observations until something reclassifies them.
    #[must_use]
    pub fn from_event(event: &MemoryEvent) -> Self {
        let mut metadata = event.metadata.clone();
        if !event.tags.is_empty() {
            metadata.insert(
                META_TAGS.to_string(),
                serde_json::Value::from(event.tags.clone()),
            );
        }
        if !event.entities.is_empty() {
            metadata.insert(
                META_ENTITIES.to_string(),
                serde_json::Value::Array(event.entities.clone()),
            );
        }
        if !event.vector_clock.is_empty() {
            metadata.insert(
                META_VECTOR_CLOCK.to_string(),
                serde_json::Value::from(event.vector_clock.clone()),
            );
        }

        Self {
            id: event.memory_id.clone(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            content: event.content.clone(),
            embedding: event.embedding.clone(),
            importance: event.importance.clamp(0.0, 1.0),
            memory_type: MemoryType::default(),
            created_at: event.timestamp,
            updated_at: event.timestamp,
            last_access: Utc::now(),
            metadata,
        }
    }

    /// Returns the tag set stored in metadata.
    #[must_use]
    pub fn tags(&self) -> BTreeSet<String> {
        self.metadata
            .get(META_TAGS)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replaces the tag set in metadata.
    ///
    /// Tags are stored sorted so that serialized records compare stably.
    pub fn set_tags(&mut self, tags: &BTreeSet<String>) {
        self.metadata.insert(
            META_TAGS.to_string(),
            serde_json::Value::from(tags.iter().cloned().collect::<Vec<_>>()),
        );
    }

    /// Returns the encoded vector clock, if one is stored.
    #[must_use]
    pub fn vector_clock(&self) -> Option<&str> {
        self.metadata.get(META_VECTOR_CLOCK).and_then(|v| v.as_str())
    }

    /// Stores an encoded vector clock in metadata.
    pub fn set_vector_clock(&mut self, encoded: impl Into<String>) {
        self.metadata.insert(
            META_VECTOR_CLOCK.to_string(),
            serde_json::Value::from(encoded.into()),
        );
    }
}

/// A replicated update proposal targeting one memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// The memory this event targets.
    pub memory_id: MemoryId,
    /// Originating user.
    #[serde(default)]
    pub user_id: String,
    /// Originating session.
    #[serde(default)]
    pub session_id: String,
    /// Proposed content.
    pub content: String,
    /// Proposed embedding; may be empty.
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Proposed importance in [0, 1].
    pub importance: f64,
    /// When the remote replica produced this event.
    pub timestamp: DateTime<Utc>,
    /// Encoded vector clock of the remote replica; may be empty.
    #[serde(default)]
    pub vector_clock: String,
    /// Tags carried by the event.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Entity references carried by the event, as `{id, name, confidence}`
    /// objects.
    #[serde(default)]
    pub entities: Vec<serde_json::Value>,
    /// Additional metadata merged on arrival.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryEvent {
    /// Returns the event's tags as a set.
    #[must_use]
    pub fn tag_set(&self) -> BTreeSet<String> {
        self.tags.iter().cloned().collect()
    }
}
