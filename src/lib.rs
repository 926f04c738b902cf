//! # Engram
//!
//! A persistent knowledge-graph memory store for AI agents.
//!
//! Engram records an agent's episodic, semantic, procedural, and working
//! memories as a content-addressed entity/relation graph, serves keyword
//! and relevance-scored search over it, persists the whole graph as an
//! atomic JSON snapshot, and merges concurrent updates arriving from
//! other replicas with CRDT-style conflict resolution.
//!
//! ## Architecture
//!
//! Five cooperating components, bottom-up:
//!
//! 1. [`storage::GraphStore`]: the in-memory knowledge graph, two
//!    interlocked id-keyed maps with capacity limits and cascade delete.
//! 2. [`services::search`]: pure query functions over the graph, a
//!    filtered scan and an additively scored relevance search.
//! 3. [`storage::SnapshotStore`]: crash-safe snapshot persistence via
//!    write-to-temp-then-rename.
//! 4. [`crdt`]: the conflict resolver, four merge strategies including
//!    vector-clock causality, plus an optional user-supplied resolver.
//! 5. [`MemoryEngine`]: the facade, with one read/write lock over all
//!    state, a monotonic version counter, a dirty flag, and a background
//!    flusher thread.
//!
//! ## Example
//!
//! ```rust
//! use engram::{CancelToken, EngineConfig, MemoryEngine};
//!
//! # fn main() -> engram::Result<()> {
//! let config = EngineConfig {
//!     enable_persistence: false,
//!     ..EngineConfig::default()
//! };
//! let engine = MemoryEngine::new(config);
//! let token = CancelToken::new();
//!
//! engine.initialize(&token)?;
//! let alice = engine.create_entity(
//!     &token,
//!     "Alice",
//!     "person",
//!     vec!["Works on the storage layer".to_string()],
//!     None,
//! )?;
//! assert_eq!(engine.get_entity(&token, &alice.id)?.name, "Alice");
//! engine.close(&token)?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod crdt;
pub mod mcp;
pub mod models;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{EngineConfig, SnapshotRecovery};
pub use crdt::{ConflictReport, ConflictResolver, MergeStrategy, Resolution, VectorClock};
pub use models::{
    Direction, Entity, EntityId, EntityWithRelations, GraphStatistics, KnowledgeGraph, MemoryEvent,
    MemoryId, MemoryRecord, MemoryType, Relation, RelationId,
};
pub use services::{CancelToken, MemoryEngine, ScoredEntity};

/// Error type for engram operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotReady` | Operation invoked before `initialize` or after `close` |
/// | `NotFound` | Entity, relation, or memory id/name absent from the graph |
/// | `CapacityExceeded` | Entity or relation limit reached |
/// | `Invariant` | Internal contract violation (duplicate engine-assigned id, poisoned lock) |
/// | `BadRequest` | Malformed argument (empty required field, unparseable payload) |
/// | `Persistence` | I/O, serialization, or rename failure while saving or loading |
/// | `UnknownOperation` | Dispatcher received an operation name it does not know |
/// | `Cancelled` | The caller's cancellation token was set before the operation entered |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The engine has not been initialized, or has been closed.
    #[error("engine not ready: call initialize() first")]
    NotReady,

    /// An identifier or name was not found in the graph.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing item, e.g. `entity ent_1234`.
        what: String,
    },

    /// A configured capacity limit was reached.
    ///
    /// The engine does not evict; callers must delete before creating
    /// more, or raise the limit in [`EngineConfig`].
    #[error("capacity exceeded: {resource} limit of {limit} reached")]
    CapacityExceeded {
        /// Which resource hit its cap ("entities" or "relations").
        resource: &'static str,
        /// The configured limit.
        limit: usize,
    },

    /// An internal contract was violated.
    ///
    /// Raised when:
    /// - An engine-assigned id collides with an existing one
    /// - The state lock is poisoned by a panicking writer
    ///
    /// These indicate programmer error, not bad input.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Required parameters are missing or empty
    /// - JSON deserialization fails in dispatcher handlers
    /// - A vector clock or metadata value fails to parse
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A persistence operation failed.
    ///
    /// Raised when:
    /// - The snapshot cannot be serialized or written
    /// - The atomic rename fails
    /// - The snapshot is unparseable and recovery is set to
    ///   [`SnapshotRecovery::FailFast`]
    #[error("persistence operation '{operation}' failed: {cause}")]
    Persistence {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The dispatcher received an unrecognized operation name.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// The operation was cancelled before it took the lock.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias for engram operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound {
            what: "entity ent_42".to_string(),
        };
        assert_eq!(err.to_string(), "not found: entity ent_42");

        let err = Error::CapacityExceeded {
            resource: "entities",
            limit: 10,
        };
        assert_eq!(
            err.to_string(),
            "capacity exceeded: entities limit of 10 reached"
        );

        let err = Error::Persistence {
            operation: "save_snapshot".to_string(),
            cause: "disk full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "persistence operation 'save_snapshot' failed: disk full"
        );

        let err = Error::UnknownOperation("memory_frobnicate".to_string());
        assert_eq!(err.to_string(), "unknown operation: memory_frobnicate");
    }
}
