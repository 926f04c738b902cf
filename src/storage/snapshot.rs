//! Atomic snapshot persistence.
//!
//! The entire graph (entities, relations, replicated memory records,
//! version, and last-update time) lives in a single JSON document at
//! `<storage_path>/knowledge_graph.json`. Saves are atomic: serialize,
//! write to a `.tmp` sibling, fsync, then rename over the target, so a
//! reader never observes a partial write. Loads tolerate an absent file;
//! an unparseable one is handled per the configured
//! [`SnapshotRecovery`] policy.
//!
//! On unix the storage directory is created `0o750` and the snapshot
//! written `0o600`, private to the running identity.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::SnapshotRecovery;
use crate::models::{
    Entity, EntityId, KnowledgeGraph, MemoryId, MemoryRecord, Relation, RelationId,
};
use crate::{Error, Result};

/// File name of the snapshot inside the storage directory.
pub const SNAPSHOT_FILE: &str = "knowledge_graph.json";

/// The on-disk document.
///
/// `memories` is omitted when empty and tolerated when absent, so a
/// graph-only snapshot round-trips unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Entities keyed by id.
    #[serde(default)]
    pub entities: IndexMap<EntityId, Entity>,
    /// Relations keyed by id.
    #[serde(default)]
    pub relations: IndexMap<RelationId, Relation>,
    /// Replicated memory records keyed by id.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub memories: IndexMap<MemoryId, MemoryRecord>,
    /// Graph version at save time.
    #[serde(default)]
    pub version: u64,
    /// Graph last-mutation time at save time.
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Splits the snapshot into the graph container and the memory map.
    #[must_use]
    pub fn into_parts(self) -> (KnowledgeGraph, IndexMap<MemoryId, MemoryRecord>) {
        (
            KnowledgeGraph {
                entities: self.entities,
                relations: self.relations,
                version: self.version,
                updated_at: self.updated_at,
            },
            self.memories,
        )
    }
}

/// Borrowed view serialized on save, sparing a clone of the whole graph.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    entities: &'a IndexMap<EntityId, Entity>,
    relations: &'a IndexMap<RelationId, Relation>,
    #[serde(skip_serializing_if = "memories_empty")]
    memories: &'a IndexMap<MemoryId, MemoryRecord>,
    version: u64,
    updated_at: DateTime<Utc>,
}

// serde hands skip_serializing_if a reference to the field, which is
// itself a reference here.
#[allow(clippy::trivially_copy_pass_by_ref)]
fn memories_empty(memories: &&IndexMap<MemoryId, MemoryRecord>) -> bool {
    memories.is_empty()
}

/// Reads and writes the snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    recovery: SnapshotRecovery,
}

impl SnapshotStore {
    /// Creates a store rooted at the given directory.
    ///
    /// The directory is created lazily, on the first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, recovery: SnapshotRecovery) -> Self {
        Self {
            dir: dir.into(),
            recovery,
        }
    }

    /// Returns the snapshot file path.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Returns the snapshot file size in bytes, if the file exists.
    #[must_use]
    pub fn size_on_disk(&self) -> Option<u64> {
        fs::metadata(self.path()).ok().map(|m| m.len())
    }

    /// Loads the snapshot.
    ///
    /// Absent file → `Ok(None)`. Unparseable file → `Ok(None)` with a
    /// warning under [`SnapshotRecovery::DiscardAndWarn`], or a
    /// `Persistence` error under [`SnapshotRecovery::FailFast`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the file exists but cannot be
    /// read, or cannot be parsed and recovery is `FailFast`.
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path).map_err(|e| Error::Persistence {
            operation: "read_snapshot".to_string(),
            cause: e.to_string(),
        })?;

        match serde_json::from_str::<Snapshot>(&json) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => match self.recovery {
                SnapshotRecovery::DiscardAndWarn => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "snapshot unparseable, starting with an empty graph"
                    );
                    Ok(None)
                }
                SnapshotRecovery::FailFast => Err(Error::Persistence {
                    operation: "parse_snapshot".to_string(),
                    cause: format!("{} is unparseable: {e}", path.display()),
                }),
            },
        }
    }

    /// Saves the graph and memory records atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on serialization, write, fsync, or
    /// rename failure. A failed rename removes the temporary file on a
    /// best-effort basis.
    pub fn save(
        &self,
        graph: &KnowledgeGraph,
        memories: &IndexMap<MemoryId, MemoryRecord>,
    ) -> Result<()> {
        self.ensure_dir()?;

        let document = SnapshotRef {
            entities: &graph.entities,
            relations: &graph.relations,
            memories,
            version: graph.version,
            updated_at: graph.updated_at,
        };
        let json = serde_json::to_vec_pretty(&document).map_err(|e| Error::Persistence {
            operation: "serialize_snapshot".to_string(),
            cause: e.to_string(),
        })?;

        let path = self.path();
        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));

        write_private(&tmp, &json).map_err(|e| Error::Persistence {
            operation: "write_snapshot_tmp".to_string(),
            cause: e.to_string(),
        })?;

        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Persistence {
                operation: "rename_snapshot".to_string(),
                cause: e.to_string(),
            });
        }

        Ok(())
    }

    /// Creates the storage directory if needed, `0o750` on unix.
    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::Persistence {
            operation: "create_storage_dir".to_string(),
            cause: e.to_string(),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o750));
        }

        Ok(())
    }
}

/// Writes bytes to a freshly created file and fsyncs it.
///
/// The file is `0o600` on unix so the rename target inherits private
/// permissions.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(bytes)?;
    file.sync_all()
}
