//! Storage: the in-memory graph store and snapshot persistence.

mod graph;
mod snapshot;

pub use graph::GraphStore;
pub use snapshot::{Snapshot, SnapshotStore};
