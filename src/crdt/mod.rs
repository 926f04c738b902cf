//! Conflict resolution for replicated memory updates.
//!
//! When the same memory id is written on two replicas, the engine hands
//! the local [`MemoryRecord`](crate::models::MemoryRecord) and the
//! incoming [`MemoryEvent`](crate::models::MemoryEvent) to a
//! [`ConflictResolver`], which produces a merged record using one of
//! four strategies (last-write-wins, field-wise merge-all,
//! importance-max, or vector-clock causality) or a user-supplied
//! function. The resolver is pure: no I/O, no locks.

mod clock;
mod resolver;

pub use clock::VectorClock;
pub use resolver::{
    ConflictReport, ConflictResolver, CustomResolver, MergeStrategy, Resolution,
};
