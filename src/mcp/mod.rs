//! Tool RPC surface: a named-operation dispatcher over the engine.
//!
//! This is the external collaborator boundary: a thin switch mapping
//! operation names with JSON-shaped arguments onto
//! [`MemoryEngine`](crate::MemoryEngine) methods. No authentication or
//! transport framing lives here; those belong to the hosting adapter.

mod dispatch;

pub use dispatch::{Operation, dispatch};
