//! Identifier types for nodes and execution contexts.
//!
//! Every producer and consumer gets a `NodeId` at creation; every execution
//! attempt gets a fresh `CtxId`. Both are process-wide atomic counters, so
//! identifiers stay unique even across concurrently running sessions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a producer or consumer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a single execution context.
///
/// Contexts are never reused: each execution attempt of a consumer or
/// derived expression mints a fresh ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtxId(u64);

impl CtxId {
    /// Generate a new unique context ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for CtxId {
    fn default() -> Self {
        Self::new()
    }
}
