//! Dependency Edges
//!
//! The bipartite relation between producers and execution contexts. Each
//! producer owns a `DependentSet`: the contexts that read it during their
//! last execution. Edges are created on read and erased on invalidation,
//! so the graph is rebuilt from scratch on every execution.
//!
//! An edge fires at most once: `invalidate_all` drains the table before
//! notifying anyone, and the context side symmetrically removes itself when
//! it is invalidated through some other producer first.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use super::context::ExecContext;
use super::ids::CtxId;

/// The set of execution contexts depending on one producer.
///
/// Insertion-ordered so traversal is deterministic within a run; callers
/// must not rely on any particular order across runs.
pub struct DependentSet {
    edges: Mutex<IndexMap<CtxId, Weak<ExecContext>>>,
}

impl DependentSet {
    /// Create an empty edge table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            edges: Mutex::new(IndexMap::new()),
        })
    }

    /// Register an edge from the producer owning `this` to `ctx`.
    /// Idempotent: reading the same producer twice within one execution
    /// yields a single edge. Newly inserted edges also leave a backref on
    /// the context for symmetric cleanup.
    pub fn register(this: &Arc<Self>, ctx: &Arc<ExecContext>) {
        if ctx.is_invalidated() {
            return;
        }
        let inserted = {
            let mut edges = this.edges.lock();
            match edges.entry(ctx.id()) {
                indexmap::map::Entry::Occupied(_) => false,
                indexmap::map::Entry::Vacant(slot) => {
                    slot.insert(Arc::downgrade(ctx));
                    true
                }
            }
        };
        if inserted {
            ctx.add_edge_backref(Arc::downgrade(this));
            trace!(ctx = ctx.id().raw(), "dependency edge registered");
        }
    }

    /// Erase the edge to `ctx_id`, if still present. Called by the context
    /// side during its own invalidation; a no-op when the producer side
    /// already drained the edge.
    pub fn remove(&self, ctx_id: CtxId) {
        self.edges.lock().swap_remove(&ctx_id);
    }

    /// Drain every edge and invalidate the target contexts in insertion
    /// order. Each edge is removed before its context is notified, so an
    /// edge can never fire twice even if a callback re-enters this
    /// producer.
    pub fn invalidate_all(&self) {
        let drained: Vec<Weak<ExecContext>> = {
            let mut edges = self.edges.lock();
            edges.drain(..).map(|(_, weak)| weak).collect()
        };

        if drained.is_empty() {
            return;
        }
        trace!(count = drained.len(), "invalidating dependents");

        for weak in drained {
            if let Some(ctx) = weak.upgrade() {
                ctx.invalidate();
            }
        }
    }

    /// Erase every edge without firing it. Used when the producer itself is
    /// destroyed: readers are not invalidated, the edges simply cease to
    /// exist.
    pub fn clear(&self) {
        self.edges.lock().clear();
    }

    /// Number of live edges.
    pub fn len(&self) -> usize {
        self.edges.lock().len()
    }

    /// Whether the table holds no edges.
    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn register_is_idempotent_per_context() {
        let set = DependentSet::new();
        let ctx = ExecContext::new();

        DependentSet::register(&set, &ctx);
        DependentSet::register(&set, &ctx);
        DependentSet::register(&set, &ctx);

        assert_eq!(set.len(), 1);
    }

    #[test]
    fn invalidate_all_fires_each_edge_once_and_drains() {
        let set = DependentSet::new();
        let count = Arc::new(AtomicI32::new(0));

        let ctx1 = ExecContext::new();
        let ctx2 = ExecContext::new();
        for ctx in [&ctx1, &ctx2] {
            let count = count.clone();
            ctx.on_invalidated(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
            DependentSet::register(&set, ctx);
        }

        set.invalidate_all();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(set.is_empty());

        // A second pass finds nothing to fire.
        set.invalidate_all();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn context_invalidated_elsewhere_removes_itself() {
        let set = DependentSet::new();
        let ctx = ExecContext::new();
        DependentSet::register(&set, &ctx);
        assert_eq!(set.len(), 1);

        // Invalidated through a different producer: the backref erases the
        // edge here, so this producer will never fire a stale edge.
        ctx.invalidate();
        assert!(set.is_empty());
    }

    #[test]
    fn invalidated_context_is_not_registered() {
        let set = DependentSet::new();
        let ctx = ExecContext::new();
        ctx.invalidate();

        DependentSet::register(&set, &ctx);
        assert!(set.is_empty());
    }

    #[test]
    fn dropped_context_is_skipped() {
        let set = DependentSet::new();
        let ctx = ExecContext::new();
        DependentSet::register(&set, &ctx);
        drop(ctx);

        // Weak upgrade fails; must not panic.
        set.invalidate_all();
        assert!(set.is_empty());
    }
}
