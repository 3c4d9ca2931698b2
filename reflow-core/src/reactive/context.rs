//! Execution Context
//!
//! An `ExecContext` is the rendezvous point between one execution attempt of
//! a consumer (or derived expression) and the producers it reads. Producers
//! register invalidation edges against the currently active context; when
//! any of them later changes, the context is invalidated exactly once and
//! its owner reacts through the callbacks registered here.
//!
//! Contexts are one-shot: a context transitions valid -> invalidated at most
//! once and is never reused. Every execution attempt creates a fresh one.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::edge::DependentSet;
use super::ids::CtxId;

type InvalidateCallback = Box<dyn FnOnce() + Send>;

struct CtxInner {
    invalidated: bool,
    /// Callbacks fire in registration order, exactly once.
    callbacks: SmallVec<[InvalidateCallback; 2]>,
    /// Producer edge tables this context is registered in, kept for
    /// symmetric cleanup when the context (not the producer) dies first.
    edges: SmallVec<[Weak<DependentSet>; 4]>,
}

/// A single execution attempt's dependency-tracking object.
pub struct ExecContext {
    id: CtxId,
    inner: Mutex<CtxInner>,
}

impl ExecContext {
    /// Create a fresh, valid context.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: CtxId::new(),
            inner: Mutex::new(CtxInner {
                invalidated: false,
                callbacks: SmallVec::new(),
                edges: SmallVec::new(),
            }),
        })
    }

    /// Get the context's unique ID.
    pub fn id(&self) -> CtxId {
        self.id
    }

    /// Whether `invalidate` has already run.
    pub fn is_invalidated(&self) -> bool {
        self.inner.lock().invalidated
    }

    /// Register `callback` to run at the moment this context is invalidated.
    ///
    /// If the context is already invalidated the callback fires immediately
    /// and synchronously, so there is no window in which an invalidation can
    /// be missed.
    pub fn on_invalidated<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.inner.lock();
            if !inner.invalidated {
                inner.callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Invalidate this context. Idempotent: the second and later calls are
    /// no-ops, so callbacks that invalidate other already-invalidated
    /// contexts cannot recurse infinitely.
    ///
    /// Callbacks run in registration order with no internal lock held, then
    /// the context removes itself from every producer edge table it is
    /// still registered in (the producer side erases eagerly as it fires;
    /// this is the owning-side cleanup for edges that never fired).
    pub fn invalidate(&self) {
        let (callbacks, edges) = {
            let mut inner = self.inner.lock();
            if inner.invalidated {
                return;
            }
            inner.invalidated = true;
            (
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.edges),
            )
        };

        trace!(ctx = self.id.raw(), callbacks = callbacks.len(), "context invalidated");

        for callback in callbacks {
            callback();
        }

        for edge in edges {
            if let Some(set) = edge.upgrade() {
                set.remove(self.id);
            }
        }
    }

    /// Record that this context appears in `set`, for symmetric cleanup.
    /// Called by the producer side when a new edge is registered.
    pub(crate) fn add_edge_backref(&self, set: Weak<DependentSet>) {
        let mut inner = self.inner.lock();
        if !inner.invalidated {
            inner.edges.push(set);
        }
    }
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("id", &self.id)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn callbacks_fire_in_registration_order() {
        let ctx = ExecContext::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            ctx.on_invalidated(move || order.lock().push(i));
        }

        ctx.invalidate();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn invalidate_is_idempotent() {
        let ctx = ExecContext::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        ctx.on_invalidated(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        ctx.invalidate();
        ctx.invalidate();
        ctx.invalidate();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(ctx.is_invalidated());
    }

    #[test]
    fn late_registration_fires_immediately() {
        let ctx = ExecContext::new();
        ctx.invalidate();

        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();
        ctx.on_invalidated(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_invalidating_same_context_does_not_recurse() {
        let ctx = ExecContext::new();
        let ctx_clone = ctx.clone();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        ctx.on_invalidated(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            ctx_clone.invalidate();
        });

        ctx.invalidate();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
