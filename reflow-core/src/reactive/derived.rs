//! Reactive Expression
//!
//! A `Derived` is a lazily evaluated, cached, invalidation-aware producer.
//! It is simultaneously a consumer of its own upstream dependencies and a
//! producer to its readers: when the context its body last ran under is
//! invalidated, the cached result is discarded and the invalidation
//! propagates to the expression's own dependents.
//!
//! # State machine
//!
//! ```text
//! Invalidated --read--> Running --body done--> Idle(cached result)
//!      ^                                            |
//!      +------------- upstream invalidation --------+
//! ```
//!
//! `Running` is only ever entered from `Invalidated`; a read that finds the
//! expression `Running` is a dependency cycle and fails. `Idle` caches the
//! body's outcome whether it was a value or an error: subsequent reads
//! within the same idle period return the identical cached result without
//! re-executing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::ExecContext;
use super::edge::DependentSet;
use super::ids::NodeId;
use super::session::Scope;
use crate::error::{BodyResult, ReactiveError};

enum DerivedState<T> {
    Invalidated,
    Running,
    Idle(Result<T, ReactiveError>),
}

pub(crate) struct DerivedInner<T> {
    id: NodeId,
    scope: Arc<Scope>,
    body: Box<dyn Fn() -> BodyResult<T> + Send + Sync>,
    state: Mutex<DerivedState<T>>,
    /// Context the body last ran under; invalidating it flips this node
    /// back to Invalidated.
    last_ctx: Mutex<Option<Arc<ExecContext>>>,
    dependents: Arc<DependentSet>,
    destroyed: AtomicBool,
    runs: AtomicU64,
}

/// A cached, invalidation-aware derived expression.
///
/// Cloning a `Derived` yields another handle to the same underlying node.
pub struct Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new<F>(scope: Arc<Scope>, body: F) -> Self
    where
        F: Fn() -> BodyResult<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(DerivedInner {
                id: NodeId::new(),
                scope,
                body: Box::new(body),
                state: Mutex::new(DerivedState::Invalidated),
                last_ctx: Mutex::new(None),
                dependents: DependentSet::new(),
                destroyed: AtomicBool::new(false),
                runs: AtomicU64::new(0),
            }),
        }
    }

    /// Get the expression's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Read the expression's value, executing the body only if the cache is
    /// invalid. Registers a dependency edge from this expression to the
    /// active outer context (if any). A cached error re-raises identically
    /// on every read until the next invalidation.
    pub fn read(&self) -> Result<T, ReactiveError> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            return Err(ReactiveError::ProducerDestroyed(inner.id));
        }

        let cached = {
            let mut state = inner.state.lock();
            match &*state {
                DerivedState::Running => return Err(ReactiveError::Cycle(inner.id)),
                DerivedState::Invalidated => {
                    *state = DerivedState::Running;
                    None
                }
                DerivedState::Idle(result) => Some(result.clone()),
            }
        };

        let result = match cached {
            Some(result) => result,
            None => DerivedInner::execute(inner),
        };

        // Regardless of whether the body ran, the reader now depends on us.
        if let Some(ctx) = inner.scope.stack.current() {
            DependentSet::register(&inner.dependents, &ctx);
        }

        result
    }

    /// Number of times the body has executed.
    pub fn run_count(&self) -> u64 {
        self.inner.runs.load(Ordering::SeqCst)
    }

    /// Number of execution contexts currently depending on this expression.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.len()
    }

    /// Mark the expression destroyed: upstream edges are released and
    /// downstream edges erased without firing.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ctx) = self.inner.last_ctx.lock().take() {
            ctx.invalidate();
        }
        self.inner.dependents.clear();
        debug!(node = self.inner.id.raw(), "derived destroyed");
    }
}

impl<T> DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run the body under a fresh execution context and cache the outcome.
    /// Only called with the state already set to `Running`.
    fn execute(inner: &Arc<Self>) -> Result<T, ReactiveError> {
        let ctx = ExecContext::new();
        *inner.last_ctx.lock() = Some(ctx.clone());
        trace!(node = inner.id.raw(), ctx = ctx.id().raw(), "derived executing");

        let outcome = {
            let _active = inner.scope.stack.activate(ctx.clone());
            (inner.body)()
        };
        inner.runs.fetch_add(1, Ordering::SeqCst);

        let result = outcome.map_err(|err| ReactiveError::from_body(inner.id, err));
        *inner.state.lock() = DerivedState::Idle(result.clone());

        // Arm the upstream hook only after the cache is in place. If an
        // upstream producer was already written while the body ran, the
        // context is invalidated by now and the hook fires immediately,
        // flipping the state straight back to Invalidated.
        let weak = Arc::downgrade(inner);
        ctx.on_invalidated(move || {
            if let Some(inner) = weak.upgrade() {
                Self::on_upstream_invalidated(&inner);
            }
        });

        result
    }

    /// Upstream dependency changed: discard the cache and propagate to our
    /// own dependents. An expression transition Idle -> Invalidated is
    /// itself an invalidation event for everything that read it.
    fn on_upstream_invalidated(inner: &Arc<Self>) {
        if inner.destroyed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = inner.state.lock();
            match &*state {
                DerivedState::Idle(_) => *state = DerivedState::Invalidated,
                // Already invalidated: dependents were notified the first
                // time. Running is unreachable here since the hook is armed
                // after execution completes.
                _ => return,
            }
        }
        debug!(node = inner.id.raw(), "derived invalidated, propagating");
        inner.dependents.invalidate_all();
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("runs", &self.run_count())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}
