//! Observer
//!
//! An `Observer` is a consumer: it runs for side effects (or to render an
//! output) and is never read by other nodes. It owns the lifecycle of
//! repeatedly creating a fresh execution context, running user code under
//! it, and re-enqueuing itself when any producer it read is invalidated.
//!
//! # State machine
//!
//! ```text
//! Invalidated --scheduler--> Running --body done--> Idle
//!      ^                                              |
//!      +--------------- dependency invalidated -------+
//!
//! Destroyed is terminal and reachable from any state.
//! ```
//!
//! Body errors are reported to the session's error sink and never propagate
//! to the scheduler: one failed run is terminal for that run only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::context::ExecContext;
use super::ids::NodeId;
use super::scheduler::Scheduler;
use super::session::Scope;
use crate::error::{BodyResult, ReactiveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObserverState {
    Invalidated,
    Running,
    Idle,
    Destroyed,
}

/// Body of an observer. Plain observers yield `None`; output observers
/// yield the rendered value recorded into the round's output map.
type ObserverBody = Box<dyn Fn() -> BodyResult<Option<serde_json::Value>> + Send + Sync>;

pub(crate) struct ObserverInner {
    id: NodeId,
    scope: Arc<Scope>,
    scheduler: Weak<Scheduler>,
    body: ObserverBody,
    /// Higher runs first; ties broken FIFO by creation sequence.
    priority: i32,
    seq: u64,
    /// Output name, for observers that render into the flush payload.
    output: Option<String>,
    state: Mutex<ObserverState>,
    last_ctx: Mutex<Option<Arc<ExecContext>>>,
    runs: AtomicU64,
}

/// A side-effecting consumer, scheduled by the session's flush loop.
///
/// Cloning an `Observer` yields another handle to the same underlying node.
pub struct Observer {
    inner: Arc<ObserverInner>,
}

impl Observer {
    pub(crate) fn new<F>(
        scope: Arc<Scope>,
        scheduler: &Arc<Scheduler>,
        body: F,
        priority: i32,
        output: Option<String>,
    ) -> Self
    where
        F: Fn() -> BodyResult<Option<serde_json::Value>> + Send + Sync + 'static,
    {
        let inner = Arc::new(ObserverInner {
            id: NodeId::new(),
            scope,
            scheduler: Arc::downgrade(scheduler),
            body: Box::new(body),
            priority,
            seq: scheduler.next_seq(),
            output,
            state: Mutex::new(ObserverState::Invalidated),
            last_ctx: Mutex::new(None),
            runs: AtomicU64::new(0),
        });
        // Consumers are born invalidated and eligible for the first round.
        scheduler.enqueue(&inner);
        Self { inner }
    }

    /// Get the observer's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Scheduling priority (higher runs first).
    pub fn priority(&self) -> i32 {
        self.inner.priority
    }

    /// Number of completed body executions.
    pub fn run_count(&self) -> u64 {
        self.inner.runs.load(Ordering::SeqCst)
    }

    /// Whether the observer has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        *self.inner.state.lock() == ObserverState::Destroyed
    }

    /// Tear the observer down: no future invalidation re-enqueues it, and
    /// all its outgoing edges are erased.
    pub fn destroy(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == ObserverState::Destroyed {
                return;
            }
            *state = ObserverState::Destroyed;
        }
        // The context hook observes Destroyed and does not re-enqueue.
        if let Some(ctx) = self.inner.last_ctx.lock().take() {
            ctx.invalidate();
        }
        debug!(node = self.inner.id.raw(), "observer destroyed");
    }
}

impl ObserverInner {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Execute one run. Skipped unless the state is Invalidated (a
    /// destroyed or already-idle observer popped from the queue is stale).
    pub(crate) fn run(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != ObserverState::Invalidated {
                trace!(node = self.id.raw(), state = ?*state, "skipping stale queue entry");
                return;
            }
            *state = ObserverState::Running;
        }

        let ctx = ExecContext::new();
        *self.last_ctx.lock() = Some(ctx.clone());
        trace!(node = self.id.raw(), ctx = ctx.id().raw(), "observer running");

        let outcome = {
            let _active = self.scope.stack.activate(ctx.clone());
            (self.body)()
        };
        self.runs.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = self.state.lock();
            // destroy() during the body wins over the Idle transition.
            if *state == ObserverState::Running {
                *state = ObserverState::Idle;
            }
        }

        match outcome {
            Ok(Some(value)) => {
                if let (Some(name), Some(sched)) = (&self.output, self.scheduler.upgrade()) {
                    sched.record_output(name.clone(), value);
                }
            }
            Ok(None) => {}
            Err(err) => {
                let err = ReactiveError::from_body(self.id, err);
                warn!(node = self.id.raw(), %err, "observer body failed");
                if let Some(sched) = self.scheduler.upgrade() {
                    sched.report_error(self.id, &err);
                }
            }
        }

        // Re-arm: the next invalidation of anything this run read flips the
        // observer back to Invalidated and re-enqueues it. Registered after
        // the run so a mid-run invalidation fires immediately here.
        let weak = Arc::downgrade(&self);
        ctx.on_invalidated(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_dependency_invalidated();
            }
        });
    }

    fn on_dependency_invalidated(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            match *state {
                ObserverState::Idle | ObserverState::Running => {
                    *state = ObserverState::Invalidated;
                }
                // Already queued, or gone for good.
                ObserverState::Invalidated | ObserverState::Destroyed => return,
            }
        }
        trace!(node = self.id.raw(), "observer invalidated, enqueuing");
        if let Some(sched) = self.scheduler.upgrade() {
            sched.enqueue(&self);
        }
    }
}

impl Clone for Observer {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.inner.id)
            .field("priority", &self.inner.priority)
            .field("runs", &self.run_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
