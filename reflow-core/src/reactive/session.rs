//! Session
//!
//! A `Session` is one isolated instance of the whole reactive graph: its own
//! context stack, its own scheduler, its own nodes. Sessions share nothing,
//! so independent sessions may run truly concurrently without coordination.
//!
//! The session is also where the host wires in its collaborators: the flush
//! sink (receives each round's rendered outputs), the error sink (receives
//! observer body failures), and the timer (serves deferred invalidations).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::derived::Derived;
use super::observer::Observer;
use super::scheduler::{ErrorSink, FlushSink, Scheduler};
use super::source::Source;
use super::stack::ContextStack;
use crate::error::BodyResult;
use crate::host::Timer;

/// State shared by every node of one session: the context stack, the
/// session-destroyed flag, and the timer collaborator slot.
pub(crate) struct Scope {
    pub(crate) stack: Arc<ContextStack>,
    destroyed: AtomicBool,
    timer: Mutex<Option<Arc<dyn Timer>>>,
}

impl Scope {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            stack: ContextStack::new(),
            destroyed: AtomicBool::new(false),
            timer: Mutex::new(None),
        })
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn timer(&self) -> Option<Arc<dyn Timer>> {
        self.timer.lock().clone()
    }

    pub(crate) fn set_timer(&self, timer: Arc<dyn Timer>) {
        *self.timer.lock() = Some(timer);
    }
}

/// Producer teardown handle, held by the session until destroy.
trait Teardown: Send + Sync {
    fn teardown(&self);
}

impl<T: Clone + Send + Sync + 'static> Teardown for Source<T> {
    fn teardown(&self) {
        self.destroy();
    }
}

impl<T: Clone + Send + Sync + 'static> Teardown for Derived<T> {
    fn teardown(&self) {
        self.destroy();
    }
}

struct SessionInner {
    id: u64,
    scope: Arc<Scope>,
    scheduler: Arc<Scheduler>,
    producers: Mutex<Vec<Box<dyn Teardown>>>,
    observers: Mutex<Vec<Observer>>,
}

/// An isolated reactive graph with its own flush loop.
///
/// Cloning a `Session` yields another handle to the same session.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create an empty session.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        info!(session = id, "session created");
        Self {
            inner: Arc::new(SessionInner {
                id,
                scope: Scope::new(),
                scheduler: Scheduler::new(),
                producers: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Session identifier, unique within the process.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Create a reactive value using `PartialEq` to suppress no-op writes.
    pub fn source<T>(&self, initial: T) -> Source<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.source_with(initial, |a: &T, b: &T| a == b)
    }

    /// Create a reactive value with a custom equality predicate.
    pub fn source_with<T, F>(&self, initial: T, equals: F) -> Source<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let source = Source::new(self.inner.scope.clone(), initial, equals);
        self.inner.producers.lock().push(Box::new(source.clone()));
        source
    }

    /// Create a lazy, cached, invalidation-aware expression.
    pub fn derived<T, F>(&self, body: F) -> Derived<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> BodyResult<T> + Send + Sync + 'static,
    {
        let derived = Derived::new(self.inner.scope.clone(), body);
        self.inner.producers.lock().push(Box::new(derived.clone()));
        derived
    }

    /// Create an observer at the default priority (0). It starts
    /// invalidated and runs on the next flush.
    pub fn observer<F>(&self, body: F) -> Observer
    where
        F: Fn() -> BodyResult<()> + Send + Sync + 'static,
    {
        self.observer_with_priority(body, 0)
    }

    /// Create an observer with an explicit priority; higher runs first.
    pub fn observer_with_priority<F>(&self, body: F, priority: i32) -> Observer
    where
        F: Fn() -> BodyResult<()> + Send + Sync + 'static,
    {
        let observer = Observer::new(
            self.inner.scope.clone(),
            &self.inner.scheduler,
            move || body().map(|()| None),
            priority,
            None,
        );
        self.inner.observers.lock().push(observer.clone());
        observer
    }

    /// Create an output observer: each successful run records the rendered
    /// value under `name` in the round's flush payload.
    pub fn output<F>(&self, name: impl Into<String>, body: F) -> Observer
    where
        F: Fn() -> BodyResult<serde_json::Value> + Send + Sync + 'static,
    {
        let observer = Observer::new(
            self.inner.scope.clone(),
            &self.inner.scheduler,
            move || body().map(Some),
            0,
            Some(name.into()),
        );
        self.inner.observers.lock().push(observer.clone());
        observer
    }

    /// Install the flush sink, invoked once per completed executing round
    /// with the rendered outputs produced in that round.
    pub fn on_flush(&self, sink: FlushSink) {
        self.inner.scheduler.set_flush_sink(sink);
    }

    /// Install the error sink, invoked when an observer body fails.
    pub fn on_error(&self, sink: ErrorSink) {
        self.inner.scheduler.set_error_sink(sink);
    }

    /// Install the timer collaborator used by deferred invalidations. The
    /// timer must marshal callbacks onto this session's logical thread.
    pub fn set_timer(&self, timer: Arc<dyn Timer>) {
        self.inner.scope.set_timer(timer);
    }

    /// Run every invalidated observer to quiescence, then flush. No-op when
    /// the session is already mid-round or destroyed.
    pub fn flush(&self) {
        if self.inner.scope.is_destroyed() {
            return;
        }
        self.inner.scheduler.flush();
    }

    /// Whether `destroy` has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.scope.is_destroyed()
    }

    /// Tear the session down: destroy every observer (without re-enqueuing)
    /// and every producer, and drop all queued work. Late external events
    /// against this session become no-ops.
    pub fn destroy(&self) {
        if self.inner.scope.is_destroyed() {
            return;
        }
        self.inner.scope.mark_destroyed();
        debug!(session = self.inner.id, "session tearing down");

        for observer in self.inner.observers.lock().drain(..) {
            observer.destroy();
        }
        for producer in self.inner.producers.lock().drain(..) {
            producer.teardown();
        }
        self.inner.scheduler.clear();
        info!(session = self.inner.id, "session destroyed");
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
