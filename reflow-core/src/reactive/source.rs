//! Reactive Value
//!
//! A `Source` is the externally settable producer. It holds a current value,
//! an equality predicate, and the set of execution contexts that read it
//! during their last run.
//!
//! # How Sources Work
//!
//! 1. A read inside an active execution context registers a dependency edge
//!    from this source to that context.
//!
//! 2. A write replaces the value and invalidates every dependent context,
//!    erasing the edges as they fire. The graph for this source is then
//!    rebuilt from scratch by the dependents' next executions.
//!
//! 3. A write whose new value is equal under the configured predicate is a
//!    deliberate no-op: zero invalidations, zero re-executions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::edge::DependentSet;
use super::ids::NodeId;
use super::session::Scope;
use crate::error::ReactiveError;

type EqualityFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

pub(crate) struct SourceInner<T> {
    id: NodeId,
    scope: Arc<Scope>,
    value: RwLock<T>,
    equals: EqualityFn<T>,
    dependents: Arc<DependentSet>,
    destroyed: AtomicBool,
}

/// An externally settable reactive value.
///
/// Cloning a `Source` yields another handle to the same underlying node.
pub struct Source<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SourceInner<T>>,
}

impl<T> Source<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new<F>(scope: Arc<Scope>, initial: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SourceInner {
                id: NodeId::new(),
                scope,
                value: RwLock::new(initial),
                equals: Box::new(equals),
                dependents: DependentSet::new(),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Get the source's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Read the current value, registering a dependency edge to the active
    /// execution context (if any).
    pub fn read(&self) -> Result<T, ReactiveError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(ReactiveError::ProducerDestroyed(self.inner.id));
        }

        if let Some(ctx) = self.inner.scope.stack.current() {
            DependentSet::register(&self.inner.dependents, &ctx);
        }

        Ok(self.inner.value.read().clone())
    }

    /// Read the current value without registering a dependency.
    pub fn peek(&self) -> Result<T, ReactiveError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(ReactiveError::ProducerDestroyed(self.inner.id));
        }
        Ok(self.inner.value.read().clone())
    }

    /// Replace the value and invalidate dependents.
    ///
    /// If the new value is equal to the current one under the configured
    /// predicate, nothing happens: no invalidation fires and no consumer
    /// re-executes. A write arriving after the owning session was destroyed
    /// is dropped as a no-op.
    pub fn write(&self, new_value: T) -> Result<(), ReactiveError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            if self.inner.scope.is_destroyed() {
                trace!(node = self.inner.id.raw(), "write dropped, session destroyed");
                return Ok(());
            }
            return Err(ReactiveError::ProducerDestroyed(self.inner.id));
        }

        {
            let mut value = self.inner.value.write();
            if (self.inner.equals)(&value, &new_value) {
                trace!(node = self.inner.id.raw(), "write suppressed, value unchanged");
                return Ok(());
            }
            *value = new_value;
        }

        debug!(node = self.inner.id.raw(), "source written, invalidating dependents");
        self.inner.dependents.invalidate_all();
        Ok(())
    }

    /// Update the value with a function of the current value.
    pub fn modify<F>(&self, f: F) -> Result<(), ReactiveError>
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let value = self.inner.value.read();
            f(&value)
        };
        self.write(new_value)
    }

    /// Schedule this source's dependents to be invalidated after `delay`,
    /// through the session's timer collaborator.
    ///
    /// The value itself is untouched; this is the deferred self-invalidation
    /// hook for polling-style sources. The timer must marshal the callback
    /// onto the session's logical thread.
    pub fn invalidate_after(&self, delay: Duration) -> Result<(), ReactiveError> {
        let timer = self.inner.scope.timer().ok_or(ReactiveError::NoTimer)?;
        let weak = Arc::downgrade(&self.inner);
        timer.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if !inner.destroyed.load(Ordering::SeqCst) {
                        debug!(node = inner.id.raw(), "deferred invalidation fired");
                        inner.dependents.invalidate_all();
                    }
                }
            }),
        );
        Ok(())
    }

    /// Number of execution contexts currently depending on this source.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.len()
    }

    /// Mark the source destroyed and erase its edges without firing them.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.dependents.clear();
        debug!(node = self.inner.id.raw(), "source destroyed");
    }
}

impl<T> Clone for Source<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Source<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context::ExecContext;

    fn detached_source<T: Clone + PartialEq + Send + Sync + 'static>(initial: T) -> Source<T> {
        Source::new(Scope::new(), initial, |a: &T, b: &T| a == b)
    }

    #[test]
    fn read_and_write() {
        let source = detached_source(0);
        assert_eq!(source.read().unwrap(), 0);

        source.write(42).unwrap();
        assert_eq!(source.read().unwrap(), 42);
    }

    #[test]
    fn modify_uses_current_value() {
        let source = detached_source(10);
        source.modify(|v| v + 5).unwrap();
        assert_eq!(source.read().unwrap(), 15);
    }

    #[test]
    fn tracked_read_registers_one_edge() {
        let source = detached_source(1);
        let ctx = ExecContext::new();

        {
            let _active = source.inner.scope.stack.activate(ctx.clone());
            source.read().unwrap();
            source.read().unwrap();
        }

        // Repeated reads within one execution yield a single edge.
        assert_eq!(source.dependent_count(), 1);
    }

    #[test]
    fn untracked_read_registers_nothing() {
        let source = detached_source(1);
        let ctx = ExecContext::new();

        {
            let _active = source.inner.scope.stack.activate(ctx);
            source.peek().unwrap();
        }
        source.read().unwrap(); // top level, no active context

        assert_eq!(source.dependent_count(), 0);
    }

    #[test]
    fn equal_write_fires_no_invalidation() {
        let source = detached_source(7);
        let ctx = ExecContext::new();
        {
            let _active = source.inner.scope.stack.activate(ctx.clone());
            source.read().unwrap();
        }

        source.write(7).unwrap();
        assert!(!ctx.is_invalidated());
        assert_eq!(source.dependent_count(), 1);

        source.write(8).unwrap();
        assert!(ctx.is_invalidated());
        assert_eq!(source.dependent_count(), 0);
    }

    #[test]
    fn custom_equality_controls_invalidation() {
        // Compare case-insensitively.
        let source = Source::new(Scope::new(), String::from("Hi"), |a: &String, b: &String| {
            a.eq_ignore_ascii_case(b)
        });
        let ctx = ExecContext::new();
        {
            let _active = source.inner.scope.stack.activate(ctx.clone());
            source.read().unwrap();
        }

        source.write(String::from("HI")).unwrap();
        assert!(!ctx.is_invalidated());
        assert_eq!(source.read().unwrap(), "Hi");

        source.write(String::from("bye")).unwrap();
        assert!(ctx.is_invalidated());
    }

    #[test]
    fn destroyed_source_rejects_use() {
        let source = detached_source(0);
        source.destroy();

        assert!(matches!(
            source.read(),
            Err(ReactiveError::ProducerDestroyed(_))
        ));
        assert!(matches!(
            source.write(1),
            Err(ReactiveError::ProducerDestroyed(_))
        ));
    }

    #[test]
    fn write_after_session_destroy_is_a_noop() {
        let scope = Scope::new();
        let source = Source::new(scope.clone(), 0, |a: &i32, b: &i32| a == b);

        scope.mark_destroyed();
        source.destroy();

        assert!(source.write(5).is_ok());
    }

    #[test]
    fn invalidate_after_requires_a_timer() {
        let source = detached_source(0);
        assert!(matches!(
            source.invalidate_after(Duration::from_millis(10)),
            Err(ReactiveError::NoTimer)
        ));
    }
}
