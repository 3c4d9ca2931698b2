//! Context Stack
//!
//! Tracks which execution context is currently active for a session. The
//! stack supports nested activation (an observer reading a derived
//! expression, which reads another expression, which reads a source) as
//! plain call-stack recursion: each nested execution pushes its context and
//! pops it on the way out.
//!
//! One stack exists per session and is never shared across sessions. The
//! global-variable rendition of "current context" found in some reactive
//! runtimes is deliberately avoided; read paths receive the stack through
//! their owning session instead.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use super::context::ExecContext;
use crate::error::ReactiveError;

/// LIFO stack of active execution contexts for one session.
pub struct ContextStack {
    entries: Mutex<Vec<Arc<ExecContext>>>,
}

impl ContextStack {
    /// Create an empty stack.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        })
    }

    /// The currently active context, or `None` at top level.
    pub fn current(&self) -> Option<Arc<ExecContext>> {
        self.entries.lock().last().cloned()
    }

    /// Number of nested activations currently in progress.
    pub fn depth(&self) -> usize {
        self.entries.lock().len()
    }

    /// Push `ctx` and return a guard whose drop restores the previous top,
    /// including on early-return and error paths.
    pub fn activate(&self, ctx: Arc<ExecContext>) -> ActiveContext<'_> {
        self.entries.lock().push(ctx.clone());
        ActiveContext { stack: self, ctx }
    }

    /// Pop the top context, verifying it is `expected`. A mismatch means
    /// scoped activation was misused (guards released out of order) and is
    /// reported as a usage error; the stack is left untouched in that case.
    pub fn pop(&self, expected: &Arc<ExecContext>) -> Result<(), ReactiveError> {
        let mut entries = self.entries.lock();
        match entries.last() {
            Some(top) if top.id() == expected.id() => {
                entries.pop();
                Ok(())
            }
            _ => Err(ReactiveError::StackMismatch),
        }
    }
}

/// Scoped activation handle. Restores the previous top when dropped.
pub struct ActiveContext<'a> {
    stack: &'a ContextStack,
    ctx: Arc<ExecContext>,
}

impl ActiveContext<'_> {
    /// The context this guard is holding active.
    pub fn context(&self) -> &Arc<ExecContext> {
        &self.ctx
    }
}

impl Drop for ActiveContext<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.stack.pop(&self.ctx) {
            // Guards drop in LIFO order by construction, so this fires only
            // if a guard was leaked across scopes.
            error!(ctx = self.ctx.id().raw(), %err, "context stack corrupted");
            debug_assert!(false, "context stack mismatch on guard drop");
        }
    }
}
