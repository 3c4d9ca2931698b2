//! Error types for the reactive engine.
//!
//! Two classes of failure exist:
//!
//! - **Execution errors**: a user-supplied body raised. For a derived
//!   expression the error is cached exactly like a value and re-raised to
//!   every reader until the next invalidation. For an observer the error is
//!   reported to the session's error sink and the flush loop continues.
//!
//! - **Usage errors**: violations of the runtime contract, such as popping a
//!   context that is not the current stack top, reading a destroyed producer,
//!   or reading an expression from inside its own body. These are fatal to
//!   the operation but never to the session.

use std::sync::Arc;

use thiserror::Error;

use crate::reactive::NodeId;

/// Result of a user-supplied body. Bodies may fail with any error type;
/// the engine converts the failure into an [`ExecutionError`] keyed by the
/// node that was executing.
pub type BodyResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A failure raised by a node's body during execution.
///
/// Stored behind `Arc` inside [`ReactiveError::Execution`] so a cached
/// error can be handed to any number of readers without cloning the
/// underlying message.
#[derive(Debug, Error)]
#[error("node {node:?} failed: {message}")]
pub struct ExecutionError {
    /// The node whose body raised.
    pub node: NodeId,
    /// Rendered message of the underlying failure.
    pub message: String,
}

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// A body raised during `read()`/`run()`. Cheaply cloneable so derived
    /// expressions can re-raise the identical cached error to every reader.
    #[error(transparent)]
    Execution(Arc<ExecutionError>),

    /// A context was popped that is not the current top of the stack.
    /// Indicates mismatched scoped-activation, a programmer error.
    #[error("context stack mismatch: popped context is not the current top")]
    StackMismatch,

    /// A destroyed producer was read or written.
    #[error("producer {0:?} used after destroy")]
    ProducerDestroyed(NodeId),

    /// An expression was read while its own body was executing.
    #[error("dependency cycle: node {0:?} read during its own execution")]
    Cycle(NodeId),

    /// A deferred invalidation was requested but the session has no timer
    /// collaborator configured.
    #[error("no timer collaborator configured for this session")]
    NoTimer,
}

impl ReactiveError {
    /// Wrap a body failure for `node`. A failure that is already a cached
    /// [`ReactiveError::Execution`] passes through untouched so errors keep
    /// their origin node as they propagate along read chains.
    pub(crate) fn from_body(node: NodeId, err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        match err.downcast::<ReactiveError>() {
            Ok(reactive) => match *reactive {
                ReactiveError::Execution(inner) => ReactiveError::Execution(inner),
                other => ReactiveError::Execution(Arc::new(ExecutionError {
                    node,
                    message: other.to_string(),
                })),
            },
            Err(other) => ReactiveError::Execution(Arc::new(ExecutionError {
                node,
                message: other.to_string(),
            })),
        }
    }
}
