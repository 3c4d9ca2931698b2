//! Reactive Engine
//!
//! This module implements the core reactive system: sources, derived
//! expressions, and observers, plus the machinery that ties them together.
//!
//! # Concepts
//!
//! ## Sources
//!
//! A Source is a container for externally settable state. When a source is
//! read while an execution context is active, a dependency edge is
//! registered automatically. When the source's value changes, every
//! dependent context is invalidated and the edges are erased.
//!
//! ## Derived expressions
//!
//! A Derived is a cached computation over other producers. It re-executes
//! lazily, on the first read after an upstream invalidation, and its own
//! invalidation propagates to whatever read it.
//!
//! ## Observers
//!
//! An Observer runs user code for side effects (or to render an output).
//! The scheduler re-runs invalidated observers until the session is
//! quiescent, then hands the round's outputs to the host's flush sink.
//!
//! # Implementation Notes
//!
//! Dependency discovery needs no static analysis: each execution pushes a
//! fresh context onto the session's context stack, and any producer read
//! during that window registers an edge to it. Edges are one-shot; the
//! graph is rebuilt from scratch on every execution, which is what makes
//! conditional dependencies come and go correctly.

mod context;
mod derived;
mod edge;
mod ids;
mod observer;
mod scheduler;
mod session;
mod source;
mod stack;

pub use context::ExecContext;
pub use derived::Derived;
pub use edge::DependentSet;
pub use ids::{CtxId, NodeId};
pub use observer::Observer;
pub use scheduler::{ErrorSink, FlushSink, OutputMap};
pub use session::Session;
pub use source::Source;
pub use stack::{ActiveContext, ContextStack};
