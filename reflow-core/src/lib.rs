//! Reflow Core
//!
//! This crate provides the core runtime for the Reflow reactive server
//! framework. It implements:
//!
//! - Reactive primitives (sources, derived expressions, observers)
//! - Runtime dependency discovery and one-shot invalidation edges
//! - A per-session scheduler that drives invalidated observers to
//!   quiescence and flushes rendered outputs to the host
//!
//! Transport, rendering catalogs, and session networking live in the host;
//! this crate only consumes their interfaces (a flush sink, an error sink,
//! and a timer).
//!
//! # Architecture
//!
//! - `reactive`: the engine — nodes, contexts, edges, scheduler, session
//! - `error`: error types shared across the engine
//! - `host`: collaborator traits and the tokio-backed timer
//!
//! # Example
//!
//! ```rust
//! use reflow_core::reactive::Session;
//!
//! let session = Session::new();
//!
//! // A settable value and a cached expression over it.
//! let count = session.source(1);
//! let count2 = count.clone();
//! let doubled = session.derived(move || Ok(count2.read()? * 2));
//!
//! // An observer that re-runs whenever `doubled` changes.
//! let doubled2 = doubled.clone();
//! session.observer(move || {
//!     let _ = doubled2.read()?;
//!     Ok(())
//! });
//!
//! session.flush(); // runs the observer once
//! count.write(5).unwrap();
//! session.flush(); // recomputes `doubled`, re-runs the observer
//! ```

pub mod error;
pub mod host;
pub mod reactive;

pub use error::{BodyResult, ExecutionError, ReactiveError};
