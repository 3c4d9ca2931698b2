//! Scheduler / Flush Loop
//!
//! Drives a session to quiescence: repeatedly runs the highest-priority
//! invalidated observer until none remain, then hands the round's rendered
//! outputs to the flush sink. Writes that land while a round is in progress
//! (from an observer body, or from the flush sink itself) fold into the
//! current round instead of starting a second one.
//!
//! Ordering among eligible observers is priority-descending, then FIFO by
//! creation sequence. Equal-priority ordering is implementation-defined but
//! consistent within a run.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::ids::NodeId;
use super::observer::ObserverInner;
use crate::error::ReactiveError;

/// Rendered values produced by output observers during one round.
pub type OutputMap = IndexMap<String, serde_json::Value>;

/// Flush sink: invoked once per completed executing round.
pub type FlushSink = Box<dyn FnMut(OutputMap) + Send>;

/// Error sink: invoked when an observer's body fails.
pub type ErrorSink = Box<dyn FnMut(NodeId, &ReactiveError) + Send>;

/// Session phase, advanced only by `flush`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Executing,
    Flushing,
}

/// External collaborators wired in by the host.
#[derive(Default)]
pub(crate) struct Hooks {
    on_flush: Mutex<Option<FlushSink>>,
    on_error: Mutex<Option<ErrorSink>>,
}

struct QueueEntry {
    priority: i32,
    seq: u64,
    observer: Weak<ObserverInner>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then earlier creation first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Per-session scheduler over invalidated observers.
pub(crate) struct Scheduler {
    phase: Mutex<Phase>,
    queue: Mutex<BinaryHeap<QueueEntry>>,
    outputs: Mutex<OutputMap>,
    hooks: Hooks,
    seq: AtomicU64,
}

impl Scheduler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: Mutex::new(Phase::Idle),
            queue: Mutex::new(BinaryHeap::new()),
            outputs: Mutex::new(OutputMap::new()),
            hooks: Hooks::default(),
            seq: AtomicU64::new(0),
        })
    }

    /// Creation-order sequence numbers for FIFO tie-breaking.
    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn set_flush_sink(&self, sink: FlushSink) {
        *self.hooks.on_flush.lock() = Some(sink);
    }

    pub(crate) fn set_error_sink(&self, sink: ErrorSink) {
        *self.hooks.on_error.lock() = Some(sink);
    }

    /// Queue an invalidated observer for the next (or current) round.
    pub(crate) fn enqueue(&self, observer: &Arc<ObserverInner>) {
        self.queue.lock().push(QueueEntry {
            priority: observer.priority(),
            seq: observer.seq(),
            observer: Arc::downgrade(observer),
        });
    }

    /// Record a rendered output for the round in progress.
    pub(crate) fn record_output(&self, name: String, value: serde_json::Value) {
        self.outputs.lock().insert(name, value);
    }

    /// Report an observer body failure to the error sink.
    pub(crate) fn report_error(&self, node: NodeId, err: &ReactiveError) {
        let mut sink = self.hooks.on_error.lock();
        match sink.as_mut() {
            Some(sink) => sink(node, err),
            None => warn!(node = node.raw(), %err, "observer error with no error sink"),
        }
    }

    /// Drop all queued work (session teardown).
    pub(crate) fn clear(&self) {
        self.queue.lock().clear();
        self.outputs.lock().clear();
    }

    /// Drive the session to quiescence.
    ///
    /// Re-entrant calls (a write during Executing or Flushing) return
    /// immediately; the pending invalidations are drained by the round
    /// already in progress. Each drain-to-empty pass ends with exactly one
    /// flush sink invocation; work created by the sink itself starts
    /// another pass within the same call.
    pub(crate) fn flush(&self) {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Idle {
                return;
            }
            *phase = Phase::Executing;
        }
        debug!("flush round started");

        loop {
            let mut ran = 0u64;
            loop {
                let next = self.queue.lock().pop();
                let Some(entry) = next else { break };
                if let Some(observer) = entry.observer.upgrade() {
                    observer.run();
                    ran += 1;
                }
            }

            let outputs = std::mem::take(&mut *self.outputs.lock());
            debug!(ran, outputs = outputs.len(), "executing drained, flushing");

            *self.phase.lock() = Phase::Flushing;
            {
                let mut sink = self.hooks.on_flush.lock();
                if let Some(sink) = sink.as_mut() {
                    sink(outputs);
                }
            }
            *self.phase.lock() = Phase::Executing;

            if self.queue.lock().is_empty() {
                break;
            }
            // The flush sink wrote something; fold it into this call.
        }

        *self.phase.lock() = Phase::Idle;
        debug!("session quiescent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::observer::Observer;
    use crate::reactive::session::Scope;
    use crate::reactive::source::Source;

    fn observer_recording(
        scope: &Arc<Scope>,
        sched: &Arc<Scheduler>,
        log: &Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
        priority: i32,
    ) -> Observer {
        let log = log.clone();
        Observer::new(
            scope.clone(),
            sched,
            move || {
                log.lock().push(tag);
                Ok(None)
            },
            priority,
            None,
        )
    }

    #[test]
    fn higher_priority_runs_first() {
        let scope = Scope::new();
        let sched = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _low = observer_recording(&scope, &sched, &log, "low", 0);
        let _high = observer_recording(&scope, &sched, &log, "high", 10);
        let _mid = observer_recording(&scope, &sched, &log, "mid", 5);

        sched.flush();
        assert_eq!(*log.lock(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn equal_priority_is_fifo_by_creation() {
        let scope = Scope::new();
        let sched = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _a = observer_recording(&scope, &sched, &log, "a", 0);
        let _b = observer_recording(&scope, &sched, &log, "b", 0);
        let _c = observer_recording(&scope, &sched, &log, "c", 0);

        sched.flush();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn round_drains_work_created_during_the_round() {
        let scope = Scope::new();
        let sched = Scheduler::new();

        let a = Source::new(scope.clone(), 0, |x: &i32, y: &i32| x == y);
        let seen = Arc::new(Mutex::new(Vec::new()));

        // The reader runs first (higher priority), then the writer
        // invalidates it mid-round. The reader must re-run in the same
        // round and observe the written value.
        let a_reader = a.clone();
        let seen_clone = seen.clone();
        let reader = Observer::new(
            scope.clone(),
            &sched,
            move || {
                seen_clone.lock().push(a_reader.read()?);
                Ok(None)
            },
            10,
            None,
        );
        let a_writer = a.clone();
        let writer = Observer::new(
            scope.clone(),
            &sched,
            move || {
                a_writer.write(1)?;
                Ok(None)
            },
            0,
            None,
        );

        sched.flush();
        assert_eq!(*seen.lock(), vec![0, 1]);
        assert_eq!(reader.run_count(), 2);
        assert_eq!(writer.run_count(), 1);

        // Quiescent now; another flush does nothing.
        sched.flush();
        assert_eq!(reader.run_count(), 2);
    }

    #[test]
    fn observer_error_reaches_sink_and_loop_continues() {
        let scope = Scope::new();
        let sched = Scheduler::new();

        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = errors.clone();
        sched.set_error_sink(Box::new(move |node, err| {
            errors_clone.lock().push((node, err.to_string()));
        }));

        let failing = Observer::new(
            scope.clone(),
            &sched,
            || Err("render exploded".into()),
            10,
            None,
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        let _fine = observer_recording(&scope, &sched, &log, "fine", 0);

        sched.flush();

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, failing.id());
        assert!(errors[0].1.contains("render exploded"));
        // The lower-priority observer still ran.
        assert_eq!(*log.lock(), vec!["fine"]);
    }

    #[test]
    fn outputs_are_delivered_once_per_round() {
        let scope = Scope::new();
        let sched = Scheduler::new();

        let flushed: Arc<Mutex<Vec<OutputMap>>> = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = flushed.clone();
        sched.set_flush_sink(Box::new(move |outputs| {
            flushed_clone.lock().push(outputs);
        }));

        let _out = Observer::new(
            scope.clone(),
            &sched,
            || Ok(Some(serde_json::json!({"n": 3}))),
            0,
            Some("plot".into()),
        );

        sched.flush();

        let flushed = flushed.lock();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0]["plot"], serde_json::json!({"n": 3}));
    }

    #[test]
    fn destroyed_observer_is_skipped_by_the_queue() {
        let scope = Scope::new();
        let sched = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let doomed = observer_recording(&scope, &sched, &log, "doomed", 0);
        doomed.destroy();

        sched.flush();
        assert!(log.lock().is_empty());
        assert_eq!(doomed.run_count(), 0);
    }
}
