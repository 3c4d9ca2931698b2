//! Host collaborator interfaces.
//!
//! The engine does not own timers, transport, or rendering; it consumes
//! narrow interfaces from the host. Only the timer needs a trait (the flush
//! and error sinks are plain callbacks installed on the session).

use std::time::Duration;

use tokio::runtime::Handle;
use tracing::trace;

/// Deferred-callback primitive consumed by self-invalidating sources.
///
/// Implementations must marshal the callback onto the session's single
/// logical thread before it touches session state. The tokio
/// implementation below satisfies this when the session runs on a
/// current-thread runtime.
pub trait Timer: Send + Sync {
    /// Run `callback` after `delay`.
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>);
}

/// Timer backed by a tokio runtime.
pub struct TokioTimer {
    handle: Handle,
}

impl TokioTimer {
    /// Capture the current runtime. Panics outside a tokio runtime, like
    /// `Handle::current` itself.
    pub fn new() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    /// Use an explicit runtime handle.
    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) {
        trace!(delay_ms = delay.as_millis() as u64, "timer scheduled");
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_fires_after_delay() {
        let timer = TokioTimer::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        timer.schedule(
            Duration::from_millis(500),
            Box::new(move || {
                fired_clone.store(true, Ordering::SeqCst);
            }),
        );

        tokio::time::advance(Duration::from_millis(499)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
