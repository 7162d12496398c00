//! Scheduler seam.
//!
//! The VFS needs two things from the host's event loop: a way to run a task
//! on a later tick (deferred stream cleanup) and a way to fire named events
//! (mount notifications). [`TokioScheduler`] maps both onto the ambient tokio
//! runtime; [`ManualScheduler`] queues them for deterministic tests.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// A named event with string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedEvent {
    pub name: String,
    pub args: Vec<String>,
}

impl NamedEvent {
    /// Create a new event.
    pub fn new(name: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Host event loop interface.
pub trait Scheduler: Send + Sync {
    /// Run `task` on a later tick, never synchronously.
    fn defer(&self, task: BoxFuture<'static, ()>);

    /// Publish a named event to whoever is listening.
    fn fire(&self, event: NamedEvent);
}

/// Scheduler backed by the current tokio runtime.
///
/// Events are broadcast; call [`subscribe`](TokioScheduler::subscribe) to
/// receive them. Events fired with no subscribers are dropped.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    events: broadcast::Sender<NamedEvent>,
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TokioScheduler {
    /// Create a scheduler whose event channel holds `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { events }
    }

    /// Subscribe to fired events.
    pub fn subscribe(&self) -> broadcast::Receiver<NamedEvent> {
        self.events.subscribe()
    }
}

impl Scheduler for TokioScheduler {
    fn defer(&self, task: BoxFuture<'static, ()>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => {
                tracing::warn!("no tokio runtime available, deferred task dropped");
            }
        }
    }

    fn fire(&self, event: NamedEvent) {
        tracing::trace!(name = %event.name, args = ?event.args, "event");
        let _ = self.events.send(event);
    }
}

/// Scheduler that queues everything until told to run it.
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<BoxFuture<'static, ()>>>,
    fired: Mutex<Vec<NamedEvent>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending.lock().len())
            .field("fired", &self.fired.lock().len())
            .finish()
    }
}

impl ManualScheduler {
    /// Create a shared manual scheduler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of deferred tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run every queued task to completion, including tasks queued while
    /// running. Returns how many ran.
    pub async fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = std::mem::take(&mut *self.pending.lock());
            if batch.is_empty() {
                return ran;
            }
            for task in batch {
                task.await;
                ran += 1;
            }
        }
    }

    /// Drain the events fired so far.
    pub fn take_events(&self) -> Vec<NamedEvent> {
        std::mem::take(&mut *self.fired.lock())
    }
}

impl Scheduler for ManualScheduler {
    fn defer(&self, task: BoxFuture<'static, ()>) {
        self.pending.lock().push(task);
    }

    fn fire(&self, event: NamedEvent) {
        self.fired.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_manual_scheduler_defers() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        scheduler.defer(Box::pin(async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);

        assert_eq!(scheduler.run_pending().await, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_broadcasts() {
        let scheduler = TokioScheduler::default();
        let mut rx = scheduler.subscribe();
        scheduler.fire(NamedEvent::new("mounted", ["abc", "/mnt/abc"]));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "mounted");
        assert_eq!(event.args, vec!["abc", "/mnt/abc"]);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_runs_deferred() {
        let scheduler = TokioScheduler::default();
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.defer(Box::pin(async move {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.await.unwrap(), 42);
    }
}
