//! Per-run progress channels
//!
//! Any number of observers may subscribe to a run. Each gets every event
//! published after it subscribed, in publish order, beginning with a
//! `connected` event. Publishing to a run nobody watches is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::{RunEvent, RunId};

type Subscribers = Vec<(u64, mpsc::UnboundedSender<RunEvent>)>;

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    runs: HashMap<RunId, Subscribers>,
}

/// Registry of observers keyed by run id.
#[derive(Debug, Default)]
pub struct RunBroadcaster {
    registry: Mutex<Registry>,
}

impl RunBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        // Registry updates cannot leave it inconsistent, so a poisoned lock is reused.
        self.registry.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers an observer for `run_id`. The returned subscription's first
    /// event is `connected`; dropping it unregisters the observer.
    pub fn subscribe(self: &Arc<Self>, run_id: &RunId) -> RunSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, so this send cannot fail.
        let _ = tx.send(RunEvent::Connected {
            run_id: run_id.to_string(),
        });

        let id = {
            let mut registry = self.lock();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.runs.entry(run_id.clone()).or_default().push((id, tx));
            id
        };
        debug!("Observer {} subscribed to {}", id, run_id);

        RunSubscription {
            id,
            run_id: run_id.clone(),
            receiver: rx,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Delivers `event` to every live observer of `run_id`.
    pub fn publish(&self, run_id: &RunId, event: RunEvent) {
        let mut registry = self.lock();
        let Some(subscribers) = registry.runs.get_mut(run_id) else {
            return;
        };
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        if subscribers.is_empty() {
            registry.runs.remove(run_id);
        }
    }

    pub fn subscriber_count(&self, run_id: &RunId) -> usize {
        self.lock().runs.get(run_id).map_or(0, Vec::len)
    }

    fn unsubscribe(&self, run_id: &RunId, id: u64) {
        let mut registry = self.lock();
        if let Some(subscribers) = registry.runs.get_mut(run_id) {
            subscribers.retain(|(sid, _)| *sid != id);
            if subscribers.is_empty() {
                registry.runs.remove(run_id);
            }
        }
    }
}

/// Receiving end of a run's channel.
#[derive(Debug)]
pub struct RunSubscription {
    id: u64,
    run_id: RunId,
    receiver: mpsc::UnboundedReceiver<RunEvent>,
    broadcaster: Weak<RunBroadcaster>,
}

impl RunSubscription {
    pub const fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Next event, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for RunSubscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(&self.run_id, self.id);
        }
    }
}

/// Publishing handle bound to one run.
#[derive(Debug, Clone)]
pub struct RunEventSink {
    run_id: RunId,
    broadcaster: Arc<RunBroadcaster>,
}

impl RunEventSink {
    pub const fn new(run_id: RunId, broadcaster: Arc<RunBroadcaster>) -> Self {
        Self { run_id, broadcaster }
    }

    /// A sink whose events reach nobody.
    pub fn detached(run_id: RunId) -> Self {
        Self::new(run_id, RunBroadcaster::new())
    }

    pub const fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn emit(&self, event: RunEvent) {
        self.broadcaster.publish(&self.run_id, event);
    }

    /// Writes `message` to the log and publishes it as a `log` event.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(RunEvent::log(message));
    }
}
