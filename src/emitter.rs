//! Lifecycle event emission.
//!
//! Implemented as an intrusive multicast signal: subscribers are drained
//! inline, synchronously, on the thread executing the batch. No queueing,
//! no cross-thread handoff -- a subscriber observes lifecycle events in the
//! exact order the Frame emits them.

use crate::error::BatchFault;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A lifecycle signal emitted by a Frame over the course of its execution.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    ReactorStarted,
    ReactorScheduled,
    ReactorPreempted,
    ReactorDied(Arc<BatchFault>),
    ReactorTerminated,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::ReactorStarted => write!(f, "ReactorStarted"),
            LifecycleEvent::ReactorScheduled => write!(f, "ReactorScheduled"),
            LifecycleEvent::ReactorPreempted => write!(f, "ReactorPreempted"),
            LifecycleEvent::ReactorDied(fault) => write!(f, "ReactorDied({})", fault),
            LifecycleEvent::ReactorTerminated => write!(f, "ReactorTerminated"),
        }
    }
}

type Subscriber = Box<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// The `sysEmitter`: a per-Frame multicast signal observable by the reactor
/// itself (and by tests).
pub struct Emitter {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Emitter {
    pub fn new() -> Self {
        Emitter {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.subscribers.lock().push(Box::new(f));
    }

    /// Deliver `event` to every subscriber, in registration order, on the
    /// calling thread.
    pub fn emit(&self, event: LifecycleEvent) {
        let subs = self.subscribers.lock();
        for sub in subs.iter() {
            sub(&event);
        }
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("subscriber_count", &self.subscribers.lock().len())
            .finish()
    }
}
