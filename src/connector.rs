//! Connector / Channel substrate: a typed event queue owned by exactly one
//! Frame (`Connector<Q>`), plus the routable handle senders hold
//! (`Channel<Q>`).

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::FrameError;
use crate::frame::Frame;
use crate::queue::EventQueue;

/// Non-generic facet of a Connector, used by the Frame's pending-queue
/// list and drain loop, which must operate over connectors of differing
/// event types `Q` without knowing `Q` at those call sites.
pub trait PendingConnector: Send + Sync {
    fn uid(&self) -> u64;
    fn name(&self) -> &str;
    fn is_daemon(&self) -> bool;
    fn is_sealed(&self) -> bool;
    fn size(&self) -> usize;
    /// Deliver exactly one queued event to the reactor's handler for this
    /// connector. Returns the size remaining in the queue after delivery.
    /// Must only be called by the thread currently executing the owning
    /// Frame's batch.
    fn drain_one(&self) -> usize;
}

/// A typed event queue plus its routing metadata. Owned by exactly one
/// Frame; shared only through the `Channel<Q>` senders hold.
pub struct Connector<Q: Send + 'static> {
    self_ref: Weak<Connector<Q>>,
    uid: u64,
    name: String,
    frame: Weak<Frame>,
    queue: EventQueue<Q>,
    sealed: AtomicBool,
    is_daemon: bool,
    shortcut: bool,
    handler: RwLock<Box<dyn Fn(Q) + Send + Sync>>,
    extras: RwLock<FxHashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl<Q: Send + 'static> Connector<Q> {
    pub(crate) fn new(
        uid: u64,
        name: String,
        frame: Weak<Frame>,
        is_daemon: bool,
        shortcut: bool,
        handler: Box<dyn Fn(Q) + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Connector {
            self_ref: self_ref.clone(),
            uid,
            name,
            frame,
            queue: EventQueue::new(),
            sealed: AtomicBool::new(false),
            is_daemon,
            shortcut,
            handler: RwLock::new(handler),
            extras: RwLock::new(FxHashMap::default()),
        })
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_daemon(&self) -> bool {
        self.is_daemon
    }

    /// Fast-path local delivery flag: skips serialization for in-process
    /// senders. Carried as metadata only -- this crate has no remote
    /// transport, so every delivery is effectively a shortcut delivery.
    pub fn is_shortcut(&self) -> bool {
        self.shortcut
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn set_extra<T: Send + Sync + 'static>(&self, value: T) {
        self.extras.write().insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get_extra<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extras
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// `enqueueEvent`: append `x`, and if the queue transitioned from empty
    /// the connector is handed to the owning Frame to join `pendingQueues`
    /// and possibly trigger scheduling. Returns `FrameTerminated` if the
    /// owning Frame has already terminated (or been dropped).
    pub fn enqueue(&self, x: Q) -> Result<usize, FrameError> {
        let frame = self.frame.upgrade().ok_or(FrameError::FrameTerminated)?;
        if frame.has_terminated() {
            return Err(FrameError::FrameTerminated);
        }
        let new_size = self.queue.enqueue(x);
        if new_size == 1 {
            let pending: Arc<dyn PendingConnector> = self
                .self_ref
                .upgrade()
                .expect("connector enqueuing while its own Arc is gone");
            frame.on_connector_became_pending(pending);
        }
        Ok(new_size)
    }

    /// Create a sender-facing handle. Any number of `Channel<Q>` clones may
    /// outlive any particular sender; the Connector itself is retired only
    /// when the owning Frame seals it.
    pub fn channel(self: &Arc<Self>) -> Channel<Q> {
        Channel { connector: Arc::clone(self) }
    }

    pub(crate) fn mark_sealed(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Terminator signal on the underlying queue, raised by the owning
    /// Frame once a seal has been fully recorded (monitor released,
    /// registry updated). Idempotent.
    pub(crate) fn unreact(&self) {
        self.queue.unreact();
    }
}

impl<Q: Send + 'static> PendingConnector for Connector<Q> {
    fn uid(&self) -> u64 {
        self.uid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_daemon(&self) -> bool {
        self.is_daemon
    }

    fn is_sealed(&self) -> bool {
        self.is_sealed()
    }

    fn size(&self) -> usize {
        self.len()
    }

    fn drain_one(&self) -> usize {
        let (item, remaining) = self.queue.dequeue();
        if let Some(event) = item {
            let handler = self.handler.read();
            (handler)(event);
        }
        remaining
    }
}

impl<Q: Send + 'static> fmt::Debug for Connector<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("is_daemon", &self.is_daemon)
            .field("sealed", &self.is_sealed())
            .field("pending", &self.len())
            .finish()
    }
}

/// The routable, cloneable handle senders hold. Forwards to the owning
/// Connector's queue; carries no ownership over the Frame.
pub struct Channel<Q: Send + 'static> {
    connector: Arc<Connector<Q>>,
}

impl<Q: Send + 'static> Channel<Q> {
    pub fn send(&self, event: Q) -> Result<usize, FrameError> {
        self.connector.enqueue(event)
    }

    pub fn name(&self) -> &str {
        self.connector.name()
    }

    pub fn is_sealed(&self) -> bool {
        self.connector.is_sealed()
    }

    pub fn is_open(&self) -> bool {
        !self.is_sealed()
    }
}

impl<Q: Send + 'static> Clone for Channel<Q> {
    fn clone(&self) -> Self {
        Channel { connector: Arc::clone(&self.connector) }
    }
}

impl<Q: Send + 'static> fmt::Debug for Channel<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("name", &self.name()).finish()
    }
}
