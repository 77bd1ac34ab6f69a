//! The Frame: a reactor's scheduling and execution record.
//!
//! Braids together the isolation token, the lifecycle state machine, the
//! pending-connector ring, dynamic connector creation, the drain loop, and
//! the adaptive spindown controller. This is the hardest part of the crate:
//! atomic state, lock-scoped mutation, a three-state lifecycle, a registry
//! CAS loop, a nested batch-processing state machine, and a self-tuning
//! controller, all cooperating without two Frame monitors ever being held
//! at once.

use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::connector::{Channel, Connector, PendingConnector};
use crate::debug::{call_guarded, DebugApi};
use crate::emitter::{Emitter, LifecycleEvent};
use crate::error::{BatchError, BatchFault, FrameError, NestedExecutionError};
use crate::ids::FrameId;
use crate::registry::ConnectorSlot;
use crate::scheduler::{BatchState, Scheduler};
use crate::spindown::{SpindownConfig, SpindownController};
use crate::system::ReactorSystem;

thread_local! {
    static CURRENT_FRAME: Cell<Option<u64>> = Cell::new(None);
}

/// The three-state reactor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Fresh,
    Running,
    Terminated,
}

/// Fields gathered under the Frame's single monitor. Every write to these
/// fields, and every read except the fast-path `active` check inside
/// `Connector::enqueue`, must happen with this lock held.
struct FrameState {
    active: bool,
    lifecycle: LifecycleState,
    pending: VecDeque<Arc<dyn PendingConnector>>,
    non_daemon_count: usize,
    /// Set the first time `open_connector` succeeds. `check_terminated`'s
    /// natural-completion branch is gated on this: a freshly spawned Frame
    /// that has never opened a connector must not self-terminate on its
    /// first (necessarily empty) batch, before the caller has had a chance
    /// to open one.
    ever_opened_connector: bool,
}

/// Recipe that constructs the user reactor object on first batch.
pub type Proto = Box<dyn FnOnce(&Arc<Frame>) -> Box<dyn Any + Send + Sync> + Send>;

pub struct Frame {
    uid: FrameId,
    name: String,
    url: String,
    system: Arc<ReactorSystem>,
    scheduler: Arc<dyn Scheduler>,
    proto: Mutex<Option<Proto>>,
    reactor: Mutex<Option<Box<dyn Any + Send + Sync>>>,
    state: Mutex<FrameState>,
    id_counter: AtomicU64,
    active_count: AtomicU8,
    sys_emitter: Emitter,
    debug_api: Arc<dyn DebugApi>,
    scheduler_state: Mutex<Box<dyn BatchState>>,
    spindown: SpindownController,
}

impl Frame {
    pub fn uid(&self) -> FrameId {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn system(&self) -> &Arc<ReactorSystem> {
        &self.system
    }

    pub fn sys_emitter(&self) -> &Emitter {
        &self.sys_emitter
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.state.lock().lifecycle
    }

    pub fn has_terminated(&self) -> bool {
        matches!(self.lifecycle_state(), LifecycleState::Terminated)
    }

    pub fn has_pending_events(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    /// Best-effort sum of queue sizes across every connector currently in
    /// the pending ring. An estimate, not a guarantee: sizes can change
    /// concurrently with senders.
    pub fn estimate_total_pending_events(&self) -> usize {
        self.state.lock().pending.iter().map(|c| c.size()).sum()
    }

    /// The spindown controller's current spin budget. Exposed mainly for
    /// tests asserting the bounds property; ordinary callers never need it.
    pub fn current_spindown(&self) -> i64 {
        self.spindown.current()
    }

    /// Inspect the constructed reactor object, if any and if it is of type
    /// `T`. Mainly useful to tests that want to assert on reactor-local
    /// state accumulated across a batch.
    pub fn with_reactor<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.reactor.lock().as_ref().and_then(|b| b.downcast_ref::<T>()).map(f)
    }

    /// `activate(scheduleEvenIfActive)`: force a scheduling pass even
    /// without events. Used to bootstrap the first batch and to deliver
    /// lifecycle signals.
    pub fn activate(self: &Arc<Self>, schedule_even_if_active: bool) {
        let should_schedule = {
            let mut s = self.state.lock();
            if !s.active || schedule_even_if_active {
                s.active = true;
                true
            } else {
                false
            }
        };
        if should_schedule {
            self.scheduler.schedule(Arc::clone(self));
        }
    }

    /// Called by a Connector when its queue transitions from empty to
    /// non-empty (the size==1 fast path of `enqueueEvent`).
    pub(crate) fn on_connector_became_pending(self: &Arc<Self>, connector: Arc<dyn PendingConnector>) {
        let must_schedule = {
            let mut s = self.state.lock();
            s.pending.push_back(connector);
            if !s.active {
                s.active = true;
                true
            } else {
                false
            }
        };
        if must_schedule {
            self.scheduler.schedule(Arc::clone(self));
        }
    }

    fn pop_next_pending(&self) -> Option<Arc<dyn PendingConnector>> {
        self.state.lock().pending.pop_front()
    }

    fn reenqueue_pending(&self, connector: Arc<dyn PendingConnector>) {
        self.state.lock().pending.push_back(connector);
    }

    fn has_pending_for_spin(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    /// `openConnector`: retry-loop CAS insertion into the registry.
    pub fn open_connector<Q, H>(
        self: &Arc<Self>,
        name: Option<String>,
        is_daemon: bool,
        shortcut: bool,
        handler: H,
    ) -> Result<Arc<Connector<Q>>, FrameError>
    where
        Q: Send + 'static,
        H: Fn(Q) + Send + Sync + 'static,
    {
        if self.has_terminated() {
            return Err(FrameError::FrameTerminated);
        }
        let registry = self.system.registry();
        let handler: Box<dyn Fn(Q) + Send + Sync> = Box::new(handler);
        let handler = Arc::new(handler);

        loop {
            let uid = self.id_counter.fetch_add(1, Ordering::AcqRel);
            let info = registry
                .for_name(&self.name)
                .expect("frame must be registered in the registry before opening connectors");

            if let Some(requested) = &name {
                if let Some(slot) = info.connectors.get(requested) {
                    if matches!(&**slot, ConnectorSlot::Bound(_, _)) {
                        return Err(FrameError::NameInUse(requested.clone()));
                    }
                }
            }

            let effective_name = match &name {
                Some(n) => n.clone(),
                None => {
                    let mut k = 0u64;
                    loop {
                        let candidate = format!("channel-{}-{}", uid, k);
                        if !info.connectors.contains_key(&candidate) {
                            break candidate;
                        }
                        k += 1;
                    }
                }
            };

            let handler_clone = Arc::clone(&handler);
            let connector = Connector::new(
                uid,
                effective_name.clone(),
                Arc::downgrade(self),
                is_daemon,
                shortcut,
                Box::new(move |event| (handler_clone)(event)),
            );

            let boxed_channel: Box<dyn Any + Send + Sync> = Box::new(connector.channel());
            let mut next_connectors: FxHashMap<String, Arc<ConnectorSlot>> = (*info.connectors).clone();
            let prior_slot = next_connectors.insert(
                effective_name.clone(),
                Arc::new(ConnectorSlot::Bound(
                    Arc::clone(&connector) as Arc<dyn PendingConnector>,
                    boxed_channel,
                )),
            );

            if registry.try_replace(&self.name, info.version(), next_connectors).is_some() {
                if let Some(prior) = prior_slot {
                    if let ConnectorSlot::Pending(listeners) = &*prior {
                        for listener in listeners {
                            if let Some(sender) =
                                listener.downcast_ref::<crossbeam_channel::Sender<Channel<Q>>>()
                            {
                                let _ = sender.send(connector.channel());
                            }
                        }
                    }
                }
                {
                    let mut s = self.state.lock();
                    if !is_daemon {
                        s.non_daemon_count += 1;
                    }
                    s.ever_opened_connector = true;
                }
                return Ok(connector);
            }
            // Lost the race against a concurrent writer; reload Info and retry.
        }
    }

    /// Register a listener for a connector name that may not exist yet.
    /// Implements "wait for a channel that will exist" (scenario 5).
    pub fn listen_for<Q: Send + 'static>(&self, name: &str) -> crossbeam_channel::Receiver<Channel<Q>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let registry = self.system.registry();
        loop {
            let info = registry
                .for_name(&self.name)
                .expect("frame must be registered in the registry before listening");
            if let Some(slot) = info.connectors.get(name) {
                if let ConnectorSlot::Bound(_, boxed_channel) = &**slot {
                    if let Some(typed) = boxed_channel.downcast_ref::<Channel<Q>>() {
                        let _ = tx.send(typed.clone());
                        return rx;
                    }
                }
            }
            let mut next_connectors: FxHashMap<String, Arc<ConnectorSlot>> = (*info.connectors).clone();
            let boxed_sender: Box<dyn Any + Send + Sync> = Box::new(tx.clone());
            let entry = next_connectors
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ConnectorSlot::Pending(Vec::new())));
            let mut listeners = match &**entry {
                ConnectorSlot::Pending(existing) => existing
                    .iter()
                    .map(|b| clone_boxed_sender::<Q>(b))
                    .collect::<Vec<_>>(),
                ConnectorSlot::Bound(_, _) => Vec::new(),
            };
            listeners.push(boxed_sender);
            next_connectors.insert(name.to_string(), Arc::new(ConnectorSlot::Pending(listeners)));

            if registry.try_replace(&self.name, info.version(), next_connectors).is_some() {
                return rx;
            }
        }
    }

    /// `sealConnector`: irrevocably close a connector. Idempotent: sealing
    /// twice is a no-op (the "ignore" branch of the property-7 choice).
    pub fn seal_connector<Q: Send + 'static>(&self, connector: &Arc<Connector<Q>>) {
        if connector.is_sealed() {
            return;
        }
        {
            let mut s = self.state.lock();
            if connector.is_sealed() {
                return;
            }
            connector.mark_sealed();
            if !connector.is_daemon() {
                s.non_daemon_count = s.non_daemon_count.saturating_sub(1);
            }
            let registry = self.system.registry();
            loop {
                let info = match registry.for_name(&self.name) {
                    Some(info) => info,
                    None => break,
                };
                if !info.connectors.contains_key(connector.name()) {
                    break;
                }
                let mut next = (*info.connectors).clone();
                next.remove(connector.name());
                if registry.try_replace(&self.name, info.version(), next).is_some() {
                    break;
                }
            }
        }
        debug_assert_eq!(
            CURRENT_FRAME.with(|c| c.get()),
            Some(self.uid.as_u64()),
            "sealConnector must run on the thread executing the owning reactor"
        );
        connector.unreact();
        self.check_terminated(false);
    }

    /// `checkTerminated(forced)`.
    fn check_terminated(&self, forced: bool) {
        let should_emit = {
            let mut s = self.state.lock();
            if s.lifecycle == LifecycleState::Running
                && (forced
                    || (s.ever_opened_connector
                        && s.pending.is_empty()
                        && s.non_daemon_count == 0))
            {
                s.lifecycle = LifecycleState::Terminated;
                true
            } else {
                false
            }
        };
        if should_emit {
            call_guarded(|| self.debug_api.reactor_terminated(self));
            self.sys_emitter.emit(LifecycleEvent::ReactorTerminated);
            self.system.registry().try_release(&self.name);
        }
    }

    /// `executeBatch`: the scheduler must never call this concurrently for
    /// the same Frame.
    pub fn execute_batch(self: &Arc<Self>) -> Result<(), BatchError> {
        self.scheduler.preschedule(self);

        if CURRENT_FRAME.with(|c| c.get().is_some()) {
            return Err(BatchError::Nested(NestedExecutionError));
        }

        self.acquire_isolation();
        CURRENT_FRAME.with(|c| c.set(Some(self.uid.as_u64())));

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_batch_body()));

        let fault = match outcome {
            Ok(()) => {
                self.check_terminated(false);
                None
            }
            Err(payload) => {
                let fault = BatchFault::from_payload(payload);
                if !self.has_terminated() {
                    self.sys_emitter
                        .emit(LifecycleEvent::ReactorDied(Arc::new(fault.clone())));
                }
                self.check_terminated(true);
                Some(fault)
            }
        };

        CURRENT_FRAME.with(|c| c.set(None));
        self.release_isolation();

        let must_schedule = {
            let mut s = self.state.lock();
            if !s.pending.is_empty() && !matches!(s.lifecycle, LifecycleState::Terminated) {
                true
            } else {
                s.active = false;
                false
            }
        };

        self.scheduler.unschedule(self, fault.as_ref());
        if must_schedule {
            self.scheduler.schedule(Arc::clone(self));
        }

        match fault {
            Some(f) => Err(BatchError::Died(f)),
            None => Ok(()),
        }
    }

    /// Steps 4-8 of `executeBatch`: construction, lifecycle emission, the
    /// drain loop, and the spindown phase. Wrapped in `catch_unwind` by the
    /// caller.
    fn run_batch_body(self: &Arc<Self>) {
        let construct_needed = {
            let mut s = self.state.lock();
            if matches!(s.lifecycle, LifecycleState::Fresh) {
                s.lifecycle = LifecycleState::Running;
                true
            } else {
                false
            }
        };

        if construct_needed {
            call_guarded(|| self.debug_api.reactor_started(self));
            let proto = self.proto.lock().take();
            if let Some(proto) = proto {
                let reactor_obj = proto(self);
                *self.reactor.lock() = Some(reactor_obj);
            }
            self.sys_emitter.emit(LifecycleEvent::ReactorStarted);
        }

        self.sys_emitter.emit(LifecycleEvent::ReactorScheduled);

        self.spindown.begin_batch();
        let mut preempted = self.drain_batch();
        if !preempted {
            let hit = self.spindown.spin(|| self.has_pending_for_spin());
            if hit {
                preempted = self.drain_batch();
            }
        }
        self.spindown.record_batch_end();
        let _ = preempted;

        self.sys_emitter.emit(LifecycleEvent::ReactorPreempted);
    }

    /// The drain loop (§4.6). Returns `true` if the scheduler preempted the
    /// batch, `false` if it ran out of events on its own.
    fn drain_batch(&self) -> bool {
        let mut batch_state = self.scheduler_state.lock();
        batch_state.on_batch_start(self);

        let mut current: Option<Arc<dyn PendingConnector>> = None;
        loop {
            let connector = match current.take() {
                Some(c) => c,
                None => match self.pop_next_pending() {
                    Some(c) => c,
                    None => return false,
                },
            };

            if connector.is_sealed() {
                continue;
            }

            let remaining = connector.drain_one();

            if batch_state.on_batch_event(self) {
                if remaining > 0 && !connector.is_sealed() {
                    current = Some(connector);
                }
            } else {
                if remaining > 0 && !connector.is_sealed() {
                    self.reenqueue_pending(connector);
                }
                return true;
            }
        }
    }

    fn acquire_isolation(&self) {
        loop {
            if self
                .active_count
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            std::hint::spin_loop();
        }
    }

    fn release_isolation(&self) {
        let prev = self.active_count.swap(0, Ordering::Release);
        debug_assert_eq!(prev, 1, "isolation token released while not held");
    }
}

fn clone_boxed_sender<Q: Send + 'static>(
    boxed: &Box<dyn Any + Send + Sync>,
) -> Box<dyn Any + Send + Sync> {
    match boxed.downcast_ref::<crossbeam_channel::Sender<Channel<Q>>>() {
        Some(sender) => Box::new(sender.clone()),
        None => Box::new(()),
    }
}

pub struct FrameBuilder {
    name: String,
    url: String,
    proto: Proto,
    spindown_config: SpindownConfig,
    debug_api: Option<Arc<dyn DebugApi>>,
}

impl FrameBuilder {
    pub fn new(name: impl Into<String>, proto: Proto) -> Self {
        let name = name.into();
        FrameBuilder {
            url: format!("reactor://{}", name),
            name,
            proto,
            spindown_config: SpindownConfig::default(),
            debug_api: None,
        }
    }

    pub fn spindown_config(mut self, cfg: SpindownConfig) -> Self {
        self.spindown_config = cfg;
        self
    }

    /// Override the Frame's debug API. Defaults to the owning
    /// `ReactorSystem`'s debug API when left unset.
    pub fn debug_api(mut self, api: Arc<dyn DebugApi>) -> Self {
        self.debug_api = Some(api);
        self
    }

    /// Construct and register the Frame, then bootstrap its first
    /// scheduling pass.
    pub fn spawn(self, system: &Arc<ReactorSystem>) -> Arc<Frame> {
        let uid = FrameId::next();
        let seed = uid.as_u64();
        let scheduler = system.scheduler();
        let frame = Arc::new(Frame {
            uid,
            name: self.name.clone(),
            url: self.url,
            system: Arc::clone(system),
            scheduler: Arc::clone(&scheduler),
            proto: Mutex::new(Some(self.proto)),
            reactor: Mutex::new(None),
            state: Mutex::new(FrameState {
                active: false,
                lifecycle: LifecycleState::Fresh,
                pending: VecDeque::new(),
                non_daemon_count: 0,
                ever_opened_connector: false,
            }),
            id_counter: AtomicU64::new(0),
            active_count: AtomicU8::new(0),
            sys_emitter: Emitter::new(),
            debug_api: self.debug_api.unwrap_or_else(|| system.debug_api()),
            scheduler_state: Mutex::new(scheduler.new_state()),
            spindown: SpindownController::new(self.spindown_config, seed),
        });

        let registered = system.registry().register_frame(&self.name, Arc::clone(&frame));
        debug_assert!(registered, "duplicate frame name '{}'", self.name);

        frame.activate(false);
        frame
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.lock();
        f.debug_struct("Frame")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("lifecycle", &s.lifecycle)
            .field("active", &s.active)
            .field("pending_connectors", &s.pending.len())
            .field("non_daemon_count", &s.non_daemon_count)
            .finish()
    }
}

#[allow(dead_code)]
fn assert_frame_is_send_sync() {
    fn check<T: Send + Sync>() {}
    check::<Frame>();
}
