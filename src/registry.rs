//! Frame Registry: a process-wide `name -> Info` map supporting optimistic
//! compare-and-set replace and best-effort release.
//!
//! `Info.connectors` is represented as a tagged variant: `Pending(listeners)`
//! for a name subscribed to before any connector of that name exists, or
//! `Bound(connector)` once one has been opened. Readers take only a shared
//! lock; writers retry on a version mismatch rather than blocking -- a
//! version-checked `RwLock` stands in for a lock-free CAS map (see
//! DESIGN.md for the trade-off).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::connector::PendingConnector;
use crate::frame::Frame;

/// What a connector-name slot within a Frame's Info currently holds.
pub enum ConnectorSlot {
    /// No connector of this name exists yet; these are the listeners
    /// waiting to be handed the channel value once one is opened.
    Pending(Vec<Box<dyn Any + Send + Sync>>),
    /// An open connector, type-erased for storage alongside differently
    /// typed siblings. The second field is the connector's own `Channel<Q>`
    /// value, boxed behind `Any` so a same-`Q` caller (a listener fan-out,
    /// or a later typed lookup) can safely `downcast_ref` it back without
    /// unsafe pointer games.
    Bound(Arc<dyn PendingConnector>, Box<dyn Any + Send + Sync>),
}

/// A snapshot of a Frame's registry entry: the Frame itself plus its
/// connector-name sub-map. Cloning an `Info` is cheap (the connector map is
/// behind an `Arc`); replacing it constructs a new map and CASes it in.
#[derive(Clone)]
pub struct Info {
    pub frame: Arc<Frame>,
    pub connectors: Arc<FxHashMap<String, Arc<ConnectorSlot>>>,
    version: u64,
}

impl Info {
    fn fresh(frame: Arc<Frame>) -> Self {
        Info {
            frame,
            connectors: Arc::new(FxHashMap::default()),
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// The process-wide Frame registry.
pub struct Registry {
    slots: RwLock<FxHashMap<String, Info>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { slots: RwLock::new(FxHashMap::default()) }
    }

    /// Register a brand-new Frame under `name`. Fails if the name is
    /// already bound to a different Frame.
    pub fn register_frame(&self, name: &str, frame: Arc<Frame>) -> bool {
        let mut slots = self.slots.write();
        if slots.contains_key(name) {
            return false;
        }
        slots.insert(name.to_string(), Info::fresh(frame));
        true
    }

    /// `forName`: the current Info snapshot for a registered Frame name,
    /// or `None` if nothing is registered under it.
    pub fn for_name(&self, name: &str) -> Option<Info> {
        self.slots.read().get(name).cloned()
    }

    /// `tryReplace`: atomically swap in `next_connectors` provided the slot
    /// is still at `expected_version`. Returns the new Info on success.
    pub fn try_replace(
        &self,
        name: &str,
        expected_version: u64,
        next_connectors: FxHashMap<String, Arc<ConnectorSlot>>,
    ) -> Option<Info> {
        let mut slots = self.slots.write();
        let info = slots.get_mut(name)?;
        if info.version != expected_version {
            return None;
        }
        info.connectors = Arc::new(next_connectors);
        info.version += 1;
        Some(info.clone())
    }

    /// `tryRelease`: remove the slot for `name` provided its connector map
    /// is empty. Best-effort: a concurrent subscriber attaching a new
    /// Pending listener list between the emptiness check and the removal
    /// will lose its registration. This crate accepts that race rather than
    /// resurrecting the slot, since a terminated Frame has no further use
    /// for registry presence and a losing subscriber simply never receives
    /// a channel value -- the same outcome as subscribing after the
    /// process registry itself has shut down (see DESIGN.md).
    pub fn try_release(&self, name: &str) -> bool {
        let mut slots = self.slots.write();
        if let Some(info) = slots.get(name) {
            if info.connectors.is_empty() {
                slots.remove(name);
                return true;
            }
        }
        false
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("frame_count", &self.slots.read().len())
            .finish()
    }
}
