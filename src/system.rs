//! The Reactor System: the small owning context a set of Frames share --
//! the process-wide registry and the scheduler/debug-API defaults new
//! Frames inherit unless a `FrameBuilder` overrides them.
//!
//! `ReactorSystem` is an explicit, owned handle rather than a process-wide
//! global: multiple independent reactor systems can coexist in one
//! process, which also makes the unit tests in this crate independent of
//! each other without relying on process-wide state.

use std::sync::Arc;

use crate::debug::{DebugApi, NoopDebugApi};
use crate::registry::Registry;
use crate::scheduler::Scheduler;

pub struct ReactorSystem {
    registry: Registry,
    scheduler: Arc<dyn Scheduler>,
    debug_api: Arc<dyn DebugApi>,
}

impl ReactorSystem {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Self::with_debug_api(scheduler, Arc::new(NoopDebugApi))
    }

    pub fn with_debug_api(scheduler: Arc<dyn Scheduler>, debug_api: Arc<dyn DebugApi>) -> Arc<Self> {
        Arc::new(ReactorSystem { registry: Registry::new(), scheduler, debug_api })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn debug_api(&self) -> Arc<dyn DebugApi> {
        Arc::clone(&self.debug_api)
    }
}
