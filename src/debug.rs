//! Debug API consumed by the Frame: two hook points, `reactor_started` and
//! `reactor_terminated`. Errors (panics) raised from these hooks are
//! swallowed around the emission -- a misbehaving debugger must not bring
//! down a reactor -- but panics from user lifecycle-event callbacks are not
//! caught here (those propagate through the normal batch fault path).

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::frame::Frame;

/// Hook points a debugger/inspector implements to observe Frame lifecycle
/// transitions. Default methods are no-ops so implementers only override
/// what they need.
pub trait DebugApi: Send + Sync {
    fn reactor_started(&self, _frame: &Frame) {}
    fn reactor_terminated(&self, _frame: &Frame) {}
}

/// The default, silent implementation.
pub struct NoopDebugApi;

impl DebugApi for NoopDebugApi {}

/// Emits `tracing` events for each lifecycle hook, following the field-style
/// event convention used throughout the wider example pack's daemon crate.
pub struct TracingDebugApi;

impl DebugApi for TracingDebugApi {
    fn reactor_started(&self, frame: &Frame) {
        tracing::info!(frame = %frame.name(), uid = frame.uid().as_u64(), "reactor started");
    }

    fn reactor_terminated(&self, frame: &Frame) {
        tracing::info!(frame = %frame.name(), uid = frame.uid().as_u64(), "reactor terminated");
    }
}

/// Invoke a debug API hook, swallowing any panic it raises.
pub(crate) fn call_guarded<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!("debug API hook panicked; ignoring");
    }
}
