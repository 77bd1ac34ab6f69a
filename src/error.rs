//! Error taxonomy for the Frame execution core.
//!
//! Hand-written enums with a manual `Display` impl and a blanket `Error`
//! impl, rather than a derive macro.

use std::fmt;

/// Errors raised synchronously to the caller of a Frame operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Attempt to open a connector with a name already bound to another
    /// connector.
    NameInUse(String),
    /// Operation attempted after the Frame's lifecycle state reached
    /// `Terminated`.
    FrameTerminated,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::NameInUse(name) => write!(f, "connector name '{}' already in use", name),
            FrameError::FrameTerminated => write!(f, "frame has terminated"),
        }
    }
}

impl std::error::Error for FrameError {}

/// `executeBatch` was invoked while the current thread is already inside
/// a reactor. Always a programmer/scheduler-implementation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedExecutionError;

impl fmt::Display for NestedExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executeBatch called while already executing a reactor on this thread")
    }
}

impl std::error::Error for NestedExecutionError {}

/// A throwable (Rust: panic payload) that escaped user code during a batch.
///
/// Carries a best-effort string rendering of the panic payload; the payload
/// itself cannot be carried across a `catch_unwind` boundary without loss of
/// type information, so it is reduced to a formatted message instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFault(pub String);

impl BatchFault {
    pub fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        if let Some(s) = payload.downcast_ref::<&str>() {
            BatchFault((*s).to_string())
        } else if let Some(s) = payload.downcast_ref::<String>() {
            BatchFault(s.clone())
        } else {
            BatchFault("reactor panicked with a non-string payload".to_string())
        }
    }
}

impl fmt::Display for BatchFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reactor died: {}", self.0)
    }
}

impl std::error::Error for BatchFault {}

/// Outcome of a failed `Frame::execute_batch` call: either the scheduler
/// broke the no-reentrancy contract, or user code raised a throwable that
/// escaped the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    Nested(NestedExecutionError),
    Died(BatchFault),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::Nested(e) => write!(f, "{}", e),
            BatchError::Died(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BatchError {}

impl From<NestedExecutionError> for BatchError {
    fn from(e: NestedExecutionError) -> Self {
        BatchError::Nested(e)
    }
}

impl From<BatchFault> for BatchError {
    fn from(e: BatchFault) -> Self {
        BatchError::Died(e)
    }
}
