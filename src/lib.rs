//! Execution core for a reactor/actor runtime.
//!
//! A `Frame` is the scheduling and execution record for one reactor: it owns
//! a ring of pending `Connector`s (typed event queues), enforces single-
//! threaded isolation per reactor, drives the three-state lifecycle (Fresh /
//! Running / Terminated), and runs an adaptive spindown phase at the end of
//! each batch to amortize rescheduling cost. A `ReactorSystem` bundles the
//! registry and scheduler a set of Frames share.
//!
//! ## Modules
//!
//! - [`ids`]: process-unique Frame identity
//! - [`error`]: the crate's error taxonomy
//! - [`queue`]: the exact-size FIFO backing each Connector
//! - [`connector`]: `Connector<Q>` / `Channel<Q>`, the event-queue substrate
//! - [`registry`]: the process-wide `name -> Frame` map
//! - [`scheduler`]: the policy plugin Frames are run under, plus a
//!   work-stealing reference implementation
//! - [`spindown`]: the adaptive post-batch spin controller
//! - [`emitter`]: per-Frame lifecycle event multicast
//! - [`debug`]: the optional inspector hook a Frame calls into
//! - [`frame`]: the Frame itself
//! - [`system`]: `ReactorSystem`, the owning context a set of Frames share

pub mod connector;
pub mod debug;
pub mod emitter;
pub mod error;
pub mod frame;
pub mod ids;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod spindown;
pub mod system;

pub use connector::{Channel, Connector, PendingConnector};
pub use debug::{DebugApi, NoopDebugApi, TracingDebugApi};
pub use emitter::{Emitter, LifecycleEvent};
pub use error::{BatchError, BatchFault, FrameError, NestedExecutionError};
pub use frame::{Frame, FrameBuilder, LifecycleState};
pub use ids::FrameId;
pub use registry::{ConnectorSlot, Info, Registry};
pub use scheduler::{BatchState, CountBudgetState, PoolScheduler, Scheduler};
pub use spindown::{SpindownConfig, SpindownController};
pub use system::ReactorSystem;
