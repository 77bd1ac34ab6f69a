//! The Scheduler contract consumed by a Frame, plus one reference
//! implementation: a `crossbeam-deque`-based work-stealing thread pool,
//! re-purposed to run Frame batches instead of spawn requests.
//!
//! Scheduler *selection policy* (thread-per-reactor vs. pool, fairness
//! heuristics, etc.) is explicitly out of scope for this crate; this pool
//! exists so the Frame is runnable end to end and the scenario tests have
//! something real to drive them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};

use crate::error::BatchFault;
use crate::frame::Frame;

/// Per-batch budget and preemption decision, owned by the scheduler.
///
/// `on_batch_start` resets any per-batch counters; `on_batch_event` is
/// called once per delivered event and returns whether the drain loop may
/// continue.
pub trait BatchState: Send {
    fn on_batch_start(&mut self, frame: &Frame);
    fn on_batch_event(&mut self, frame: &Frame) -> bool;
}

/// Fixed per-batch event budget. The simplest policy that satisfies "a
/// bounded run of event deliveries" (see the glossary entry for Batch).
pub struct CountBudgetState {
    budget: usize,
    remaining: usize,
}

impl CountBudgetState {
    pub fn new(budget: usize) -> Self {
        CountBudgetState { budget, remaining: budget }
    }
}

impl BatchState for CountBudgetState {
    fn on_batch_start(&mut self, _frame: &Frame) {
        self.remaining = self.budget;
    }

    fn on_batch_event(&mut self, _frame: &Frame) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.remaining > 0
    }
}

/// The policy plugin that owns worker threads and batch budgets.
///
/// Implementations must never call `Frame::execute_batch` concurrently for
/// the same Frame.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, frame: Arc<Frame>);
    fn unschedule(&self, frame: &Frame, fault: Option<&BatchFault>);
    fn preschedule(&self, frame: &Frame);
    fn new_state(&self) -> Box<dyn BatchState>;
}

fn find_task(
    local: &Worker<Arc<Frame>>,
    global: &Injector<Arc<Frame>>,
    stealers: &[Stealer<Arc<Frame>>],
) -> Option<Arc<Frame>> {
    local.pop().or_else(|| {
        std::iter::repeat_with(|| {
            global
                .steal_batch_and_pop(local)
                .or_else(|| stealers.iter().map(|s| s.steal()).collect())
        })
        .find(|s| !s.is_retry())
        .and_then(|s| s.success())
    })
}

/// Work-stealing pool scheduler with a fixed per-batch event budget.
pub struct PoolScheduler {
    injector: Arc<Injector<Arc<Frame>>>,
    stealers: Arc<Vec<Stealer<Arc<Frame>>>>,
    shutdown: Arc<AtomicBool>,
    parked: Arc<(Mutex<()>, Condvar)>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    batch_budget: usize,
}

impl PoolScheduler {
    /// Spin up `worker_count` threads, each draining Frame batches with an
    /// event budget of `batch_budget` per batch.
    pub fn start(worker_count: usize, batch_budget: usize) -> Arc<Self> {
        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let parked = Arc::new((Mutex::new(()), Condvar::new()));

        let workers: Vec<Worker<Arc<Frame>>> =
            (0..worker_count.max(1)).map(|_| Worker::new_fifo()).collect();
        let stealers = Arc::new(workers.iter().map(|w| w.stealer()).collect::<Vec<_>>());

        let pool = Arc::new(PoolScheduler {
            injector: Arc::clone(&injector),
            stealers: Arc::clone(&stealers),
            shutdown: Arc::clone(&shutdown),
            parked: Arc::clone(&parked),
            handles: Mutex::new(Vec::new()),
            batch_budget,
        });

        let mut handles = Vec::with_capacity(worker_count);
        for local in workers {
            let injector = Arc::clone(&injector);
            let stealers = Arc::clone(&stealers);
            let shutdown = Arc::clone(&shutdown);
            let parked = Arc::clone(&parked);
            handles.push(std::thread::spawn(move || {
                worker_loop(local, injector, stealers, shutdown, parked);
            }));
        }
        *pool.handles.lock().unwrap() = handles;
        pool
    }

    fn wake_one(&self) {
        let (_lock, cvar) = &*self.parked;
        cvar.notify_one();
    }

    /// Signal all worker threads to stop after their current batch.
    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let (_lock, cvar) = &*self.parked;
        cvar.notify_all();
    }

    /// Block until every worker thread has exited.
    pub fn wait(&self) {
        let mut handles = self.handles.lock().unwrap();
        for h in handles.drain(..) {
            let _ = h.join();
        }
    }
}

fn worker_loop(
    local: Worker<Arc<Frame>>,
    injector: Arc<Injector<Arc<Frame>>>,
    stealers: Arc<Vec<Stealer<Arc<Frame>>>>,
    shutdown: Arc<AtomicBool>,
    parked: Arc<(Mutex<()>, Condvar)>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        match find_task(&local, &injector, &stealers) {
            Some(frame) => {
                if let Err(fault) = frame.execute_batch() {
                    tracing::warn!(frame = %frame.name(), error = %fault, "batch execution error");
                }
            }
            None => {
                let (lock, cvar) = &*parked;
                let guard = lock.lock().unwrap();
                let _ = cvar.wait_timeout(guard, Duration::from_millis(5));
            }
        }
    }
}

impl Scheduler for PoolScheduler {
    fn schedule(&self, frame: Arc<Frame>) {
        self.injector.push(frame);
        self.wake_one();
    }

    fn unschedule(&self, frame: &Frame, fault: Option<&BatchFault>) {
        if let Some(fault) = fault {
            tracing::debug!(frame = %frame.name(), error = %fault, "unscheduling after fault");
        }
    }

    fn preschedule(&self, _frame: &Frame) {}

    fn new_state(&self) -> Box<dyn BatchState> {
        Box::new(CountBudgetState::new(self.batch_budget))
    }
}

impl Drop for PoolScheduler {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_budget_resets_on_batch_start() {
        let mut s = CountBudgetState::new(3);
        s.remaining = 1;
        s.on_batch_start_for_test();
        assert_eq!(s.remaining, 3);
    }

    impl CountBudgetState {
        fn on_batch_start_for_test(&mut self) {
            self.remaining = self.budget;
        }
    }
}
