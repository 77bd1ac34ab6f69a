//! Adaptive spindown controller.
//!
//! After a batch's drain loop empties every pending connector, the executor
//! spins briefly looking for newly-arrived events instead of releasing the
//! Frame immediately. The spin budget adapts to the observed rate of
//! follow-up arrivals: bursty reactors pay the preemption/reschedule cost
//! once, idle reactors decay their spin budget toward the floor.
//!
//! State is only ever touched by the single thread currently holding a
//! Frame's isolation token (see `Frame::active_count`), so the internal
//! lock here never experiences real contention -- it exists to satisfy
//! `Sync` for an `Arc<Frame>` shared across worker threads between batches.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Resolved spindown tuning, received from configuration (parsing
/// configuration files is out of scope for this crate).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpindownConfig {
    pub spindown_initial: i64,
    pub spindown_min: i64,
    pub spindown_max: i64,
    pub spindown_mutation_rate: f64,
    pub spindown_test_threshold: i64,
    pub spindown_test_iterations: i64,
    pub spindown_cooldown_rate: i64,
}

impl Default for SpindownConfig {
    fn default() -> Self {
        SpindownConfig {
            spindown_initial: 16,
            spindown_min: 4,
            spindown_max: 256,
            spindown_mutation_rate: 0.1,
            spindown_test_threshold: 32,
            spindown_test_iterations: 32,
            spindown_cooldown_rate: 8,
        }
    }
}

struct SpindownState {
    spindown: i64,
    last_batch_score: u64,
    total_batches: u64,
    total_spindown_score: u64,
    rng: StdRng,
}

pub struct SpindownController {
    config: SpindownConfig,
    state: Mutex<SpindownState>,
}

impl SpindownController {
    pub fn new(config: SpindownConfig, seed: u64) -> Self {
        SpindownController {
            state: Mutex::new(SpindownState {
                spindown: config.spindown_initial,
                last_batch_score: 0,
                total_batches: 0,
                total_spindown_score: 0,
                rng: StdRng::seed_from_u64(seed),
            }),
            config,
        }
    }

    pub fn current(&self) -> i64 {
        self.state.lock().spindown
    }

    /// Reset the per-batch score before a new spin phase begins.
    pub fn begin_batch(&self) {
        self.state.lock().last_batch_score = 0;
    }

    /// Spin up to the current `spindown` budget, polling every tenth tick.
    /// Returns `true` the moment `poll` reports new work, leaving the
    /// remaining spin budget unused. `poll` must be non-blocking.
    pub fn spin<F: FnMut() -> bool>(&self, mut poll: F) -> bool {
        let spins_left = self.current();
        let mut tick: i64 = 0;
        while tick < spins_left {
            tick += 1;
            if tick % 10 == 0 && poll() {
                self.state.lock().last_batch_score += 1;
                return true;
            }
            std::hint::spin_loop();
        }
        false
    }

    /// Recompute the spindown value after a batch completes, per the
    /// coefficient/ramp formula, then unconditionally cool down.
    pub fn record_batch_end(&self) {
        let mut s = self.state.lock();
        s.total_batches += 1;
        s.total_spindown_score += s.last_batch_score;

        let roll: f64 = s.rng.random();
        let should_mutate = s.last_batch_score >= 1 || roll < self.config.spindown_mutation_rate;

        if should_mutate {
            let mut coef = s.total_spindown_score as f64 / s.total_batches as f64;
            if s.total_batches as i64 >= self.config.spindown_test_threshold {
                let iters = self.config.spindown_test_iterations.max(1) as f64;
                let progress = (s.total_batches as i64 - self.config.spindown_test_threshold) as f64;
                coef += (1.0 - progress / iters).max(0.0);
            }
            coef = coef.clamp(0.0, 1.0);
            s.spindown = (self.config.spindown_max as f64 * coef).floor() as i64;
        }

        let cooldown_rate = self.config.spindown_cooldown_rate.max(1);
        s.spindown -= s.spindown / cooldown_rate + 1;
        s.spindown = s.spindown.clamp(self.config.spindown_min, self.config.spindown_max);
    }
}
