//! Online load-balancing decision strategies.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::Dataset;
use crate::probe::Probe;

/// A pluggable answer to the per-iteration question: rebalance now or keep
/// computing? Implementations are pure functions of the iteration, the
/// probe snapshot and their own state; only [`ReplayPolicy`] touches a file,
/// and only at construction.
pub trait LbPolicy {
    fn should_balance(&mut self, iteration: i64, probe: &Probe) -> bool;
}

/// Never rebalance.
pub struct NoLbPolicy;

impl LbPolicy for NoLbPolicy {
    fn should_balance(&mut self, _iteration: i64, _probe: &Probe) -> bool {
        false
    }
}

/// Rebalance every `period` iterations.
pub struct PeriodicPolicy {
    period: u32,
}

impl PeriodicPolicy {
    #[must_use]
    pub fn new(period: u32) -> Self {
        PeriodicPolicy { period: period.max(1) }
    }
}

impl LbPolicy for PeriodicPolicy {
    fn should_balance(&mut self, iteration: i64, _probe: &Probe) -> bool {
        iteration > 0 && iteration % i64::from(self.period) == 0
    }
}

/// Rebalance exactly once, at the given iteration.
pub struct OneShotPolicy {
    at: i64,
}

impl OneShotPolicy {
    #[must_use]
    pub fn new(at: i64) -> Self {
        OneShotPolicy { at }
    }
}

impl LbPolicy for OneShotPolicy {
    fn should_balance(&mut self, iteration: i64, _probe: &Probe) -> bool {
        iteration == self.at
    }
}

/// Rebalance with probability `p` per iteration, from a seeded stream so
/// every worker draws the identical sequence.
pub struct RandomPolicy {
    p: f64,
    rng: StdRng,
}

impl RandomPolicy {
    #[must_use]
    pub fn new(p: f64, seed: u64) -> Self {
        RandomPolicy { p, rng: StdRng::seed_from_u64(seed) }
    }
}

impl LbPolicy for RandomPolicy {
    fn should_balance(&mut self, _iteration: i64, _probe: &Probe) -> bool {
        self.rng.gen::<f64>() < self.p
    }
}

/// Rebalance once the cumulative imbalance slowdown since the last
/// rebalance exceeds `theta` times the average iteration time.
pub struct ThresholdPolicy {
    theta: f64,
}

impl ThresholdPolicy {
    #[must_use]
    pub fn new(theta: f64) -> Self {
        ThresholdPolicy { theta }
    }
}

impl LbPolicy for ThresholdPolicy {
    fn should_balance(&mut self, _iteration: i64, probe: &Probe) -> bool {
        probe.cumulative_imbalance() > self.theta * probe.avg_it()
    }
}

/// Replay the per-frame decisions of a previously emitted dataset.
///
/// The file is read once here; an unreadable dataset degrades the policy to
/// never-rebalance with a logged warning instead of failing the run.
pub struct ReplayPolicy {
    dataset: Option<Dataset>,
    npframe: u32,
}

impl ReplayPolicy {
    #[must_use]
    pub fn open(path: &Path, npframe: u32) -> Self {
        let dataset = match Dataset::read(path) {
            Ok(d) => Some(d),
            Err(e) => {
                log::warn!(
                    "replay policy degraded to no-rebalance: cannot read {}: {e}",
                    path.display()
                );
                None
            }
        };
        ReplayPolicy { dataset, npframe: npframe.max(1) }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.dataset.is_none()
    }
}

impl LbPolicy for ReplayPolicy {
    fn should_balance(&mut self, iteration: i64, _probe: &Probe) -> bool {
        // the recorded schedule only rebalances on frame boundaries
        if iteration % i64::from(self.npframe) != 0 {
            return false;
        }
        let frame = (iteration / i64::from(self.npframe)) as usize;
        self.dataset
            .as_ref()
            .map(|d| d.decision_for_frame(frame))
            .unwrap_or(false)
    }
}
