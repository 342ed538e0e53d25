#![allow(dead_code)] // each test binary uses a different subset

//! Deterministic cost model shared by the integration suites.
//!
//! The search measures real wall time in production; these tests need exact
//! reproducible costs, so batches are priced by a fixed model: every
//! iteration costs its base time plus the imbalance accumulated since the
//! last rebalance, and a rebalance pays a fixed fee to clear that
//! accumulation.

use minilb::error::SimResult;
use minilb::probe::Probe;
use minilb::search::{BatchRunner, BatchStats, Decision};

pub struct ModelRunner {
    pub npframe: u32,
    pub base: Vec<f64>,
    pub growth: Vec<f64>,
    pub lb_cost: f64,
}

impl ModelRunner {
    /// Mildly varying base and growth series, like a slowly drifting run.
    pub fn drifting(horizon: usize, npframe: u32, lb_cost: f64) -> Self {
        ModelRunner {
            npframe,
            base: (0..horizon).map(|it| 1.0 + 0.1 * ((it * 7) % 5) as f64).collect(),
            growth: (0..horizon).map(|it| 0.2 + 0.05 * ((it * 3) % 4) as f64).collect(),
            lb_cost,
        }
    }

    /// Perfectly balanced run: rebalancing can only ever add cost.
    pub fn equilibrium(horizon: usize, npframe: u32, lb_cost: f64) -> Self {
        ModelRunner {
            npframe,
            base: vec![1.0; horizon],
            growth: vec![0.0; horizon],
            lb_cost,
        }
    }
}

impl BatchRunner for ModelRunner {
    type State = ();
    type Part = ();

    fn run_batch(
        &mut self,
        _state: &mut (),
        _part: &mut (),
        decision: Decision,
        start_it: i64,
        probe: &mut Probe,
    ) -> SimResult<BatchStats> {
        let mut stats = BatchStats::default();
        if decision == Decision::DoLb {
            probe.reset_cumulative_imbalance();
            probe.push_lb_time(self.lb_cost);
            stats.lb_cost = self.lb_cost;
        }
        for i in 0..self.npframe {
            let it = (start_it + i64::from(i)) as usize;
            let mut step = self.base[it] + probe.cumulative_imbalance();
            if decision == Decision::DoLb && i == 0 {
                step += self.lb_cost;
            }
            // one-worker probe: max - avg accrues exactly the growth term
            probe.record_step(self.base[it] + self.growth[it], 0.0, self.base[it], 1);
            stats.step_times.push(step);
            stats.li_hist.push(probe.cumulative_imbalance());
            stats.cmplx_hist.push(1);
        }
        Ok(stats)
    }
}

/// Closed-form cost of a full decision sequence under the same model.
pub fn model_cost(runner: &ModelRunner, decisions: &[bool]) -> f64 {
    let mut cum = 0.0;
    let mut total = 0.0;
    let b = runner.npframe as usize;
    for (frame, &lb) in decisions.iter().enumerate() {
        if lb {
            cum = 0.0;
            total += runner.lb_cost;
        }
        for i in 0..b {
            let it = frame * b + i;
            total += runner.base[it] + cum;
            cum += runner.growth[it];
        }
    }
    total
}

/// Exhaustive minimum over all 2^nframes decision sequences.
pub fn brute_force_best(runner: &ModelRunner, nframes: usize) -> (f64, Vec<bool>) {
    assert!(nframes <= 20, "brute force space explodes past 2^20");
    let mut best = (f64::INFINITY, Vec::new());
    for mask in 0u32..(1 << nframes) {
        let decisions: Vec<bool> = (0..nframes).map(|f| mask & (1 << f) != 0).collect();
        let cost = model_cost(runner, &decisions);
        if cost < best.0 {
            best = (cost, decisions);
        }
    }
    best
}
