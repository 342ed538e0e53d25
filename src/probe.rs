//! Per-worker rolling measurement state.

use crate::geometry::{Complexity, Time};
use crate::metrics::{extract_features, FeatureVec, SlidingWindow};

/// Rolling state a worker keeps about the run it is measuring.
///
/// All recorded values are post-reduction, so every worker's probe holds
/// identical numbers. The cumulative imbalance slowdown is the driving
/// signal of the threshold policy and is reset explicitly whenever a
/// rebalance occurs.
#[derive(Clone, Debug)]
pub struct Probe {
    nproc: usize,
    current_iteration: i64,
    max_it: Time,
    min_it: Time,
    sum_it: Time,
    cumulative_imbalance: Time,
    lb_times: Vec<Time>,
    lb_efficiencies: Vec<Time>,
    time_window: SlidingWindow,
    cmplx_window: SlidingWindow,
}

impl Probe {
    #[must_use]
    pub fn new(nproc: usize) -> Self {
        Probe {
            nproc,
            current_iteration: 0,
            max_it: 0.0,
            min_it: 0.0,
            sum_it: 0.0,
            cumulative_imbalance: 0.0,
            lb_times: Vec::new(),
            lb_efficiencies: Vec::new(),
            time_window: SlidingWindow::new(),
            cmplx_window: SlidingWindow::new(),
        }
    }

    /// Ingest one step's reduced timings and complexity, updating the
    /// cumulative imbalance and the feature windows.
    pub fn record_step(&mut self, max_it: Time, min_it: Time, sum_it: Time, cmplx: Complexity) {
        self.max_it = max_it;
        self.min_it = min_it;
        self.sum_it = sum_it;
        self.cumulative_imbalance += max_it - self.avg_it();
        self.time_window.push(max_it);
        self.cmplx_window.push(cmplx as f64);
        self.current_iteration += 1;
    }

    #[must_use]
    pub fn current_iteration(&self) -> i64 {
        self.current_iteration
    }

    #[must_use]
    pub fn max_it(&self) -> Time {
        self.max_it
    }

    #[must_use]
    pub fn min_it(&self) -> Time {
        self.min_it
    }

    #[must_use]
    pub fn avg_it(&self) -> Time {
        self.sum_it / self.nproc as Time
    }

    /// Parallel efficiency of the last recorded step.
    #[must_use]
    pub fn efficiency(&self) -> Time {
        if self.max_it == 0.0 {
            return 1.0;
        }
        self.avg_it() / self.max_it
    }

    #[must_use]
    pub fn cumulative_imbalance(&self) -> Time {
        self.cumulative_imbalance
    }

    pub fn reset_cumulative_imbalance(&mut self) {
        self.cumulative_imbalance = 0.0;
    }

    /// Record the measured cost of one partitioner invocation.
    pub fn push_lb_time(&mut self, lb_time: Time) {
        self.lb_times.push(lb_time);
    }

    /// Record the parallel efficiency observed at a rebalance point.
    pub fn push_lb_efficiency(&mut self) {
        let e = self.efficiency();
        self.lb_efficiencies.push(e);
    }

    #[must_use]
    pub fn avg_lb_time(&self) -> Time {
        if self.lb_times.is_empty() {
            return 0.0;
        }
        self.lb_times.iter().sum::<Time>() / self.lb_times.len() as Time
    }

    #[must_use]
    pub fn lb_times(&self) -> &[Time] {
        &self.lb_times
    }

    #[must_use]
    pub fn lb_efficiencies(&self) -> &[Time] {
        &self.lb_efficiencies
    }

    /// Feature vector of the current windows.
    #[must_use]
    pub fn features(&self) -> FeatureVec {
        extract_features(&self.time_window, &self.cmplx_window)
    }
}
