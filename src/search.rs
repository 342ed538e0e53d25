//! Shortest-path search over the rebalance decision tree.
//!
//! Each frame of the horizon contributes one binary choice. The engine
//! explores both branches of every frame by actually running the batch
//! through a [`BatchRunner`], keeps the frontier ordered by measured path
//! cost plus an admissible heuristic, and stops at the first terminal pop.
//! Particle state is snapshotted once per frame boundary so a frame can be
//! re-expanded without replaying the prefix.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use crate::dataset::{DatasetRecord, DatasetWriter};
use crate::error::{SimError, SimResult};
use crate::geometry::{Complexity, Time};
use crate::metrics::FeatureVec;
use crate::probe::Probe;

/// The per-frame binary choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    DoLb,
    DontLb,
}

/// Role of a node in the tree, kept for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Partitioning,
    Computing,
}

/// Measurements of one expanded batch. The rebalance cost, when present,
/// is already folded into the first step time.
#[derive(Clone, Debug, Default)]
pub struct BatchStats {
    pub step_times: Vec<Time>,
    pub li_hist: Vec<Time>,
    pub cmplx_hist: Vec<Complexity>,
    pub lb_cost: Time,
}

/// The seam between the search and whatever executes a batch of steps.
///
/// The production runner drives the force kernel over real particles and
/// wall clocks; tests substitute a deterministic cost model. `state` is the
/// rollback payload, `part` the partitioner snapshot owned by the child
/// being built, `probe` the child's rolling metrics (already a copy of the
/// parent's).
pub trait BatchRunner {
    type State: Clone;
    type Part: Clone;

    fn run_batch(
        &mut self,
        state: &mut Self::State,
        part: &mut Self::Part,
        decision: Decision,
        start_it: i64,
        probe: &mut Probe,
    ) -> SimResult<BatchStats>;
}

/// A vertex of the decision tree.
pub struct SearchNode<P> {
    pub start_it: i64,
    pub end_it: i64,
    pub decision: Decision,
    pub kind: NodeKind,
    pub parent: Option<Rc<SearchNode<P>>>,
    /// Opaque partitioner snapshot, copied on branch, dropped on retirement.
    pub partitioner: P,
    /// Rolling metrics at the end of the node's window.
    pub probe: Probe,
    /// Feature vector captured before the node's decision took effect.
    pub features_before: FeatureVec,
    pub step_times: Vec<Time>,
    pub li_hist: Vec<Time>,
    pub dec_hist: Vec<bool>,
    pub cmplx_hist: Vec<Complexity>,
    node_cost: Time,
    g: Time,
    h: Time,
    seq: u64,
}

impl<P> SearchNode<P> {
    /// Measured cost of this node's window alone.
    #[must_use]
    pub fn node_cost(&self) -> Time {
        self.node_cost
    }

    /// Measured cumulative cost of the path ending here.
    #[must_use]
    pub fn path_cost(&self) -> Time {
        self.g
    }

    /// Frontier key `f = g + h`.
    #[must_use]
    pub fn cost(&self) -> Time {
        self.g + self.h
    }
}

impl<P> fmt::Display for SearchNode<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iteration {:>6} -> {:>6} cost {:.5} ({}, {})",
            self.start_it,
            self.end_it,
            self.cost(),
            match self.decision {
                Decision::DoLb => "Y",
                Decision::DontLb => "N",
            },
            match self.kind {
                NodeKind::Partitioning => "Part",
                NodeKind::Computing => "Cpt",
            },
        )
    }
}

/// Frontier entry: min-cost first, insertion order breaking ties so every
/// lockstep worker pops the identical node.
struct OpenNode<P>(Rc<SearchNode<P>>);

impl<P> PartialEq for OpenNode<P> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<P> Eq for OpenNode<P> {}

impl<P> PartialOrd for OpenNode<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for OpenNode<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap, the frontier wants min-cost
        other
            .0
            .cost()
            .total_cmp(&self.0.cost())
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Search-wide knobs.
#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub nframes: u32,
    pub npframe: u32,
    /// How many terminal paths to return, best first.
    pub nb_solutions: usize,
    /// Drop open rebalance siblings of a settled rebalance node. Purely an
    /// exploration saving; the returned cost is identical either way.
    pub prune_settled_lb: bool,
    /// Emit one progress line per popped node.
    pub log_progress: bool,
}

impl SearchConfig {
    #[must_use]
    pub fn new(nframes: u32, npframe: u32) -> Self {
        SearchConfig {
            nframes,
            npframe,
            nb_solutions: 1,
            prune_settled_lb: true,
            log_progress: false,
        }
    }
}

/// One frame of a finished path, ready for dataset emission.
#[derive(Clone, Debug)]
pub struct FrameRecord {
    pub frame: i32,
    pub features: FeatureVec,
    pub decision: bool,
    pub frame_time: Time,
}

/// A reconstructed optimal (or next-best) path.
#[derive(Clone, Debug)]
pub struct Solution {
    pub total_cost: Time,
    pub frames: Vec<FrameRecord>,
    pub step_times: Vec<Time>,
    pub li_hist: Vec<Time>,
    pub decisions: Vec<bool>,
}

impl Solution {
    /// Per-iteration decision bits expanded from the frame records.
    #[must_use]
    pub fn iteration_decisions(&self) -> &[bool] {
        &self.decisions
    }

    /// Write the path as a dataset file, trailer included.
    pub fn write_dataset(&self, path: &Path) -> SimResult<()> {
        let mut writer = DatasetWriter::create(path)?;
        for record in &self.frames {
            writer.append(&DatasetRecord {
                frame: record.frame,
                features: record.features,
                decision: record.decision,
                frame_time: record.frame_time as f32,
            })?;
        }
        writer.finish(self.total_cost as f32)
    }
}

/// Run the search from an initial state and partitioner snapshot.
///
/// Every worker of the SPMD group calls this with identical arguments and,
/// because batch costs come back reduced, walks the identical frontier.
pub fn run_search<R: BatchRunner>(
    runner: &mut R,
    initial_state: R::State,
    initial_part: R::Part,
    initial_probe: Probe,
    config: &SearchConfig,
) -> SimResult<Vec<Solution>> {
    let batch = i64::from(config.npframe);
    let horizon = i64::from(config.nframes) * batch;
    let nframes = config.nframes as usize;

    let mut rollback: Vec<Option<R::State>> = vec![None; nframes + 1];
    rollback[0] = Some(initial_state);

    let mut found_yes = vec![false; nframes + 1];
    let mut frontier: BinaryHeap<OpenNode<R::Part>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    frontier.push(OpenNode(Rc::new(SearchNode {
        start_it: -batch,
        end_it: 0,
        decision: Decision::DoLb,
        kind: NodeKind::Computing,
        parent: None,
        partitioner: initial_part,
        probe: initial_probe,
        features_before: FeatureVec::default(),
        step_times: Vec::new(),
        li_hist: Vec::new(),
        dec_hist: Vec::new(),
        cmplx_hist: Vec::new(),
        node_cost: 0.0,
        g: 0.0,
        h: 0.0,
        seq,
    })));

    let mut solutions = Vec::new();
    while let Some(OpenNode(node)) = frontier.pop() {
        if config.log_progress {
            log::info!("pop {node}");
        }
        if node.decision == Decision::DoLb && node.start_it >= 0 && config.prune_settled_lb {
            let k = (node.start_it / batch) as usize;
            if found_yes[k] {
                // a rebalance at this frame was already settled as best;
                // this sibling can only be worse
                continue;
            }
            found_yes[k] = true;
        }
        if node.end_it >= horizon {
            solutions.push(reconstruct(&node));
            if solutions.len() >= config.nb_solutions {
                break;
            }
            continue;
        }

        let frame = (node.end_it / batch) as usize;
        for decision in [Decision::DoLb, Decision::DontLb] {
            if decision == Decision::DoLb && config.prune_settled_lb && found_yes[frame] {
                continue;
            }
            let mut state = rollback[frame]
                .clone()
                .ok_or_else(|| SimError::invariant(format!("rollback slot {frame} is empty")))?;
            let mut part = node.partitioner.clone();
            let mut probe = node.probe.clone();
            let features_before = probe.features();
            let stats = runner.run_batch(&mut state, &mut part, decision, node.end_it, &mut probe)?;
            let node_cost: Time = stats.step_times.iter().sum();
            let dec_hist = (0..stats.step_times.len())
                .map(|i| decision == Decision::DoLb && i == 0)
                .collect();
            seq += 1;
            let child = Rc::new(SearchNode {
                start_it: node.end_it,
                end_it: node.end_it + batch,
                decision,
                kind: match decision {
                    Decision::DoLb => NodeKind::Partitioning,
                    Decision::DontLb => NodeKind::Computing,
                },
                parent: Some(Rc::clone(&node)),
                partitioner: part,
                probe,
                features_before,
                step_times: stats.step_times,
                li_hist: stats.li_hist,
                dec_hist,
                cmplx_hist: stats.cmplx_hist,
                node_cost,
                g: node.g + node_cost,
                h: 0.0,
                seq,
            });
            // the slot write must land before the child becomes poppable
            if child.end_it < horizon {
                rollback[frame + 1] = Some(state);
            }
            frontier.push(OpenNode(child));
        }
    }

    if solutions.is_empty() {
        return Err(SimError::invariant(
            "search exhausted the frontier without reaching the horizon",
        ));
    }
    Ok(solutions)
}

fn reconstruct<P>(terminal: &Rc<SearchNode<P>>) -> Solution {
    let mut spine = Vec::new();
    let mut cursor = Rc::clone(terminal);
    while cursor.start_it >= 0 {
        spine.push(Rc::clone(&cursor));
        match &cursor.parent {
            Some(parent) => cursor = Rc::clone(parent),
            None => break,
        }
    }
    spine.reverse();

    let batch = terminal.end_it - terminal.start_it;
    let mut solution = Solution {
        total_cost: terminal.cost(),
        frames: Vec::with_capacity(spine.len()),
        step_times: Vec::new(),
        li_hist: Vec::new(),
        decisions: Vec::new(),
    };
    for node in &spine {
        solution.frames.push(FrameRecord {
            frame: (node.start_it / batch) as i32,
            features: node.features_before,
            decision: node.decision == Decision::DoLb,
            frame_time: node.node_cost,
        });
        solution.step_times.extend_from_slice(&node.step_times);
        solution.li_hist.extend_from_slice(&node.li_hist);
        solution.decisions.extend_from_slice(&node.dec_hist);
    }
    solution
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic cost model: per-iteration base cost plus the imbalance
    /// accumulated since the last rebalance; a rebalance pays a fixed cost
    /// and clears the accumulation.
    pub struct ModelRunner {
        pub npframe: u32,
        pub base: Vec<Time>,
        pub growth: Vec<Time>,
        pub lb_cost: Time,
    }

    impl ModelRunner {
        pub fn new(horizon: usize, npframe: u32, lb_cost: Time) -> Self {
            ModelRunner {
                npframe,
                base: (0..horizon).map(|it| 1.0 + 0.1 * ((it * 7) % 5) as Time).collect(),
                growth: (0..horizon).map(|it| 0.2 + 0.05 * ((it * 3) % 4) as Time).collect(),
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
                // a one-worker probe accrues exactly max - avg = growth
                probe.record_step(self.base[it] + self.growth[it], 0.0, self.base[it], 1);
                stats.step_times.push(step);
                stats.li_hist.push(probe.cumulative_imbalance());
                stats.cmplx_hist.push(1);
            }
            Ok(stats)
        }
    }

    /// Reference cost of one decision sequence under the same model.
    pub fn model_cost(runner: &ModelRunner, decisions: &[bool]) -> Time {
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

    fn brute_force_best(runner: &ModelRunner, nframes: usize) -> (Time, Vec<bool>) {
        let mut best = (Time::INFINITY, Vec::new());
        for mask in 0u32..(1 << nframes) {
            let decisions: Vec<bool> = (0..nframes).map(|f| mask & (1 << f) != 0).collect();
            let cost = model_cost(runner, &decisions);
            if cost < best.0 {
                best = (cost, decisions);
            }
        }
        best
    }

    fn search_with(nframes: u32, npframe: u32, lb_cost: Time, prune: bool) -> Solution {
        let horizon = (nframes * npframe) as usize;
        let mut runner = ModelRunner::new(horizon, npframe, lb_cost);
        let mut config = SearchConfig::new(nframes, npframe);
        config.prune_settled_lb = prune;
        let mut solutions =
            run_search(&mut runner, (), (), Probe::new(1), &config).expect("search must finish");
        solutions.remove(0)
    }

    #[test]
    fn matches_brute_force_on_small_horizons() {
        for nframes in [1u32, 4, 8, 12, 16] {
            let solution = search_with(nframes, 1, 1.5, true);
            let runner = ModelRunner::new(nframes as usize, 1, 1.5);
            let (best_cost, _) = brute_force_best(&runner, nframes as usize);
            assert!(
                (solution.total_cost - best_cost).abs() < 1e-9,
                "horizon {nframes}: search {} vs brute force {best_cost}",
                solution.total_cost
            );
        }
    }

    #[test]
    fn pruning_does_not_change_the_returned_cost() {
        for nframes in [4u32, 8, 12] {
            let pruned = search_with(nframes, 1, 1.5, true);
            let free = search_with(nframes, 1, 1.5, false);
            assert!((pruned.total_cost - free.total_cost).abs() < 1e-9);
        }
    }

    #[test]
    fn cheap_rebalances_are_taken_and_expensive_ones_avoided() {
        let always = search_with(6, 1, 0.0, true);
        assert!(
            always.frames.iter().skip(1).all(|f| f.decision),
            "free rebalances should be taken wherever imbalance has accrued"
        );
        let never = search_with(4, 1, 1e6, true);
        assert!(
            never.frames.iter().all(|f| !f.decision),
            "prohibitive rebalances should never be taken"
        );
    }

    #[test]
    fn solution_histories_cover_the_horizon() {
        let solution = search_with(5, 3, 1.0, true);
        assert_eq!(solution.frames.len(), 5);
        assert_eq!(solution.step_times.len(), 15);
        assert_eq!(solution.li_hist.len(), 15);
        assert_eq!(solution.decisions.len(), 15);
        for (i, frame) in solution.frames.iter().enumerate() {
            assert_eq!(frame.frame, i as i32);
        }
        // decision bits fire only on first steps of rebalancing frames
        for (it, &bit) in solution.decisions.iter().enumerate() {
            if bit {
                assert_eq!(it % 3, 0);
                assert!(solution.frames[it / 3].decision);
            }
        }
        let total: Time = solution.step_times.iter().sum();
        assert!((total - solution.total_cost).abs() < 1e-9);
    }

    #[test]
    fn dataset_round_trip_preserves_the_schedule() {
        let solution = search_with(6, 2, 1.0, true);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("path.dataset");
        solution.write_dataset(&path).unwrap();
        let dataset = crate::dataset::Dataset::read(&path).unwrap();
        assert_eq!(dataset.records.len(), 6);
        for (record, frame) in dataset.records.iter().zip(&solution.frames) {
            assert_eq!(record.decision, frame.decision);
            assert_eq!(record.frame, frame.frame);
        }
        assert!((f64::from(dataset.total_cost) - solution.total_cost).abs() < 1e-3);
    }

    #[test]
    fn requesting_more_solutions_returns_ranked_paths() {
        let mut runner = ModelRunner::new(4, 1, 1.5);
        let mut config = SearchConfig::new(4, 1);
        config.nb_solutions = 3;
        let solutions = run_search(&mut runner, (), (), Probe::new(1), &config).unwrap();
        assert_eq!(solutions.len(), 3);
        for pair in solutions.windows(2) {
            assert!(pair[0].total_cost <= pair[1].total_cost + 1e-9);
        }
    }
}
