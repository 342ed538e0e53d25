//! The time-stepped simulation loop and the production batch runner.
//!
//! Both the online driver and the search expand work through the same
//! measured step: migrate drifted particles, rebuild the box and borders,
//! fetch ghosts, run the force kernel under a wall clock, reduce the
//! timings. The only ordering subtlety is that a rebalance must complete
//! before the ghost exchange so ghosts reflect the new ownership.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use crate::error::SimResult;
use crate::exchange::{exchange_ghosts, find_border_cells, migrate, migrate_by};
use crate::geometry::{BoundingBox, CellGrid, Complexity, Time};
use crate::kernel::{compute_one_step, Lj, LjForces, StepBuffers};
use crate::params::SimParams;
use crate::particle::Particle;
use crate::partition::Partitioner;
use crate::policy::LbPolicy;
use crate::probe::Probe;
use crate::search::{BatchRunner, BatchStats, Decision};
use crate::transport::{Communicator, ReduceOp};

/// Reduced measurements of one iteration.
#[derive(Clone, Copy, Debug)]
pub struct StepMeasurement {
    pub max: Time,
    pub min: Time,
    pub sum: Time,
    pub cmplx: Complexity,
}

/// Run one measured iteration: ghosts in, forces, integration, reductions.
/// The caller is responsible for migration before and after.
pub fn measured_step<const N: usize, C: Communicator>(
    comm: &C,
    locals: &mut Vec<Particle<N>>,
    domains: &[BoundingBox<N>],
    buffers: &mut StepBuffers,
    params: &SimParams,
) -> SimResult<StepMeasurement>
where
    Lj: LjForces<N>,
{
    let bbox = BoundingBox::snapped(params.rc, locals.iter().map(|p| &p.position));
    let grid = CellGrid::new(bbox, params.rc)?;
    let borders = find_border_cells(&grid, domains, comm.rank());
    let ghosts = exchange_ghosts(comm, locals, &grid, &borders)?;

    let clock = Instant::now();
    let cmplx = compute_one_step(locals, &ghosts, &bbox, buffers, params)?;
    let wall = clock.elapsed().as_secs_f64();

    Ok(StepMeasurement {
        max: comm.all_reduce_time(wall, ReduceOp::Max)?,
        min: comm.all_reduce_time(wall, ReduceOp::Min)?,
        sum: comm.all_reduce_time(wall, ReduceOp::Sum)?,
        cmplx: comm.all_reduce_count(cmplx, ReduceOp::Sum)?,
    })
}

/// Invoke the partitioner under a wall clock, apply its export list and
/// reset the probe's imbalance state. Returns the reduced rebalance cost.
pub fn rebalance<const N: usize, C, P>(
    comm: &C,
    locals: &mut Vec<Particle<N>>,
    part: &mut P,
    probe: &mut Probe,
) -> SimResult<Time>
where
    C: Communicator,
    P: Partitioner<N>,
{
    let clock = Instant::now();
    let update = part.partition(comm, locals)?;
    migrate_by(comm, locals, &update.exports)?;
    let lb_cost = comm.all_reduce_time(clock.elapsed().as_secs_f64(), ReduceOp::Max)?;
    probe.push_lb_efficiency();
    probe.push_lb_time(lb_cost);
    probe.reset_cumulative_imbalance();
    Ok(lb_cost)
}

/// [`BatchRunner`] that expands a search batch over the real simulation.
pub struct LjBatchRunner<'a, const N: usize, C, P> {
    comm: &'a C,
    params: &'a SimParams,
    buffers: StepBuffers,
    _marker: std::marker::PhantomData<P>,
}

impl<'a, const N: usize, C, P> LjBatchRunner<'a, N, C, P> {
    pub fn new(comm: &'a C, params: &'a SimParams) -> Self {
        LjBatchRunner {
            comm,
            params,
            buffers: StepBuffers::new(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<'a, const N: usize, C, P> BatchRunner for LjBatchRunner<'a, N, C, P>
where
    C: Communicator,
    P: Partitioner<N>,
    Lj: LjForces<N>,
{
    type State = Vec<Particle<N>>;
    type Part = P;

    fn run_batch(
        &mut self,
        state: &mut Vec<Particle<N>>,
        part: &mut P,
        decision: Decision,
        _start_it: i64,
        probe: &mut Probe,
    ) -> SimResult<BatchStats> {
        // the restored snapshot may carry a sibling's ownership layout
        migrate(self.comm, state, part.domains(), self.params.simsize)?;

        let mut stats = BatchStats::default();
        if decision == Decision::DoLb {
            stats.lb_cost = rebalance(self.comm, state, part, probe)?;
        }
        for i in 0..self.params.npframe {
            let m = measured_step(self.comm, state, part.domains(), &mut self.buffers, self.params)?;
            probe.record_step(m.max, m.min, m.sum, m.cmplx);
            let step = if i == 0 { m.max + stats.lb_cost } else { m.max };
            stats.step_times.push(step);
            stats.li_hist.push(probe.cumulative_imbalance());
            stats.cmplx_hist.push(m.cmplx);
            migrate(self.comm, state, part.domains(), self.params.simsize)?;
        }
        Ok(stats)
    }
}

/// Outcome of one online run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Reduced total wall time, rebalance costs included.
    pub total_time: Time,
    /// Per-iteration decision bits the policy produced.
    pub decisions: Vec<bool>,
    /// Reduced per-frame times.
    pub frame_times: Vec<Time>,
    /// Reduced per-frame complexities (last step of each frame).
    pub frame_cmplx: Vec<Complexity>,
}

/// Iterate frame by step under one online policy.
pub fn simulate<const N: usize, C, P>(
    comm: &C,
    locals: &mut Vec<Particle<N>>,
    part: &mut P,
    policy: &mut dyn LbPolicy,
    params: &SimParams,
    frame_dir: Option<&Path>,
) -> SimResult<RunReport>
where
    C: Communicator,
    P: Partitioner<N>,
    Lj: LjForces<N>,
{
    let mut probe = Probe::new(comm.size());
    let mut buffers = StepBuffers::new();
    let mut report = RunReport {
        total_time: 0.0,
        decisions: Vec::with_capacity(params.horizon() as usize),
        frame_times: Vec::with_capacity(params.nframes as usize),
        frame_cmplx: Vec::with_capacity(params.nframes as usize),
    };

    record_frame(comm, locals, frame_dir, 0)?;
    for frame in 0..params.nframes {
        let mut frame_time = 0.0;
        let mut frame_cmplx = 0;
        for i in 0..params.npframe {
            let iteration = i64::from(frame) * i64::from(params.npframe) + i64::from(i);
            let lb_decision = policy.should_balance(iteration, &probe);
            report.decisions.push(lb_decision);
            if lb_decision {
                frame_time += rebalance(comm, locals, part, &mut probe)?;
            } else {
                migrate(comm, locals, part.domains(), params.simsize)?;
            }
            let m = measured_step(comm, locals, part.domains(), &mut buffers, params)?;
            probe.record_step(m.max, m.min, m.sum, m.cmplx);
            frame_time += m.max;
            frame_cmplx = m.cmplx;
        }
        report.total_time += frame_time;
        report.frame_times.push(frame_time);
        report.frame_cmplx.push(frame_cmplx);
        if comm.rank() == 0 {
            log::info!(
                "frame {frame:>4} time {frame_time:.6} cmplx {frame_cmplx} imbalance {:.6}",
                probe.cumulative_imbalance()
            );
        }
        record_frame(comm, locals, frame_dir, frame + 1)?;
    }
    Ok(report)
}

/// Gather the particle set on the root and append one CSV frame file.
fn record_frame<const N: usize, C: Communicator>(
    comm: &C,
    locals: &[Particle<N>],
    frame_dir: Option<&Path>,
    frame: u32,
) -> SimResult<()> {
    let Some(dir) = frame_dir else { return Ok(()) };
    let gathered = comm.gather(locals.to_vec(), 0)?;
    if let Some(mut all) = gathered {
        all.sort_by_key(|p| p.gid);
        fs::create_dir_all(dir)?;
        let mut out = fs::File::create(dir.join(format!("particles.csv.{frame}")))?;
        writeln!(out, "gid,{}", csv_header::<N>())?;
        for p in &all {
            write!(out, "{}", p.gid)?;
            for d in 0..N {
                write!(out, ",{}", p.position[d])?;
            }
            for d in 0..N {
                write!(out, ",{}", p.velocity[d])?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

fn csv_header<const N: usize>() -> &'static str {
    match N {
        2 => "x,y,vx,vy",
        3 => "x,y,z,vx,vy,vz",
        _ => "pos...,vel...",
    }
}
