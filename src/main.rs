//! Binary driver: search for the optimal rebalance schedule, emit the
//! dataset, then compare the online policies against it from the same
//! initial state.

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use minilb::driver::{simulate, LjBatchRunner};
use minilb::error::SimResult;
use minilb::exchange::migrate_by;
use minilb::init;
use minilb::params::{InitialConf, SimParams};
use minilb::particle::Particle;
use minilb::partition::{Partitioner, RcbPartitioner};
use minilb::policy::{
    LbPolicy, OneShotPolicy, PeriodicPolicy, RandomPolicy, ReplayPolicy, ThresholdPolicy,
};
use minilb::probe::Probe;
use minilb::search::{run_search, SearchConfig};
use minilb::transport::{run_spmd, Communicator, LocalComm};

const DIMENSION: usize = 3;

/// Parallel n-body mini code for load balancing benchmarking.
#[derive(Parser, Debug)]
#[command(name = "minilb", version, about)]
struct Cli {
    /// Number of particles
    #[arg(short = 'n', long, default_value_t = 500)]
    nparticles: usize,
    /// Number of frames
    #[arg(short = 'F', long, default_value_t = 100)]
    nframes: u32,
    /// Steps per frame
    #[arg(short = 'f', long, default_value_t = 100)]
    npframe: u32,
    /// Time step
    #[arg(short = 't', long, default_value_t = 1e-4)]
    dt: f32,
    /// Sigma (lennard-jones)
    #[arg(short = 's', long, default_value_t = 1e-2)]
    sig: f32,
    /// Epsilon (lennard-jones)
    #[arg(short = 'e', long, default_value_t = 1.0)]
    eps: f32,
    /// Cut-off radius
    #[arg(short = 'l', long, default_value_t = 3.5e-2)]
    rc: f32,
    /// Gravitational strength
    #[arg(short = 'g', long = "gravity", default_value_t = 1.0)]
    gravity: f32,
    /// Initial temperature
    #[arg(short = 'T', long = "temperature", default_value_t = 1.0)]
    t0: f32,
    /// Simulation box width
    #[arg(short = 'w', long, default_value_t = 1.0)]
    simsize: f32,
    /// Random seed
    #[arg(short = 'S', long, default_value_t = 0)]
    seed: u64,
    /// Record particle frames under logs/<seed>/frames
    #[arg(short = 'r', long)]
    record: bool,
    /// Iteration of a single forced rebalance to compare
    #[arg(long)]
    one_shot_lb_call: Option<u32>,
    /// Period of the periodic comparison policy
    #[arg(long, default_value_t = 25)]
    lb_interval: u32,
    /// Number of best paths to retrieve
    #[arg(short = 'B', long, default_value_t = 1)]
    nb_best_path: usize,
    /// Initial particle distribution 1: Uniform, 2: Half, 3: Wall, 4: Cluster
    #[arg(short = 'd', long, default_value_t = 1)]
    particle_init_conf: u32,
    /// Number of SPMD workers
    #[arg(short = 'p', long, default_value_t = 1)]
    workers: usize,
}

impl Cli {
    fn into_params(self) -> SimResult<SimParams> {
        Ok(SimParams {
            npart: self.nparticles,
            nframes: self.nframes,
            npframe: self.npframe,
            dt: self.dt,
            eps_lj: self.eps,
            sig_lj: self.sig,
            gravity: self.gravity,
            t0: self.t0,
            simsize: self.simsize,
            rc: self.rc,
            seed: self.seed,
            record: self.record,
            one_shot_lb_call: self.one_shot_lb_call,
            lb_interval: self.lb_interval,
            nb_best_path: self.nb_best_path,
            init_conf: InitialConf::from_index(self.particle_init_conf)?,
            world_size: self.workers,
        })
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("minilb: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> SimResult<()> {
    let params = cli.into_params()?;
    params.validate()?;
    log::info!("simulation is starting now\n{params}");

    let run_name = format!(
        "{}-{}x{}-{}-{}_{:?}",
        params.seed, params.nframes, params.npframe, params.world_size, params.npart,
        params.init_conf
    );
    let dataset_path = PathBuf::from(format!("{run_name}.dataset"));
    let result_path = PathBuf::from(format!("{run_name}.result"));

    let initial = init::generate::<DIMENSION>(&params)?;
    log::info!("generated {} particles ({:?})", initial.len(), params.init_conf);

    run_spmd(params.world_size, |comm| {
        worker(comm, &params, &initial, &dataset_path, &result_path)
    })?;
    Ok(())
}

fn worker(
    comm: LocalComm,
    params: &SimParams,
    initial: &[Particle<DIMENSION>],
    dataset_path: &Path,
    result_path: &Path,
) -> SimResult<()> {
    let root = comm.rank() == 0;
    let mut part = RcbPartitioner::<DIMENSION>::new(params.world_size, params.simsize)?;
    let mut locals = if root { initial.to_vec() } else { Vec::new() };

    // establish the initial partition before anything is measured
    let update = part.partition(&comm, &locals)?;
    migrate_by(&comm, &mut locals, &update.exports)?;

    let pristine = locals.clone();
    let pristine_part = part.clone();

    if root {
        log::info!("running the shortest-path search over {} frames", params.nframes);
    }
    let mut config = SearchConfig::new(params.nframes, params.npframe);
    config.nb_solutions = params.nb_best_path;
    config.log_progress = root;
    let mut runner = LjBatchRunner::<DIMENSION, _, _>::new(&comm, params);
    let solutions = run_search(&mut runner, locals, part, Probe::new(comm.size()), &config)?;
    if root {
        for (idx, solution) in solutions.iter().enumerate() {
            log::info!("solution ({idx}) = {:.6}", solution.total_cost);
            for frame in &solution.frames {
                log::info!(
                    "frame time: {:.10} ? {}",
                    frame.frame_time,
                    i32::from(frame.decision)
                );
            }
        }
        solutions[0].write_dataset(dataset_path)?;
        log::info!("dataset written to {}", dataset_path.display());
    }
    comm.barrier()?;

    if root {
        log::info!("comparing the best path with the online heuristics");
        if result_path.exists() {
            std::fs::remove_file(result_path)?;
        }
    }
    let frame_dir = params
        .record
        .then(|| PathBuf::from(format!("logs/{}/frames", params.seed)));
    let mut contenders: Vec<(String, Box<dyn LbPolicy>)> = vec![
        (
            format!("periodic({})", params.lb_interval),
            Box::new(PeriodicPolicy::new(params.lb_interval)),
        ),
        ("random(0.1)".into(), Box::new(RandomPolicy::new(0.1, params.seed))),
        ("threshold(0.6)".into(), Box::new(ThresholdPolicy::new(0.6))),
        ("periodic(1)".into(), Box::new(PeriodicPolicy::new(1))),
        ("replay".into(), Box::new(ReplayPolicy::open(dataset_path, params.npframe))),
    ];
    if let Some(at) = params.one_shot_lb_call {
        contenders.push((
            format!("one_shot({at})"),
            Box::new(OneShotPolicy::new(i64::from(at))),
        ));
    }

    for (name, mut policy) in contenders {
        let mut locals = pristine.clone();
        let mut part = pristine_part.clone();
        let report = simulate(
            &comm,
            &mut locals,
            &mut part,
            policy.as_mut(),
            params,
            frame_dir.as_deref(),
        )?;
        if root {
            log::info!("{name}: total time {:.6}", report.total_time);
            append_result(result_path, &name, report.total_time)?;
        }
        comm.barrier()?;
    }
    Ok(())
}

fn append_result(path: &Path, name: &str, total_time: f64) -> SimResult<()> {
    use std::io::Write;
    let mut out = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(out, "{name}\t{total_time}")?;
    Ok(())
}
