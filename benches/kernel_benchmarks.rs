//! Benchmarks for the hot paths: cell-list construction, the force sweep,
//! border discovery and the bisection partitioner.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use minilb::exchange::find_border_cells;
use minilb::geometry::{BoundingBox, CellGrid, EMPTY};
use minilb::kernel::{build_cell_list, compute_one_step, StepBuffers};
use minilb::params::{InitialConf, SimParams};
use minilb::particle::Particle;
use minilb::{init, metrics};

fn bench_params(npart: usize) -> SimParams {
    SimParams {
        npart,
        rc: 3.5e-2,
        simsize: 1.0,
        sig_lj: 1e-2,
        eps_lj: 1.0,
        dt: 1e-4,
        t0: 0.0,
        seed: 42,
        init_conf: InitialConf::Uniform,
        ..SimParams::default()
    }
}

fn particle_set(npart: usize) -> (SimParams, Vec<Particle<3>>) {
    let params = bench_params(npart);
    let particles = init::generate::<3>(&params).expect("bench configuration must be feasible");
    (params, particles)
}

fn bench_cell_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_list");
    for npart in [512usize, 2048] {
        let (params, particles) = particle_set(npart);
        let bbox = BoundingBox::snapped(params.rc, particles.iter().map(|p| &p.position));
        let grid = CellGrid::new(bbox, params.rc).unwrap();
        let mut head = vec![EMPTY; grid.total_cells() as usize];
        let mut link = vec![EMPTY; particles.len()];
        group.bench_with_input(BenchmarkId::from_parameter(npart), &npart, |b, _| {
            b.iter(|| {
                build_cell_list(&grid, black_box(&particles), &[], &mut head, &mut link);
            })
        });
    }
    group.finish();
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_one_step");
    group.sample_size(30);
    for npart in [512usize, 2048] {
        let (params, particles) = particle_set(npart);
        group.bench_with_input(BenchmarkId::from_parameter(npart), &npart, |b, _| {
            let mut buffers = StepBuffers::new();
            b.iter_batched(
                || particles.clone(),
                |mut locals| {
                    let bbox =
                        BoundingBox::snapped(params.rc, locals.iter().map(|p| &p.position));
                    compute_one_step(&mut locals, &[], &bbox, &mut buffers, &params).unwrap()
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_border_discovery(c: &mut Criterion) {
    let (params, particles) = particle_set(2048);
    let bbox = BoundingBox::snapped(params.rc, particles.iter().map(|p| &p.position));
    let grid = CellGrid::new(bbox, params.rc).unwrap();
    let mut lo = BoundingBox::<3>::whole_domain(params.simsize);
    lo.max[0] = 0.5;
    let mut hi = BoundingBox::<3>::whole_domain(params.simsize);
    hi.min[0] = 0.5;
    let domains = vec![lo, hi];
    c.bench_function("find_border_cells", |b| {
        b.iter(|| find_border_cells(&grid, black_box(&domains), 0))
    });
}

fn bench_features(c: &mut Criterion) {
    let mut times = metrics::SlidingWindow::new();
    let mut cmplx = metrics::SlidingWindow::new();
    for i in 0..metrics::WINDOW_LEN {
        times.push(1.0 + 0.01 * i as f64);
        cmplx.push(2000.0 + (i % 7) as f64);
    }
    c.bench_function("extract_features", |b| {
        b.iter(|| metrics::extract_features(black_box(&times), black_box(&cmplx)))
    });
}

criterion_group!(
    benches,
    bench_cell_list,
    bench_step,
    bench_border_discovery,
    bench_features
);
criterion_main!(benches);
