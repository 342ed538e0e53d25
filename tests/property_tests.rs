//! Property-based tests over the geometry, kernel, exchange and search
//! invariants.

mod common;

use common::{brute_force_best, ModelRunner};
use minilb::geometry::{BoundingBox, CellGrid, EMPTY};
use minilb::kernel::{build_cell_list, compute_one_step, StepBuffers};
use minilb::params::SimParams;
use minilb::particle::Particle;
use minilb::physics::{apply_reflect, integrate};
use minilb::probe::Probe;
use minilb::search::{run_search, SearchConfig};
use minilb::transport::{run_spmd, Communicator};
use proptest::prelude::*;

fn position_strategy() -> impl Strategy<Value = [f32; 3]> {
    [0.001f32..0.999, 0.001f32..0.999, 0.001f32..0.999]
}

fn particles_strategy(max: usize) -> impl Strategy<Value = Vec<Particle<3>>> {
    prop::collection::vec(position_strategy(), 1..max).prop_map(|positions| {
        positions
            .into_iter()
            .enumerate()
            .map(|(i, pos)| Particle::at_rest(i as u64, pos))
            .collect()
    })
}

proptest! {
    /// The snapped box contains its inputs and its sides are whole
    /// multiples of the cut-off.
    #[test]
    fn prop_snapped_bbox_contains_and_aligns(
        particles in particles_strategy(40),
        rc in 0.05f32..0.5,
    ) {
        let bbox = BoundingBox::snapped(rc, particles.iter().map(|p| &p.position));
        for p in &particles {
            prop_assert!(bbox.contains(&p.position));
        }
        for d in 0..3 {
            let cells = bbox.side(d) / rc;
            prop_assert!((cells - cells.round()).abs() < 1e-3);
        }
    }

    /// Walking every cell chain visits each particle exactly once.
    #[test]
    fn prop_cell_chains_partition_the_particles(
        particles in particles_strategy(60),
        rc in 0.05f32..0.5,
    ) {
        let bbox = BoundingBox::snapped(rc, particles.iter().map(|p| &p.position));
        let grid = CellGrid::new(bbox, rc).unwrap();
        let mut head = vec![EMPTY; grid.total_cells() as usize];
        let mut link = vec![EMPTY; particles.len()];
        build_cell_list(&grid, &particles, &[], &mut head, &mut link);

        let mut seen = vec![false; particles.len()];
        for c in 0..grid.total_cells() as usize {
            let mut j = head[c];
            while j != EMPTY {
                let ju = j as usize;
                prop_assert!(!seen[ju], "particle {ju} in two chains");
                seen[ju] = true;
                prop_assert_eq!(grid.cell_of(&particles[ju].position) as usize, c);
                j = link[ju];
            }
        }
        prop_assert!(seen.iter().all(|&s| s));
    }

    /// Integration plus reflection never lets a particle leave the box.
    #[test]
    fn prop_reflected_particles_stay_inside(
        pos in position_strategy(),
        vel in [-50.0f32..50.0, -50.0f32..50.0, -50.0f32..50.0],
        acc in [-10.0f32..10.0, -10.0f32..10.0, -10.0f32..10.0],
    ) {
        let simsize = 1.0f32;
        let rc = 0.1f32;
        let mut particles = vec![Particle::<3>::at_rest(0, pos)];
        particles[0].velocity = vel;
        let acc_buf = acc.to_vec();
        for _ in 0..20 {
            integrate(1e-3, rc, &acc_buf, &mut particles);
            apply_reflect(&mut particles, simsize);
            for d in 0..3 {
                prop_assert!((0.0..=simsize).contains(&particles[0].position[d]));
            }
        }
    }

    /// One full kernel step keeps every particle inside its snapped box.
    #[test]
    fn prop_step_respects_bbox_containment(particles in particles_strategy(30)) {
        let params = SimParams {
            rc: 0.2,
            simsize: 1.0,
            dt: 1e-4,
            t0: 0.0,
            ..SimParams::default()
        };
        // enforce the generator's spacing rule so forces stay finite
        let min2 = params.sig_lj * params.sig_lj;
        let mut locals: Vec<Particle<3>> = Vec::new();
        for p in particles {
            let spaced = locals.iter().all(|q| {
                (0..3).map(|d| (q.position[d] - p.position[d]).powi(2)).sum::<f32>() >= min2
            });
            if spaced {
                locals.push(p);
            }
        }
        let mut buffers = StepBuffers::new();
        for _ in 0..3 {
            let bbox = BoundingBox::snapped(params.rc, locals.iter().map(|p| &p.position));
            compute_one_step(&mut locals, &[], &bbox, &mut buffers, &params).unwrap();
            let rebuilt = BoundingBox::snapped(params.rc, locals.iter().map(|p| &p.position));
            for p in &locals {
                prop_assert!(rebuilt.contains(&p.position));
            }
        }
    }

    /// The searched cost equals the brute-force minimum for random models.
    #[test]
    fn prop_search_is_optimal_for_random_models(
        base in prop::collection::vec(0.5f64..3.0, 1..=8),
        growth in prop::collection::vec(0.0f64..0.8, 8),
        lb_cost in 0.0f64..4.0,
    ) {
        let nframes = base.len();
        let mut runner = ModelRunner {
            npframe: 1,
            base: base.clone(),
            growth: growth[..nframes].to_vec(),
            lb_cost,
        };
        let config = SearchConfig::new(nframes as u32, 1);
        let solution = run_search(&mut runner, (), (), Probe::new(1), &config)
            .unwrap()
            .remove(0);
        let reference = ModelRunner {
            npframe: 1,
            base,
            growth: growth[..nframes].to_vec(),
            lb_cost,
        };
        let (best, _) = brute_force_best(&reference, nframes);
        prop_assert!((solution.total_cost - best).abs() < 1e-9);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Migration between two workers preserves the particle population.
    #[test]
    fn prop_migration_conserves_ownership(
        positions in prop::collection::vec(position_strategy(), 2..40),
    ) {
        let simsize = 1.0f32;
        let n = positions.len();
        let positions = std::sync::Arc::new(positions);
        let owned = run_spmd(2, |comm| {
            use minilb::exchange::migrate;
            let mut lo = BoundingBox::<3>::whole_domain(simsize);
            lo.max[0] = 0.5;
            let mut hi = BoundingBox::<3>::whole_domain(simsize);
            hi.min[0] = 0.5;
            let domains = vec![lo, hi];
            // every worker starts with an arbitrary slice of the set
            let me = comm.rank();
            let mut locals: Vec<Particle<3>> = positions
                .iter()
                .enumerate()
                .filter(|(i, _)| i % 2 == me)
                .map(|(i, pos)| Particle::at_rest(i as u64, *pos))
                .collect();
            migrate(&comm, &mut locals, &domains, simsize)?;
            for p in &locals {
                assert!(domains[me].contains(&p.position));
            }
            Ok(locals.iter().map(|p| p.gid).collect::<Vec<u64>>())
        })
        .unwrap();
        let mut gids: Vec<u64> = owned.concat();
        gids.sort_unstable();
        let expected: Vec<u64> = (0..n as u64).collect();
        prop_assert_eq!(gids, expected);
    }
}
