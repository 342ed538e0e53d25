//! Initial particle configurations.
//!
//! All generators run on the root worker; the initial partition and
//! migration spread the result. Placement uses rejection sampling so no two
//! particles start closer than the Lennard-Jones length scale, which keeps
//! the first force evaluations finite.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::{SimError, SimResult};
use crate::geometry::Real;
use crate::params::{InitialConf, SimParams};
use crate::particle::Particle;

/// Total placement attempts before the configuration is declared infeasible.
const MAX_TRIALS: usize = 100_000;

/// Generate the configured particle set.
pub fn generate<const N: usize>(params: &SimParams) -> SimResult<Vec<Particle<N>>> {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut particles: Vec<Particle<N>> = Vec::with_capacity(params.npart);
    let min_dist2 = params.sig_lj * params.sig_lj;

    let mut trials = 0;
    while particles.len() < params.npart {
        trials += 1;
        if trials > MAX_TRIALS {
            return Err(SimError::config(format!(
                "placed only {} of {} particles after {MAX_TRIALS} trials; \
                 the box is too dense for sig = {}",
                particles.len(),
                params.npart,
                params.sig_lj
            )));
        }
        let candidate = draw_position::<N>(&mut rng, params)?;
        let too_close = particles.iter().any(|p| {
            let mut d2 = 0.0;
            for d in 0..N {
                let delta = p.position[d] - candidate[d];
                d2 += delta * delta;
            }
            d2 < min_dist2
        });
        if too_close {
            continue;
        }
        let gid = particles.len() as u64;
        let mut particle = Particle::at_rest(gid, candidate);
        particle.lid = particles.len();
        particle.velocity = draw_velocity::<N>(&mut rng, params.t0)?;
        particles.push(particle);
    }
    Ok(particles)
}

fn draw_position<const N: usize>(rng: &mut StdRng, params: &SimParams) -> SimResult<[Real; N]> {
    let s = params.simsize;
    let mut pos = [0.0; N];
    match params.init_conf {
        InitialConf::Uniform => {
            for p in pos.iter_mut() {
                *p = rng.gen_range(0.0..s);
            }
        }
        InitialConf::HalfLoaded => {
            for (d, p) in pos.iter_mut().enumerate() {
                *p = if d == N - 1 { rng.gen_range(0.0..s / 2.0) } else { rng.gen_range(0.0..s) };
            }
        }
        InitialConf::Wall => {
            for (d, p) in pos.iter_mut().enumerate() {
                *p = if d == N - 1 { s / 2.0 } else { rng.gen_range(0.0..s) };
            }
        }
        InitialConf::Cluster => {
            // dense ball in the lower-left octant
            let center = s / 4.0;
            let spread = s / 16.0;
            let normal = Normal::new(center, spread)
                .map_err(|e| SimError::config(format!("cluster spread: {e}")))?;
            for p in pos.iter_mut() {
                *p = normal.sample(rng).clamp(0.0, s - s * 1e-3);
            }
        }
    }
    Ok(pos)
}

fn draw_velocity<const N: usize>(rng: &mut StdRng, t0: Real) -> SimResult<[Real; N]> {
    let mut vel = [0.0; N];
    if t0 > 0.0 {
        let normal =
            Normal::new(0.0, t0).map_err(|e| SimError::config(format!("temperature: {e}")))?;
        for v in vel.iter_mut() {
            *v = normal.sample(rng);
        }
    }
    Ok(vel)
}
