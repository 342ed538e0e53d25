//! Cell-linked-list force kernel and the per-step driver.
//!
//! One step is: rebuild the linked list over locals and ghosts, sweep the
//! 3ᴺ neighbour cells of every local particle accumulating Lennard-Jones
//! forces over `i < j` pairs, integrate, reflect. The pair-evaluation count
//! comes back as the step's complexity.

use once_cell::sync::Lazy;

use crate::error::{SimError, SimResult};
use crate::geometry::{BoundingBox, CellGrid, Complexity, Index, Real, EMPTY};
use crate::params::SimParams;
use crate::particle::Particle;
use crate::physics::{apply_reflect, integrate};

/// Scratch buffers reused across steps. Grow-only: capacity established in
/// early steps is kept for the rest of the run.
#[derive(Clone, Debug, Default)]
pub struct StepBuffers {
    /// First particle of each cell's chain, or `EMPTY`.
    pub head: Vec<Index>,
    /// Next particle in the same cell, or `EMPTY`.
    pub link: Vec<Index>,
    /// Acceleration accumulator, `N` lanes per local particle.
    pub acc: Vec<Real>,
}

impl StepBuffers {
    #[must_use]
    pub fn new() -> Self {
        StepBuffers::default()
    }

    fn ensure(&mut self, cells: usize, chain_len: usize, acc_len: usize) {
        if self.head.len() < cells {
            log::debug!("growing head table to {cells} cells");
            self.head.resize(cells, EMPTY);
        }
        if self.link.len() < chain_len {
            log::debug!("growing link table to {chain_len} entries");
            self.link.resize(chain_len, EMPTY);
        }
        if self.acc.len() < acc_len {
            log::debug!("growing acceleration buffer to {acc_len} lanes");
            self.acc.resize(acc_len, 0.0);
        }
    }
}

/// Rebuild the cell chains: locals first, then ghosts at indices shifted
/// past the locals so the sweep can tell them apart by range.
pub fn build_cell_list<const N: usize>(
    grid: &CellGrid<N>,
    locals: &[Particle<N>],
    ghosts: &[Particle<N>],
    head: &mut [Index],
    link: &mut [Index],
) {
    let cells = grid.total_cells() as usize;
    head[..cells].fill(EMPTY);
    for (i, p) in locals.iter().enumerate() {
        let c = grid.cell_of(&p.position) as usize;
        link[i] = head[c];
        head[c] = i as Index;
    }
    let base = locals.len();
    for (i, p) in ghosts.iter().enumerate() {
        let c = grid.cell_of(&p.position) as usize;
        link[base + i] = head[c];
        head[c] = (base + i) as Index;
    }
}

/// The Lennard-Jones interaction scalar for a squared distance.
#[inline]
#[must_use]
pub fn lj_scalar(r2: Real, eps: Real, sig2: Real) -> Real {
    debug_assert!(r2 > 0.0, "coincident pair in force sweep");
    let z = sig2 / r2;
    let z3 = z * z * z;
    24.0 * eps * (2.0 * z3 * z3 - z3) / r2
}

/// Force evaluation, specialised per dimension. The two-dimensional path is
/// deliberately unsupported and fails with `NotImplemented`.
pub trait LjForces<const N: usize> {
    /// Accumulate accelerations of the local particles and return the
    /// number of pair evaluations performed.
    fn accumulate(
        acc: &mut [Real],
        grid: &CellGrid<N>,
        locals: &[Particle<N>],
        ghosts: &[Particle<N>],
        head: &[Index],
        link: &[Index],
        eps: Real,
        sig: Real,
    ) -> SimResult<Complexity>;
}

/// Marker type carrying the per-dimension force implementations.
pub struct Lj;

static NEIGHBOUR_OFFSETS_3D: Lazy<[[Index; 3]; 27]> = Lazy::new(|| {
    let mut offsets = [[0; 3]; 27];
    let mut n = 0;
    for dz in -1..=1 {
        for dy in -1..=1 {
            for dx in -1..=1 {
                offsets[n] = [dx, dy, dz];
                n += 1;
            }
        }
    }
    offsets
});

impl LjForces<3> for Lj {
    fn accumulate(
        acc: &mut [Real],
        grid: &CellGrid<3>,
        locals: &[Particle<3>],
        ghosts: &[Particle<3>],
        head: &[Index],
        link: &[Index],
        eps: Real,
        sig: Real,
    ) -> SimResult<Complexity> {
        let sig2 = sig * sig;
        let n_local = locals.len();
        let mut cmplx: Complexity = 0;
        acc[..3 * n_local].fill(0.0);
        for (i, receiver) in locals.iter().enumerate() {
            let ic = grid.cell_coords(&receiver.position);
            for offset in NEIGHBOUR_OFFSETS_3D.iter() {
                let ic1 = [ic[0] + offset[0], ic[1] + offset[1], ic[2] + offset[2]];
                if !grid.in_range(&ic1) {
                    continue;
                }
                let mut j = head[grid.linearize(&ic1) as usize];
                while j != EMPTY {
                    let ju = j as usize;
                    if i < ju {
                        let source = if ju < n_local {
                            &locals[ju]
                        } else {
                            &ghosts[ju - n_local]
                        };
                        let mut r2 = 0.0;
                        let mut delta = [0.0; 3];
                        for d in 0..3 {
                            delta[d] = receiver.position[d] - source.position[d];
                            r2 += delta[d] * delta[d];
                        }
                        let c_lj = lj_scalar(r2, eps, sig2);
                        for d in 0..3 {
                            acc[3 * i + d] += c_lj * delta[d];
                        }
                        cmplx += 1;
                    }
                    j = link[ju];
                }
            }
        }
        Ok(cmplx)
    }
}

impl LjForces<2> for Lj {
    fn accumulate(
        _acc: &mut [Real],
        _grid: &CellGrid<2>,
        _locals: &[Particle<2>],
        _ghosts: &[Particle<2>],
        _head: &[Index],
        _link: &[Index],
        _eps: Real,
        _sig: Real,
    ) -> SimResult<Complexity> {
        Err(SimError::NotImplemented { what: "the 2d force kernel" })
    }
}

/// Advance the local particles one step and return the pair-evaluation
/// count. Ghost positions are read-only and must be the ones fetched for
/// this step.
pub fn compute_one_step<const N: usize>(
    locals: &mut [Particle<N>],
    ghosts: &[Particle<N>],
    bbox: &BoundingBox<N>,
    buffers: &mut StepBuffers,
    params: &SimParams,
) -> SimResult<Complexity>
where
    Lj: LjForces<N>,
{
    let grid = CellGrid::new(*bbox, params.rc)?;
    let chain_len = locals.len() + ghosts.len();
    buffers.ensure(grid.total_cells() as usize, chain_len, N * locals.len());
    build_cell_list(&grid, locals, ghosts, &mut buffers.head, &mut buffers.link);
    let cmplx = <Lj as LjForces<N>>::accumulate(
        &mut buffers.acc,
        &grid,
        locals,
        ghosts,
        &buffers.head,
        &buffers.link,
        params.eps_lj,
        params.sig_lj,
    )?;
    integrate(params.dt, params.rc, &buffers.acc, locals);
    apply_reflect(locals, params.simsize);
    Ok(cmplx)
}
