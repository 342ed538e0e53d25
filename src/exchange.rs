//! Ghost exchange and ownership migration.
//!
//! Both operations are collective: every worker posts one (possibly empty)
//! buffer to every peer and drains one from every peer, so no pairing logic
//! is needed and arrival order cannot deadlock the group.

use std::collections::HashMap;

use crate::error::{SimError, SimResult};
use crate::geometry::{BoundingBox, CellGrid, Index, Rank, Real};
use crate::particle::{renumber_lids, Particle};
use crate::partition::owner_of_position;
use crate::transport::{tags, Communicator, ReduceOp};

/// Cells on the rim of a worker's grid together with the peers whose
/// domains reach into them.
#[derive(Clone, Debug, Default)]
pub struct Borders {
    /// Map from cell index to the peers interested in it.
    cells: HashMap<Index, Vec<Rank>>,
}

impl Borders {
    #[must_use]
    pub fn peers_of(&self, cell: Index) -> Option<&[Rank]> {
        self.cells.get(&cell).map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Discover the border cells of `grid` against the published domains: a
/// cell is a border cell for peer `p` when the cell box, grown by `rc`,
/// reaches into `p`'s domain.
#[must_use]
pub fn find_border_cells<const N: usize>(
    grid: &CellGrid<N>,
    domains: &[BoundingBox<N>],
    me: Rank,
) -> Borders {
    let mut cells = HashMap::new();
    for cell in 0..grid.total_cells() {
        let reach = grid.cell_box(cell).inflated(grid.rc);
        let peers: Vec<Rank> = domains
            .iter()
            .enumerate()
            .filter(|(rank, dom)| *rank != me && reach.intersects(dom))
            .map(|(rank, _)| rank)
            .collect();
        if !peers.is_empty() {
            cells.insert(cell, peers);
        }
    }
    Borders { cells }
}

/// Fetch the ghost replicas this worker needs for one step.
///
/// Every local particle sitting in a border cell is posted to each peer
/// listed for that cell; the union of what the peers post back is the ghost
/// array, concatenated in rank order so positions stay stable for the
/// duration of the step.
pub fn exchange_ghosts<const N: usize, C: Communicator>(
    comm: &C,
    locals: &[Particle<N>],
    grid: &CellGrid<N>,
    borders: &Borders,
) -> SimResult<Vec<Particle<N>>> {
    let size = comm.size();
    let me = comm.rank();
    let mut outgoing: Vec<Vec<Particle<N>>> = vec![Vec::new(); size];
    for p in locals {
        if let Some(peers) = borders.peers_of(grid.cell_of(&p.position)) {
            for &peer in peers {
                outgoing[peer].push(*p);
            }
        }
    }
    for (dest, buf) in outgoing.into_iter().enumerate() {
        if dest != me {
            comm.send(dest, tags::GHOST, buf)?;
        }
    }
    let mut ghosts = Vec::new();
    for src in 0..size {
        if src != me {
            ghosts.extend(comm.recv::<Particle<N>>(src, tags::GHOST)?);
        }
    }
    Ok(ghosts)
}

/// Compute where each misplaced local particle has to go. A particle
/// outside every published domain is an invariant violation.
pub fn route_exports<const N: usize>(
    locals: &[Particle<N>],
    domains: &[BoundingBox<N>],
    me: Rank,
    simsize: Real,
) -> SimResult<Vec<(usize, Rank)>> {
    let mut exports = Vec::new();
    for (idx, p) in locals.iter().enumerate() {
        match owner_of_position(domains, &p.position, simsize) {
            Some(owner) if owner != me => exports.push((idx, owner)),
            Some(_) => {}
            None => {
                return Err(SimError::invariant(format!(
                    "particle {} at {:?} lies outside every domain",
                    p.gid, p.position
                )))
            }
        }
    }
    Ok(exports)
}

/// Execute a precomputed export list: ship the listed particles, absorb
/// what the peers ship here, and renumber local indices densely.
pub fn migrate_by<const N: usize, C: Communicator>(
    comm: &C,
    locals: &mut Vec<Particle<N>>,
    exports: &[(usize, Rank)],
) -> SimResult<()> {
    let size = comm.size();
    let me = comm.rank();
    let mut outgoing: Vec<Vec<Particle<N>>> = vec![Vec::new(); size];
    let mut leaving = vec![false; locals.len()];
    for &(idx, dest) in exports {
        outgoing[dest].push(locals[idx]);
        leaving[idx] = true;
    }
    for (dest, buf) in outgoing.into_iter().enumerate() {
        if dest != me {
            comm.send(dest, tags::MIGRATE, buf)?;
        }
    }
    let mut keep_idx = 0;
    locals.retain(|_| {
        let keep = !leaving[keep_idx];
        keep_idx += 1;
        keep
    });
    for src in 0..size {
        if src != me {
            locals.extend(comm.recv::<Particle<N>>(src, tags::MIGRATE)?);
        }
    }
    renumber_lids(locals);
    Ok(())
}

/// Route every drifted particle to its owner under the published domains.
///
/// Routing failures are agreed on collectively first so that no worker is
/// left blocking on a peer that already aborted.
pub fn migrate<const N: usize, C: Communicator>(
    comm: &C,
    locals: &mut Vec<Particle<N>>,
    domains: &[BoundingBox<N>],
    simsize: Real,
) -> SimResult<()> {
    let routed = route_exports(locals, domains, comm.rank(), simsize);
    let failed = comm.all_reduce_count(i64::from(routed.is_err()), ReduceOp::Max)?;
    let exports = match routed {
        Ok(exports) if failed == 0 => exports,
        Ok(_) => {
            return Err(SimError::invariant(
                "a peer holds a particle outside every domain",
            ))
        }
        Err(e) => return Err(e),
    };
    migrate_by(comm, locals, &exports)
}
