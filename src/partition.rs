//! The partitioner contract and a recursive coordinate bisection realisation.
//!
//! The core never looks inside a partitioner; it only asks for a new
//! partition, for the published box of a part, and for copies of the opaque
//! state when the search branches. Copy-on-branch is `Clone`, teardown is
//! `Drop`.

use crate::error::{SimError, SimResult};
use crate::geometry::{BoundingBox, Rank, Real};
use crate::particle::Particle;
use crate::transport::{tags, Communicator, ReduceOp};

/// Outcome of one partitioner invocation.
#[derive(Clone, Debug)]
pub struct PartitionUpdate {
    /// True when any published box moved.
    pub changes: bool,
    /// Local particles now owned elsewhere: (local index, destination).
    pub exports: Vec<(usize, Rank)>,
}

/// Operations the core requires from a geometric partitioner.
pub trait Partitioner<const N: usize>: Clone {
    /// Recompute the partition from the current particle distribution.
    /// Collective: every worker calls it with its local particles.
    fn partition<C: Communicator>(
        &mut self,
        comm: &C,
        particles: &[Particle<N>],
    ) -> SimResult<PartitionUpdate>;

    /// Published axis-aligned box of one part.
    fn query_box(&self, part: Rank) -> BoundingBox<N>;

    /// All published boxes, indexed by rank.
    fn domains(&self) -> &[BoundingBox<N>];

    /// Owner of a position under the published boxes, if any.
    fn owner_of(&self, pos: &[Real; N]) -> Option<Rank>;
}

/// Find the owner of `pos` among half-open domain boxes. The top faces of
/// the outermost boxes are treated as closed so a particle reflected onto
/// the wall still has an owner.
#[must_use]
pub fn owner_of_position<const N: usize>(
    domains: &[BoundingBox<N>],
    pos: &[Real; N],
    simsize: Real,
) -> Option<Rank> {
    domains.iter().position(|dom| {
        (0..N).all(|d| {
            let upper_wall = dom.max[d] >= simsize;
            dom.min[d] <= pos[d] && (pos[d] < dom.max[d] || (upper_wall && pos[d] <= dom.max[d]))
        })
    })
}

/// Recursive coordinate bisection over the whole particle set.
///
/// Particles are gathered on the root, split at per-axis medians down to
/// `log2(P)` levels, and the resulting boxes are published to every worker.
#[derive(Clone, Debug)]
pub struct RcbPartitioner<const N: usize> {
    simsize: Real,
    domains: Vec<BoundingBox<N>>,
}

impl<const N: usize> RcbPartitioner<N> {
    /// Fresh partitioner publishing the whole domain for every part.
    pub fn new(world_size: usize, simsize: Real) -> SimResult<Self> {
        if world_size == 0 || !world_size.is_power_of_two() {
            return Err(SimError::config(format!(
                "recursive bisection needs a power-of-two worker count, got {world_size}"
            )));
        }
        Ok(RcbPartitioner {
            simsize,
            domains: vec![BoundingBox::whole_domain(simsize); world_size],
        })
    }

    /// Median bisection of the gathered particle set, run on the root.
    fn bisect_all(&self, mut all: Vec<Particle<N>>) -> Vec<BoundingBox<N>> {
        let levels = self.domains.len().trailing_zeros();
        let whole = BoundingBox::whole_domain(self.simsize);
        let mut regions: Vec<(BoundingBox<N>, Vec<Particle<N>>)> = vec![(whole, std::mem::take(&mut all))];
        for level in 0..levels {
            let dim = (level as usize) % N;
            let mut next = Vec::with_capacity(regions.len() * 2);
            for (domain, mut points) in regions {
                points.sort_by(|a, b| {
                    a.position[dim]
                        .partial_cmp(&b.position[dim])
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let cut = if points.is_empty() {
                    0.5 * (domain.min[dim] + domain.max[dim])
                } else {
                    points[points.len() / 2].position[dim]
                };
                let right_points = points.split_off(points.len() / 2);
                let mut left = domain;
                left.max[dim] = cut;
                let mut right = domain;
                right.min[dim] = cut;
                next.push((left, points));
                next.push((right, right_points));
            }
            regions = next;
        }
        regions.into_iter().map(|(domain, _)| domain).collect()
    }
}

impl<const N: usize> Partitioner<N> for RcbPartitioner<N> {
    fn partition<C: Communicator>(
        &mut self,
        comm: &C,
        particles: &[Particle<N>],
    ) -> SimResult<PartitionUpdate> {
        let root = 0;
        let gathered = comm.gather(particles.to_vec(), root)?;
        let new_domains = if let Some(all) = gathered {
            let domains = self.bisect_all(all);
            for dest in 0..comm.size() {
                if dest != root {
                    comm.send(dest, tags::DOMAINS, domains.clone())?;
                }
            }
            domains
        } else {
            comm.recv::<BoundingBox<N>>(root, tags::DOMAINS)?
        };

        let changes = new_domains != self.domains;
        self.domains = new_domains;

        let me = comm.rank();
        let mut exports = Vec::new();
        let mut lost = 0i64;
        for (idx, p) in particles.iter().enumerate() {
            match self.owner_of(&p.position) {
                Some(owner) if owner != me => exports.push((idx, owner)),
                Some(_) => {}
                None => lost += 1,
            }
        }
        // agree on failure so no worker is left waiting in a collective
        let lost_total = comm.all_reduce_count(lost, ReduceOp::Sum)?;
        if lost_total > 0 {
            return Err(SimError::invariant(format!(
                "{lost_total} particle(s) lie outside every published domain"
            )));
        }
        Ok(PartitionUpdate { changes, exports })
    }

    fn query_box(&self, part: Rank) -> BoundingBox<N> {
        self.domains[part]
    }

    fn domains(&self) -> &[BoundingBox<N>] {
        &self.domains
    }

    fn owner_of(&self, pos: &[Real; N]) -> Option<Rank> {
        owner_of_position(&self.domains, pos, self.simsize)
    }
}
