//! The particle value type.

use crate::geometry::Real;

/// One simulated particle.
///
/// `gid` is the stable global identifier, owned by exactly one worker at any
/// instant. `lid` is the transient dense index in the owner's array; it is
/// only meaningful between two migrations.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Particle<const N: usize> {
    pub gid: u64,
    pub lid: usize,
    pub position: [Real; N],
    pub velocity: [Real; N],
    pub acceleration: [Real; N],
}

impl<const N: usize> Particle<N> {
    /// Particle at rest at `position`.
    #[must_use]
    pub fn at_rest(gid: u64, position: [Real; N]) -> Self {
        Particle { gid, lid: 0, position, velocity: [0.0; N], acceleration: [0.0; N] }
    }
}

/// Rewrite local indices to the dense range `[0..n)`, in array order.
pub fn renumber_lids<const N: usize>(particles: &mut [Particle<N>]) {
    for (i, p) in particles.iter_mut().enumerate() {
        p.lid = i;
    }
}
