//! Bounding-box math and the uniform cell grid.
//!
//! Positions are `f32` and wall times are `f64` throughout the crate; cell
//! and particle indices share one signed integer type so a linked-list slot
//! can hold the `EMPTY` sentinel.

use crate::error::{SimError, SimResult};

/// Spatial coordinate type.
pub type Real = f32;
/// Wall-clock measurement type.
pub type Time = f64;
/// Cell / linked-list index type.
pub type Index = i64;
/// Pair-evaluation counter type.
pub type Complexity = i64;
/// Worker rank.
pub type Rank = usize;

/// Sentinel for an empty linked-list slot.
pub const EMPTY: Index = -1;

/// Axis-aligned box, also used for the partitioner's published domains.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox<const N: usize> {
    pub min: [Real; N],
    pub max: [Real; N],
}

impl<const N: usize> BoundingBox<N> {
    /// Box spanning the whole simulation domain `[0, simsize)` per axis.
    #[must_use]
    pub fn whole_domain(simsize: Real) -> Self {
        BoundingBox { min: [0.0; N], max: [simsize; N] }
    }

    /// Tight box around `positions`, snapped outward to the cell grid.
    ///
    /// Snap rule per axis: `min <- max(0, floor(min/rc)*rc - 2*rc)` and
    /// `max <- ceil(max/rc)*rc + 2*rc`, leaving a two-cell halo and sides
    /// that are integral multiples of `rc`. An empty input yields the
    /// two-cell box at the origin.
    #[must_use]
    pub fn snapped<'a, I>(rc: Real, positions: I) -> Self
    where
        I: IntoIterator<Item = &'a [Real; N]>,
    {
        let mut min = [Real::MAX; N];
        let mut max = [Real::MIN; N];
        let mut any = false;
        for pos in positions {
            any = true;
            for d in 0..N {
                min[d] = min[d].min(pos[d]);
                max[d] = max[d].max(pos[d]);
            }
        }
        if !any {
            min = [0.0; N];
            max = [0.0; N];
        }
        for d in 0..N {
            min[d] = ((min[d] / rc).floor() * rc - 2.0 * rc).max(0.0);
            max[d] = (max[d] / rc).ceil() * rc + 2.0 * rc;
        }
        BoundingBox { min, max }
    }

    /// Side length along axis `d`.
    #[inline]
    #[must_use]
    pub fn side(&self, d: usize) -> Real {
        self.max[d] - self.min[d]
    }

    /// Half-open containment test.
    #[inline]
    #[must_use]
    pub fn contains(&self, pos: &[Real; N]) -> bool {
        (0..N).all(|d| self.min[d] <= pos[d] && pos[d] < self.max[d])
    }

    /// Box grown by `margin` on every face.
    #[must_use]
    pub fn inflated(&self, margin: Real) -> Self {
        let mut out = *self;
        for d in 0..N {
            out.min[d] -= margin;
            out.max[d] += margin;
        }
        out
    }

    /// Closed-interval overlap test.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        (0..N).all(|d| self.min[d] <= other.max[d] && other.min[d] <= self.max[d])
    }
}

/// Per-worker cell grid tiling a snapped bounding box with cells of edge `rc`.
#[derive(Clone, Copy, Debug)]
pub struct CellGrid<const N: usize> {
    pub bbox: BoundingBox<N>,
    pub rc: Real,
    counts: [Index; N],
}

impl<const N: usize> CellGrid<N> {
    /// Build the grid of a snapped box. Counts are positive by construction.
    pub fn new(bbox: BoundingBox<N>, rc: Real) -> SimResult<Self> {
        let mut counts = [0; N];
        for d in 0..N {
            // Sides are integral multiples of rc; round compensates the
            // float division.
            counts[d] = (bbox.side(d) / rc).round() as Index;
            if counts[d] <= 0 {
                return Err(SimError::invariant(format!(
                    "cell grid axis {d} has non-positive cell count {}",
                    counts[d]
                )));
            }
        }
        Ok(CellGrid { bbox, rc, counts })
    }

    /// Number of cells along each axis.
    #[inline]
    #[must_use]
    pub fn cells_per_axis(&self) -> [Index; N] {
        self.counts
    }

    /// Total number of cells.
    #[must_use]
    pub fn total_cells(&self) -> Index {
        self.counts.iter().product()
    }

    /// Per-axis cell coordinate of a contained position.
    #[inline]
    #[must_use]
    pub fn cell_coords(&self, pos: &[Real; N]) -> [Index; N] {
        let mut ic = [0; N];
        for d in 0..N {
            let c = ((pos[d] - self.bbox.min[d]) / self.rc).floor() as Index;
            ic[d] = c.clamp(0, self.counts[d] - 1);
        }
        ic
    }

    /// Linear row-major cell index, x fastest.
    #[inline]
    #[must_use]
    pub fn cell_of(&self, pos: &[Real; N]) -> Index {
        self.linearize(&self.cell_coords(pos))
    }

    /// Linearize per-axis coordinates; caller guarantees they are in range.
    #[inline]
    #[must_use]
    pub fn linearize(&self, ic: &[Index; N]) -> Index {
        let mut idx = 0;
        let mut stride = 1;
        for d in 0..N {
            idx += ic[d] * stride;
            stride *= self.counts[d];
        }
        idx
    }

    /// Inverse of [`linearize`](Self::linearize).
    #[must_use]
    pub fn delinearize(&self, mut idx: Index) -> [Index; N] {
        let mut ic = [0; N];
        for d in 0..N {
            ic[d] = idx % self.counts[d];
            idx /= self.counts[d];
        }
        ic
    }

    /// World-coordinate box of one cell.
    #[must_use]
    pub fn cell_box(&self, idx: Index) -> BoundingBox<N> {
        let ic = self.delinearize(idx);
        let mut min = [0.0; N];
        let mut max = [0.0; N];
        for d in 0..N {
            min[d] = self.bbox.min[d] + ic[d] as Real * self.rc;
            max[d] = min[d] + self.rc;
        }
        BoundingBox { min, max }
    }

    /// True when the per-axis coordinates fall inside the grid.
    #[inline]
    #[must_use]
    pub fn in_range(&self, ic: &[Index; N]) -> bool {
        (0..N).all(|d| ic[d] >= 0 && ic[d] < self.counts[d])
    }
}
