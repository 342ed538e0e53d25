//! Simulation parameters and their validation.

use std::fmt;

use crate::error::{SimError, SimResult};
use crate::geometry::Real;

/// Initial particle distribution selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InitialConf {
    /// Uniformly random over the whole box.
    Uniform,
    /// All particles in the lower half of the box.
    HalfLoaded,
    /// A thin wall of particles across the box.
    Wall,
    /// One dense spherical cluster in the lower-left octant.
    Cluster,
}

impl InitialConf {
    /// Map the numeric CLI selector onto a configuration.
    pub fn from_index(idx: u32) -> SimResult<Self> {
        match idx {
            1 => Ok(InitialConf::Uniform),
            2 => Ok(InitialConf::HalfLoaded),
            3 => Ok(InitialConf::Wall),
            4 => Ok(InitialConf::Cluster),
            other => Err(SimError::config(format!(
                "unknown particle distribution {other} (expected 1..=4)"
            ))),
        }
    }
}

/// Everything a run needs to know, filled in by the binary's CLI layer.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimParams {
    /// Total particle count across all workers.
    pub npart: usize,
    /// Number of frames; one frame is the decision batch of the search.
    pub nframes: u32,
    /// Steps per frame.
    pub npframe: u32,
    /// Integration time step.
    pub dt: Real,
    /// Lennard-Jones well depth.
    pub eps_lj: Real,
    /// Lennard-Jones length scale.
    pub sig_lj: Real,
    /// Gravitational strength; banner-only, the force law is pure LJ.
    pub gravity: Real,
    /// Initial temperature scaling the velocity draw.
    pub t0: Real,
    /// Side length of the cubic simulation domain.
    pub simsize: Real,
    /// Cut-off radius; also the cell edge of the linked-list grid.
    pub rc: Real,
    /// Seed for every RNG in the run.
    pub seed: u64,
    /// Gather and record particle frames on the root.
    pub record: bool,
    /// Iteration of the single forced rebalance, if any.
    pub one_shot_lb_call: Option<u32>,
    /// Period of the periodic comparison policy.
    pub lb_interval: u32,
    /// How many optimal paths the search should return.
    pub nb_best_path: usize,
    /// Initial particle distribution.
    pub init_conf: InitialConf,
    /// Number of SPMD workers.
    pub world_size: usize,
}

impl SimParams {
    /// Total number of iterations, the decision horizon of the search.
    #[must_use]
    pub fn horizon(&self) -> i64 {
        i64::from(self.nframes) * i64::from(self.npframe)
    }

    /// Reject parameter combinations the core cannot run.
    pub fn validate(&self) -> SimResult<()> {
        if self.npart == 0 {
            return Err(SimError::config("nparticles must be positive"));
        }
        if self.nframes == 0 || self.npframe == 0 {
            return Err(SimError::config("nframes and npframe must be positive"));
        }
        if !(self.dt > 0.0) {
            return Err(SimError::config("dt must be positive"));
        }
        if !(self.rc > 0.0) {
            return Err(SimError::config("rc must be positive"));
        }
        if !(self.simsize > 0.0) {
            return Err(SimError::config("simsize must be positive"));
        }
        if self.sig_lj <= 0.0 {
            return Err(SimError::config("sig must be positive"));
        }
        if self.t0 < 0.0 {
            return Err(SimError::config("temperature must be non-negative"));
        }
        if self.world_size == 0 || !self.world_size.is_power_of_two() {
            return Err(SimError::config(format!(
                "workers must be a positive power of two, got {}",
                self.world_size
            )));
        }
        if self.nb_best_path == 0 {
            return Err(SimError::config("nb_best_path must be at least 1"));
        }
        Ok(())
    }
}

impl Default for SimParams {
    fn default() -> Self {
        SimParams {
            npart: 500,
            nframes: 100,
            npframe: 100,
            dt: 1e-4,
            eps_lj: 1.0,
            sig_lj: 1e-2,
            gravity: 1.0,
            t0: 1.0,
            simsize: 1.0,
            rc: 3.5e-2,
            seed: 0,
            record: false,
            one_shot_lb_call: None,
            lb_interval: 25,
            nb_best_path: 1,
            init_conf: InitialConf::Uniform,
            world_size: 1,
        }
    }
}

impl fmt::Display for SimParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==============================================")?;
        writeln!(f, "= Parameters:")?;
        writeln!(f, "= Particles: {}", self.npart)?;
        writeln!(f, "= Seed: {}", self.seed)?;
        writeln!(f, "= PEs: {}", self.world_size)?;
        writeln!(f, "= Simulation size: {}", self.simsize)?;
        writeln!(f, "= Number of time-steps: {}x{}", self.nframes, self.npframe)?;
        writeln!(f, "= SIG: {}", self.sig_lj)?;
        writeln!(f, "= EPS: {}", self.eps_lj)?;
        writeln!(f, "= Cut-off radius: {}", self.rc)?;
        writeln!(f, "= Gravity: {}", self.gravity)?;
        writeln!(f, "= Temperature: {}", self.t0)?;
        write!(f, "==============================================")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(SimParams::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_workers() {
        let params = SimParams { world_size: 3, ..SimParams::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_geometry() {
        let params = SimParams { rc: 0.0, ..SimParams::default() };
        assert!(params.validate().is_err());
        let params = SimParams { dt: -1.0, ..SimParams::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn init_conf_selector_bounds() {
        assert_eq!(InitialConf::from_index(4).unwrap(), InitialConf::Cluster);
        assert!(InitialConf::from_index(0).is_err());
        assert!(InitialConf::from_index(7).is_err());
    }

    #[test]
    fn horizon_is_frames_times_steps() {
        let params = SimParams { nframes: 40, npframe: 25, ..SimParams::default() };
        assert_eq!(params.horizon(), 1000);
    }
}
