//! Job configuration structures.
//!
//! A job file (see [`crate::parser`]) is parsed into a [`JobConfig`] plus the
//! namelist overrides and q-points it carries. Values the user leaves out are
//! resolved against the layered settings (see [`crate::settings`]) when the
//! workflow is assembled, so the job file only has to name what deviates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which Quantum ESPRESSO executable a workflow drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QeCode {
    /// `ph.x`, the phonon/perturbation code
    Ph,
    /// `neb.x`, the nudged-elastic-band code
    Neb,
}

impl QeCode {
    /// Short lowercase label used in messages and file names.
    pub fn label(&self) -> &'static str {
        match self {
            QeCode::Ph => "ph",
            QeCode::Neb => "neb",
        }
    }
}

impl fmt::Display for QeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Factors the error handlers fall back on when the failed calculation does
/// not pin down a value itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    /// Fraction of the wall limit handed to `max_seconds` so the binary can
    /// stop and write its recover files before being killed
    pub delta_factor_max_seconds: f64,
    /// `alpha_mix(1)` assumed when the input never set one (the QE default)
    pub alpha_mix: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            delta_factor_max_seconds: 0.95,
            alpha_mix: 0.70,
        }
    }
}

/// Scheduler-style resource options for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Wall-clock budget for a single submission, in seconds
    pub max_wallclock_seconds: u64,
}

impl Default for JobOptions {
    fn default() -> Self {
        // half an hour per attempt unless the job or settings say otherwise
        Self {
            max_wallclock_seconds: 1800,
        }
    }
}

/// Per-job configuration read from the job file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// The pw.x `prefix` the phonon run attaches to
    pub prefix: String,
    /// Scratch directory of the parent pw.x calculation; `ph.x` runs with its
    /// `outdir` pointed here
    pub parent_dir: PathBuf,
    /// Retry ceiling override; `None` defers to settings
    pub max_iterations: Option<usize>,
    /// Wall-clock budget override; `None` defers to settings
    pub max_wallclock_seconds: Option<u64>,
    /// Command override for the phonon executable (e.g. `mpirun -np 4 ph.x`)
    pub ph_command: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            prefix: "pwscf".to_string(),
            parent_dir: PathBuf::from("./out"),
            max_iterations: None,
            max_wallclock_seconds: None,
            ph_command: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_restart_policy() {
        let d = Defaults::default();
        assert_eq!(d.delta_factor_max_seconds, 0.95);
        assert_eq!(d.alpha_mix, 0.70);
    }

    #[test]
    fn code_labels() {
        assert_eq!(QeCode::Ph.to_string(), "ph");
        assert_eq!(QeCode::Neb.label(), "neb");
    }
}
