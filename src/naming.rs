//! Dynamic file naming based on the job file basename.
//!
//! Every file a workflow writes (per-iteration inputs and outputs, the
//! checkpoint) is prefixed with the basename of the job file, so several
//! jobs can share a directory without clobbering each other.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use oqrun::naming::FileNaming;
//!
//! let naming = FileNaming::new(Path::new("graphene_gamma.inp"));
//! assert_eq!(naming.iteration_input(3), "graphene_gamma_iter3.ph.in");
//! assert_eq!(naming.checkpoint(), "graphene_gamma.chk.json");
//! ```

use std::path::Path;

/// Generates workflow file names from a job file basename.
#[derive(Debug, Clone)]
pub struct FileNaming {
    basename: String,
}

impl FileNaming {
    /// Creates a naming scheme from the job file path; the file stem becomes
    /// the prefix of every generated name.
    pub fn new(job_path: &Path) -> Self {
        let basename = job_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("oqrun_job")
            .to_string();
        Self { basename }
    }

    /// The extracted basename.
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Input file name for iteration `n` (1-based).
    pub fn iteration_input(&self, n: usize) -> String {
        format!("{}_iter{}.ph.in", self.basename, n)
    }

    /// Output file name for iteration `n` (1-based).
    pub fn iteration_output(&self, n: usize) -> String {
        format!("{}_iter{}.ph.out", self.basename, n)
    }

    /// Checkpoint file name for the workflow.
    pub fn checkpoint(&self) -> String {
        format!("{}.chk.json", self.basename)
    }

    /// Restart input name derived from a NEB parent input stem.
    pub fn neb_restart_input(parent_stem: &str) -> String {
        format!("{}_restart.in", parent_stem)
    }

    /// Restart output name derived from a NEB parent input stem.
    pub fn neb_restart_output(parent_stem: &str) -> String {
        format!("{}_restart.out", parent_stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_from_the_job_stem() {
        let naming = FileNaming::new(Path::new("runs/mgb2_q.inp"));
        assert_eq!(naming.basename(), "mgb2_q");
        assert_eq!(naming.iteration_input(1), "mgb2_q_iter1.ph.in");
        assert_eq!(naming.iteration_output(2), "mgb2_q_iter2.ph.out");
        assert_eq!(naming.checkpoint(), "mgb2_q.chk.json");
    }

    #[test]
    fn neb_names_derive_from_the_parent_stem() {
        assert_eq!(FileNaming::neb_restart_input("co_diff"), "co_diff_restart.in");
        assert_eq!(FileNaming::neb_restart_output("co_diff"), "co_diff_restart.out");
    }
}
