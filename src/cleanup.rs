//! Post-run cleanup of intermediate workflow files.
//!
//! A workflow that needed several iterations leaves a trail of
//! `*_iterN.ph.in` / `*_iterN.ph.out` files behind. Once the run has
//! converged those are only of forensic interest, and on shared scratch
//! space they add up. Cleanup removes the intermediate ones; the files of
//! the final, successful iteration are always kept, as is the parent
//! scratch, which cleanup never goes near.
//!
//! Behavior is controlled by the `[cleanup]` settings section; outputs can
//! be preserved while inputs are dropped, and a dry run reports what would
//! go without touching anything.

use crate::naming::FileNaming;
use crate::settings::CleanupSettings;
use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What a cleanup pass did (or, for a dry run, would do).
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Files removed, or slated for removal in a dry run
    pub removed: Vec<PathBuf>,
}

/// Removes intermediate iteration files below `final_iteration`.
///
/// Missing files are fine: an earlier cleanup or the user may have removed
/// them already. Returns the report of what was removed.
pub fn cleanup_iterations(
    workdir: &Path,
    naming: &FileNaming,
    final_iteration: usize,
    settings: &CleanupSettings,
    dry_run: bool,
) -> io::Result<CleanupReport> {
    let mut report = CleanupReport::default();

    if !settings.enabled {
        debug!("cleanup disabled, keeping all iteration files");
        return Ok(report);
    }

    for iteration in 1..final_iteration {
        let mut doomed = vec![workdir.join(naming.iteration_input(iteration))];
        if !settings.keep_outputs {
            doomed.push(workdir.join(naming.iteration_output(iteration)));
        }
        for path in doomed {
            if !path.is_file() {
                continue;
            }
            if dry_run {
                debug!("would remove {}", path.display());
            } else {
                fs::remove_file(&path)?;
                debug!("removed {}", path.display());
            }
            report.removed.push(path);
        }
    }

    if !report.removed.is_empty() {
        info!(
            "{} {} intermediate file(s)",
            if dry_run { "would remove" } else { "removed" },
            report.removed.len()
        );
    }

    Ok(report)
}
