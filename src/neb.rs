//! NEB restart workflow.
//!
//! A `neb.x` path optimization that ran out of its CPU-time budget can be
//! resubmitted with `restart_mode = 'restart'` and continue from the path it
//! already relaxed. This module implements that one-shot restart: verify the
//! parent calculation really stopped on the time limit, patch its input, and
//! either submit it or stage it for inspection (a test submission writes the
//! restart input into a `submit_test/` subdirectory and touches nothing
//! else).
//!
//! Only a walltime stop qualifies. A parent that succeeded has nothing to
//! restart; a parent that failed for any other reason needs a human, not a
//! resubmission.

use crate::config::QeCode;
use crate::namelist::{NamelistError, NamelistFile, Value};
use crate::naming::FileNaming;
use crate::qe::{NebInterface, QeError, QeInterface};
use crate::report::{self, CalcReport, WARNING_MAX_CPU_TIME};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for the NEB restart workflow.
#[derive(Error, Debug)]
pub enum NebError {
    /// I/O failure while inspecting or writing files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The directory does not hold a neb.x calculation
    #[error("parent calculation should be a neb.x calculation: {0}")]
    NotNeb(String),
    /// The parent is not in the one state a restart makes sense for
    #[error("parent calculation did not fail or did not stop because of maximum CPU time limit")]
    NotRestartable,
    /// The parent input could not be parsed
    #[error("parent input is not a valid namelist file: {0}")]
    Namelist(#[from] NamelistError),
    /// Launching the restart failed
    #[error(transparent)]
    Qe(#[from] QeError),
}

/// A verified, restartable parent calculation.
#[derive(Debug)]
pub struct NebParent {
    /// Directory the parent ran in
    pub dir: PathBuf,
    /// The parent's input file
    pub input_path: PathBuf,
    /// The parent's captured output
    pub output_path: PathBuf,
    /// Parsed parent input
    pub input: NamelistFile,
    /// Scan of the parent output
    pub report: CalcReport,
}

impl NebParent {
    /// Stem the restart file names derive from.
    fn stem(&self) -> &str {
        self.input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("neb")
    }
}

/// Locates and verifies the parent calculation in `dir`.
///
/// The parent must be a neb.x calculation (an input carrying a `&PATH`
/// namelist, with its output next to it), must not have ended successfully,
/// and must have stopped on the CPU-time limit. Anything else is an error
/// spelling out which expectation failed.
pub fn check_parent(dir: &Path) -> Result<NebParent, NebError> {
    let input_path = find_neb_input(dir)?;
    let input = NamelistFile::parse(&fs::read_to_string(&input_path)?)?;
    if input.namelist("PATH").is_none() {
        return Err(NebError::NotNeb(format!(
            "'{}' has no &PATH namelist",
            input_path.display()
        )));
    }

    let output_path = sibling_output(&input_path);
    if !output_path.is_file() {
        return Err(NebError::NotNeb(format!(
            "no output '{}' next to the input",
            output_path.display()
        )));
    }

    let report = report::scan_output(&fs::read_to_string(&output_path)?, QeCode::Neb);
    if report.is_successful() || !report.has_warning(WARNING_MAX_CPU_TIME) {
        return Err(NebError::NotRestartable);
    }

    Ok(NebParent {
        dir: dir.to_path_buf(),
        input_path,
        output_path,
        input,
        report,
    })
}

/// Builds the restart input: the parent input with `restart_mode` forced to
/// `'restart'`.
pub fn create_restart(parent: &NebParent) -> NamelistFile {
    let mut restart = parent.input.clone();
    restart
        .get_or_insert_mut("PATH")
        .set("restart_mode", Value::Str("restart".to_string()));
    restart
}

/// Stages a test submission: writes the restart input under
/// `submit_test/` and returns its path without launching anything.
pub fn submit_test(parent: &NebParent, restart: &NamelistFile) -> Result<PathBuf, NebError> {
    let test_dir = parent.dir.join("submit_test");
    fs::create_dir_all(&test_dir)?;
    let path = test_dir.join(FileNaming::neb_restart_input(parent.stem()));
    fs::write(&path, restart.render())?;
    info!("staged test submission at {}", path.display());
    Ok(path)
}

/// Submits the restart for real: writes the input next to the parent's,
/// launches `neb.x`, and scans the output.
pub fn submit(
    parent: &NebParent,
    restart: &NamelistFile,
    interface: &NebInterface,
) -> Result<(PathBuf, CalcReport), NebError> {
    let input_path = parent.dir.join(FileNaming::neb_restart_input(parent.stem()));
    let output_path = parent
        .dir
        .join(FileNaming::neb_restart_output(parent.stem()));

    interface.write_input(restart, &input_path)?;
    info!(
        "submitting NebCalculation restart from '{}'",
        parent.input_path.display()
    );
    interface.run_calculation(&input_path, &output_path)?;
    let report = interface.read_output(&output_path)?;
    Ok((output_path, report))
}

/// Picks the parent input file: `neb.dat` when present, otherwise the first
/// `.in` file (sorted, for determinism).
fn find_neb_input(dir: &Path) -> Result<PathBuf, NebError> {
    let canonical = dir.join("neb.dat");
    if canonical.is_file() {
        return Ok(canonical);
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "in"))
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        NebError::NotNeb(format!("no neb.dat or *.in input found in '{}'", dir.display()))
    })
}

fn sibling_output(input_path: &Path) -> PathBuf {
    input_path.with_extension("out")
}
