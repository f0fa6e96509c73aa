//! Quantum ESPRESSO program interfaces.
//!
//! This module owns every direct contact with the external binaries: writing
//! their input files, launching them, and reading their output back into a
//! [`CalcReport`]. The [`QeInterface`] trait is the seam the restart runner
//! works against, which is also what lets the tests drive the whole loop
//! with a scripted fake instead of a real `ph.x`.
//!
//! A non-zero exit status is deliberately *not* an error here: QE binaries
//! exit non-zero for recoverable stops too, and the output scan, not the
//! exit code, decides what happened.

use crate::config::QeCode;
use crate::namelist::NamelistFile;
use crate::report::{self, CalcReport};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Error type for program interface operations.
#[derive(Error, Debug)]
pub enum QeError {
    /// File system or I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The executable could not be launched
    #[error("QE execution failed: {0}")]
    Execution(String),
}

/// Type alias for interface operation results
type Result<T> = std::result::Result<T, QeError>;

/// Contract between the workflows and one QE executable.
pub trait QeInterface {
    /// Which code this interface drives.
    fn code(&self) -> QeCode;

    /// Writes the rendered input file.
    fn write_input(&self, input: &NamelistFile, path: &Path) -> Result<()>;

    /// Launches the executable on `input_path`, capturing stdout into
    /// `output_path`. Returns once the process has exited.
    fn run_calculation(&self, input_path: &Path, output_path: &Path) -> Result<()>;

    /// Scans the output file into a report.
    fn read_output(&self, output_path: &Path) -> Result<CalcReport>;
}

/// Interface to `ph.x`.
pub struct PhInterface {
    /// Command used to launch the code; may carry a launcher prefix such as
    /// `mpirun -np 4 ph.x`
    pub command: String,
}

impl PhInterface {
    /// Creates an interface launching `command`.
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

impl QeInterface for PhInterface {
    fn code(&self) -> QeCode {
        QeCode::Ph
    }

    fn write_input(&self, input: &NamelistFile, path: &Path) -> Result<()> {
        write_input_file(input, path)
    }

    fn run_calculation(&self, input_path: &Path, output_path: &Path) -> Result<()> {
        run_command(&self.command, input_path, output_path)
    }

    fn read_output(&self, output_path: &Path) -> Result<CalcReport> {
        read_output_file(output_path, QeCode::Ph)
    }
}

/// Interface to `neb.x`.
pub struct NebInterface {
    /// Command used to launch the code
    pub command: String,
}

impl NebInterface {
    /// Creates an interface launching `command`.
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

impl QeInterface for NebInterface {
    fn code(&self) -> QeCode {
        QeCode::Neb
    }

    fn write_input(&self, input: &NamelistFile, path: &Path) -> Result<()> {
        write_input_file(input, path)
    }

    fn run_calculation(&self, input_path: &Path, output_path: &Path) -> Result<()> {
        run_command(&self.command, input_path, output_path)
    }

    fn read_output(&self, output_path: &Path) -> Result<CalcReport> {
        read_output_file(output_path, QeCode::Neb)
    }
}

/// One finished submission: what was run and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedCalc {
    /// Short label, e.g. the iteration file stem
    pub label: String,
    /// Input file that produced this run
    pub input_path: PathBuf,
    /// Captured output file
    pub output_path: PathBuf,
    /// The input as submitted; handlers read failed-run parameters from here
    pub input: NamelistFile,
    /// Scan of the output
    pub report: CalcReport,
}

fn write_input_file(input: &NamelistFile, path: &Path) -> Result<()> {
    debug!("writing input file {}", path.display());
    fs::write(path, input.render())?;
    Ok(())
}

fn run_command(command: &str, input_path: &Path, output_path: &Path) -> Result<()> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| QeError::Execution("empty command".to_string()))?;

    debug!(
        "launching '{}' on {} -> {}",
        command,
        input_path.display(),
        output_path.display()
    );

    let output = Command::new(program)
        .args(parts)
        .arg("-in")
        .arg(input_path)
        .output()
        .map_err(|e| QeError::Execution(format!("failed to launch '{}': {}", command, e)))?;

    fs::write(output_path, &output.stdout)?;

    if !output.status.success() {
        // QE stops with a non-zero code on handled errors as well; the
        // output scan decides whether this run is recoverable.
        warn!(
            "'{}' exited with {}; classifying from its output",
            command, output.status
        );
    }

    Ok(())
}

fn read_output_file(output_path: &Path, code: QeCode) -> Result<CalcReport> {
    let text = fs::read_to_string(output_path)?;
    Ok(report::scan_output(&text, code))
}
