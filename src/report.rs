//! Output scanning for Quantum ESPRESSO runs.
//!
//! `ph.x` and `neb.x` report their fate only through their text output, so
//! restart decisions start here. A finished run is condensed into a
//! [`CalcReport`]: whether the `JOB DONE` trailer was printed, the canonical
//! warning strings recognized in the body, and meta-warnings about the output
//! itself (a missing trailer means the binary was killed before it could
//! finish). The error handlers in [`crate::handlers`] match against these
//! canonical strings, never against raw output.

use crate::config::QeCode;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The run stopped itself because its `max_seconds` budget ran out. QE prints
/// this string verbatim; it is recoverable.
pub const WARNING_MAX_CPU_TIME: &str = "Maximum CPU time exceeded";

/// The self-consistency loop of the phonon calculation hit its iteration
/// ceiling without converging.
pub const WARNING_SCF_NOT_CONVERGED: &str = "Phonon did not reach end of self consistency";

/// Substring of the `phq_readin` error raised for an unreadable `INPUTPH`
/// namelist.
pub const WARNING_READING_INPUTPH: &str = "reading inputph namelist";

/// Meta-warning attached when the output never reached the `JOB DONE`
/// trailer, i.e. the binary was killed rather than exiting on its own.
pub fn premature_end_warning(code: QeCode) -> String {
    format!("QE {} run did not reach the end of the execution.", code.label())
}

lazy_static! {
    // "Error in routine phq_readin (1):\n     reading inputph namelist"
    static ref ERROR_IN_ROUTINE: Regex =
        Regex::new(r"Error in routine\s+(\S+)\s+\((\d+)\):\s*\n\s*([^\n%]+)").unwrap();
    static ref SCF_NOT_CONVERGED: Regex =
        Regex::new(r"(?i)did not reach end of self consistency").unwrap();
    // " PHONON       :  1h23m CPU     1h25m WALL"
    static ref TIMING: Regex =
        Regex::new(r"(?m)^\s*(?:PHONON|NEB)\s*:\s*(.+?)\s+CPU\s+(.+?)\s+WALL").unwrap();
}

/// Condensed result of one finished calculation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalcReport {
    /// The `JOB DONE` trailer was seen
    pub job_done: bool,
    /// Canonical warnings recognized in the output body
    pub warnings: Vec<String>,
    /// Meta-warnings about the output itself
    pub parser_warnings: Vec<String>,
    /// CPU time from the final timing line, as printed
    pub cpu_time: Option<String>,
    /// Wall time from the final timing line, as printed
    pub wall_time: Option<String>,
}

impl CalcReport {
    /// A run counts as successful only when it finished on its own and the
    /// scan raised nothing at all.
    pub fn is_successful(&self) -> bool {
        self.job_done && self.warnings.is_empty() && self.parser_warnings.is_empty()
    }

    /// Exact membership test against the recognized warnings.
    pub fn has_warning(&self, warning: &str) -> bool {
        self.warnings.iter().any(|w| w == warning)
    }

    /// Substring test across all recognized warnings.
    pub fn any_warning_contains(&self, needle: &str) -> bool {
        self.warnings.iter().any(|w| w.contains(needle))
    }

    /// Exact membership test against the meta-warnings.
    pub fn has_parser_warning(&self, warning: &str) -> bool {
        self.parser_warnings.iter().any(|w| w == warning)
    }
}

/// Scans the raw output of a `ph.x` or `neb.x` run.
///
/// The scan is additive: an output that hits the CPU limit *and* prints
/// `JOB DONE` reports both facts, which is exactly the recoverable-stop case
/// the walltime handler restarts from.
pub fn scan_output(text: &str, code: QeCode) -> CalcReport {
    let mut report = CalcReport {
        job_done: text.contains("JOB DONE"),
        ..CalcReport::default()
    };

    if text.contains(WARNING_MAX_CPU_TIME) {
        report.warnings.push(WARNING_MAX_CPU_TIME.to_string());
    }

    if SCF_NOT_CONVERGED.is_match(text) {
        report.warnings.push(WARNING_SCF_NOT_CONVERGED.to_string());
    }

    for caps in ERROR_IN_ROUTINE.captures_iter(text) {
        let routine = caps.get(1).map_or("", |m| m.as_str());
        let errcode = caps.get(2).map_or("", |m| m.as_str());
        let message = caps.get(3).map_or("", |m| m.as_str()).trim();
        report
            .warnings
            .push(format!("Error in routine {} ({}): {}", routine, errcode, message));
    }

    if let Some(caps) = TIMING.captures_iter(text).last() {
        report.cpu_time = Some(caps[1].trim().to_string());
        report.wall_time = Some(caps[2].trim().to_string());
    }

    if !report.job_done {
        report.parser_warnings.push(premature_end_warning(code));
    }

    report
}
